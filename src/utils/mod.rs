//! Utilities module for logging, metrics, CSV records and errors
//!
//! This module provides:
//! - Structured logging with tracing
//! - Per-task accuracy and loss accumulation
//! - Training log and prediction CSV writers
//! - Error handling types

pub mod error;
pub mod logging;
pub mod metrics;
pub mod records;

// Re-export main types for convenience
pub use error::{DuelError, Result};
pub use logging::{init_logging, LogConfig, LogLevel, TrainingLogger};
pub use metrics::{EpochMetrics, RunningMetrics};
pub use records::{EpochRecord, PredictionRecord, TrainingLogWriter};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Format a number with thousands separator
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}
