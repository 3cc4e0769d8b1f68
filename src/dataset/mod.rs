//! Dataset module for ArtiFact real/fake data handling
//!
//! This module provides functionality for:
//! - Indexing labeled `{real,fake}/{class}` trees and flat unlabeled test folders
//! - Deterministic preprocessing (decode, resize, normalize)
//! - Burn batching with a bounded decode pool
//! - Deterministic test-time augmentations
//!
//! ## Directory Layout
//!
//! ```text
//! root/
//! ├── train/{real,fake}/{human_faces,animals,vehicles}/*
//! ├── validation/{real,fake}/{human_faces,animals,vehicles}/*
//! └── test/*
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{DuelError, Result};

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod preprocess;

// Re-export main types for convenience
pub use augmentation::Augmentation;
pub use burn_dataset::{ArtifactBatch, ArtifactBatcher, ArtifactItem, BatchLoader, TestItem};
pub use loader::{ArtifactIndex, IndexStats, Sample, TestIndex};
pub use preprocess::Preprocessor;

/// Number of domain classes
pub const NUM_DOMAIN_CLASSES: usize = 3;

/// Canonical directory names, in class-index order
pub const CLASS_NAMES: [&str; NUM_DOMAIN_CLASSES] = ["human_faces", "animals", "vehicles"];

/// Total ArtiFact_240K sample counts per domain class, in class-index order
pub const KNOWN_CLASS_COUNTS: [usize; NUM_DOMAIN_CLASSES] = [84_000, 25_200, 58_798];

/// Visual domain an image belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainClass {
    HumanFaces,
    Animals,
    Vehicles,
}

impl DomainClass {
    /// All classes in index order
    pub const ALL: [DomainClass; NUM_DOMAIN_CLASSES] = [
        DomainClass::HumanFaces,
        DomainClass::Animals,
        DomainClass::Vehicles,
    ];

    /// Integer target used by the class head
    pub fn index(self) -> usize {
        match self {
            DomainClass::HumanFaces => 0,
            DomainClass::Animals => 1,
            DomainClass::Vehicles => 2,
        }
    }

    /// Inverse of [`DomainClass::index`]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Canonical directory / output name
    pub fn name(self) -> &'static str {
        CLASS_NAMES[self.index()]
    }

    /// Parse a class directory name, rejecting anything outside the mapping
    pub fn from_dir_name(name: &str, path: &Path) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|class| class.name() == name)
            .ok_or_else(|| DuelError::UnknownClass {
                name: name.to_string(),
                path: path.to_path_buf(),
            })
    }
}

impl fmt::Display for DomainClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Real/fake ground truth. Real images are the positive class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authenticity {
    Fake,
    Real,
}

impl Authenticity {
    /// Label directories in scan order
    pub const SCAN_ORDER: [Authenticity; 2] = [Authenticity::Real, Authenticity::Fake];

    /// Binary target: real = 1, fake = 0
    pub fn target(self) -> u8 {
        match self {
            Authenticity::Fake => 0,
            Authenticity::Real => 1,
        }
    }

    /// Directory name under a split root
    pub fn dir_name(self) -> &'static str {
        match self {
            Authenticity::Fake => "fake",
            Authenticity::Real => "real",
        }
    }

    /// Decision from a real-class probability, thresholded at 0.5
    pub fn from_probability(p_real: f32) -> Self {
        if p_real > 0.5 {
            Authenticity::Real
        } else {
            Authenticity::Fake
        }
    }
}

impl fmt::Display for Authenticity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}
