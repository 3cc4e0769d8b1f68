//! Explainability tooling
//!
//! Grad-CAM overlays for the real/fake decision. Diagnostic only: callers in
//! the training path log failures instead of propagating them.

pub mod gradcam;

pub use gradcam::{grad_cam, overlay_path, GradCamOutput};
