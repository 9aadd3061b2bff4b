//! Experiment configuration.
//!
//! - `core`: the [`ExperimentConfig`] structure with JSON persistence and validation
//! - `enums`: closed enumerations selectable from the command line

mod core;
mod enums;

pub use core::ExperimentConfig;
pub use enums::{parse_classification_loss, Network};
