//! # Soft-Teacher
//!
//! Experiment tooling around the semi-supervised classification losses of
//! [`soft_teacher_loss`]: configuration of a Faster R-CNN training run,
//! host-side box batches, and loss evaluation on a compile-time selected
//! Burn backend.
//!
//! ## Modules
//!
//! - `backend`: backend, its autodiff wrapper, and device selected through cargo features
//! - `batch`: [`BoxBatch`], the per-box loss inputs as plain vectors
//! - `config`: [`ExperimentConfig`] and the [`Network`] backbone choice
//! - `error`: [`SoftTeacherError`] and [`SoftTeacherResult`]
//! - `evaluate`: [`evaluate`] and [`evaluate_with_gradients`] producing a [`LossReport`]
//! - `logging`: subscriber setup for the `soft-teacher` binary

pub mod backend;
mod batch;
mod config;
mod error;
mod evaluate;
pub mod logging;

#[doc(inline)]
pub use batch::{BoxBatch, BoxBatchTensors};
#[doc(inline)]
pub use config::{parse_classification_loss, ExperimentConfig, Network};
#[doc(inline)]
pub use error::{SoftTeacherError, SoftTeacherResult};
#[doc(inline)]
pub use evaluate::{evaluate, evaluate_with_gradients, GroupSizes, LossReport};
#[doc(inline)]
pub use soft_teacher_loss as loss;

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray;
}
