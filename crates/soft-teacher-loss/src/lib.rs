//! Classification losses for semi-supervised object detection.
//!
//! This crate provides the box-classification losses used when training a
//! two-stage detector with a teacher model that pseudo-labels unlabeled images.
//! All losses are backend-agnostic and built on the Burn deep learning framework.
//!
//! ## Loss Functions
//!
//! - **[`SoftTeacherLoss`]**: Semi-supervised classification loss that splits boxes
//!   into supervised/unsupervised foreground/background groups and reweights
//!   pseudo-labeled background boxes by the teacher's background confidence
//! - **[`FocalLoss`]**: Multi-class focal loss for hard-example mining
//! - **[`BoxClassificationLoss`]**: Selectable supervised classification loss
//!   (cross-entropy or focal)
//! - **[`cross_entropy_per_box`]**: Cross-entropy without reduction, one value per box
//!
//! ## Usage Example
//!
//! ```rust
//! use burn::backend::NdArray;
//! use burn::tensor::{Bool, Int, Tensor, TensorData};
//! use soft_teacher_loss::SoftTeacherLossConfig;
//!
//! let device = Default::default();
//! let loss = SoftTeacherLossConfig::new()
//!     .with_unsupervised_loss_weight(0.5)
//!     .init();
//!
//! let logits = Tensor::<NdArray, 2>::from_data(
//!     TensorData::from([[2.0, 0.1, 0.3], [0.2, 3.0, 0.1]]),
//!     &device,
//! );
//! let labels = Tensor::<NdArray, 1, Int>::from_data(TensorData::from([0, 1]), &device);
//! let scores = Tensor::<NdArray, 1>::from_data(TensorData::from([0.9, 0.1]), &device);
//! let is_pseudo = Tensor::<NdArray, 1, Bool>::from_data(TensorData::from([true, false]), &device);
//!
//! let value = loss.forward(logits, labels, scores, is_pseudo);
//! assert_eq!(value.dims(), [1]);
//! ```
//!
//! Every loss exposes `forward` returning a `[1]` tensor; the Soft-Teacher loss
//! additionally exposes [`SoftTeacherLoss::forward_breakdown`] with the four
//! sub-losses and the box partition they were computed from.

mod cross_entropy;
mod focal;
mod selection;
mod soft_teacher;

pub use cross_entropy::cross_entropy_per_box;
pub use focal::{FocalLoss, FocalLossConfig};
pub use selection::{
    BoxClassificationLoss, BoxClassificationLossConfig, ClassificationLossKind,
    UnknownClassificationLoss,
};
pub use soft_teacher::{
    semi_supervised_classification_loss, BoxPartition, SoftTeacherLoss, SoftTeacherLossConfig,
    SoftTeacherLossOutput,
};
