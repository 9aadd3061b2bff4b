//! Loss evaluation over a host-side box batch.

use burn::tensor::{
    backend::{AutodiffBackend, Backend},
    ElementConversion, Int, Tensor, TensorData,
};
use serde::{Deserialize, Serialize};
use soft_teacher_loss::BoxPartition;

use crate::{batch::BoxBatch, config::ExperimentConfig, error::SoftTeacherResult};

/// Number of boxes in each loss group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSizes {
    /// Ground-truth boxes predicted as foreground.
    pub supervised_foreground: usize,
    /// Ground-truth boxes predicted as background.
    pub supervised_background: usize,
    /// Pseudo-labeled boxes confidently predicted as foreground.
    pub unsupervised_foreground: usize,
    /// Pseudo-labeled boxes predicted as background.
    pub unsupervised_background: usize,
    /// Pseudo-labeled boxes that fell in no group.
    pub excluded: usize,
}

impl From<&BoxPartition> for GroupSizes {
    fn from(partition: &BoxPartition) -> Self {
        Self {
            supervised_foreground: partition.supervised_foreground.len(),
            supervised_background: partition.supervised_background.len(),
            unsupervised_foreground: partition.unsupervised_foreground.len(),
            unsupervised_background: partition.unsupervised_background.len(),
            excluded: partition.excluded.len(),
        }
    }
}

/// Host-side summary of one loss evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    /// Mean cross-entropy of the supervised foreground group.
    pub supervised_foreground: f32,
    /// Mean cross-entropy of the supervised background group.
    pub supervised_background: f32,
    /// Mean cross-entropy of the unsupervised foreground group.
    pub unsupervised_foreground: f32,
    /// Reliability-weighted cross-entropy of the unsupervised background group.
    pub unsupervised_background: f32,
    /// Supervised foreground plus background.
    pub supervised: f32,
    /// Unsupervised foreground plus background, before weighting.
    pub unsupervised: f32,
    /// Combined semi-supervised classification loss.
    pub total: f32,
    /// Weight the unsupervised term entered `total` with.
    pub unsupervised_loss_weight: f64,
    /// Configured classification loss over the ground-truth boxes alone.
    pub supervised_classification: f32,
    /// Number of boxes in each loss group.
    pub groups: GroupSizes,
    /// L2 norm of `∂total/∂logits` for every box, when gradients were requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_gradient_norms: Option<Vec<f32>>,
}

/// Evaluates the configured losses on `batch`.
///
/// # Errors
///
/// Returns `Err(SoftTeacherError::InvalidConfiguration)` or
/// `Err(SoftTeacherError::InvalidBatch)` when either input fails validation.
pub fn evaluate<B: Backend>(
    config: &ExperimentConfig,
    batch: &BoxBatch,
    device: &B::Device,
) -> SoftTeacherResult<LossReport> {
    config.validate()?;
    batch.validate()?;

    let loss = config.soft_teacher.init();
    let classification = config.classification_loss.init();
    let tensors = batch.to_tensors::<B>(device);

    tracing::debug!(
        num_boxes = batch.num_boxes(),
        num_classes = batch.num_classes().unwrap_or_default(),
        "evaluating semi-supervised classification loss"
    );

    let ground_truth: Vec<i64> = batch
        .is_pseudo
        .iter()
        .enumerate()
        .filter(|(_, &pseudo)| !pseudo)
        .map(|(index, _)| index as i64)
        .collect();
    let supervised_classification = if ground_truth.is_empty() {
        Tensor::<B, 1>::zeros([1], device)
    } else {
        let count = ground_truth.len();
        let indices = Tensor::<B, 1, Int>::from_data(TensorData::new(ground_truth, [count]), device);
        classification.forward(
            tensors.class_logits.clone().select(0, indices.clone()),
            tensors.labels.clone().select(0, indices),
        )
    };

    let output = loss.forward_breakdown(
        tensors.class_logits,
        tensors.labels,
        tensors.teacher_background_scores,
        tensors.is_pseudo,
    );
    let groups = GroupSizes::from(&output.partition);

    let supervised_foreground = scalar(output.supervised_foreground.clone());
    let supervised_background = scalar(output.supervised_background.clone());
    let unsupervised_foreground = scalar(output.unsupervised_foreground.clone());
    let unsupervised_background = scalar(output.unsupervised_background.clone());
    let supervised = scalar(output.supervised());
    let unsupervised = scalar(output.unsupervised());
    let total = scalar(output.total());
    let supervised_classification = scalar(supervised_classification);

    if groups.excluded > 0 {
        tracing::debug!(
            excluded = groups.excluded,
            threshold = loss.foreground_threshold,
            "pseudo-labeled foreground boxes below threshold left out"
        );
    }
    tracing::info!(
        total,
        supervised,
        unsupervised,
        supervised_classification,
        classification_loss = %classification.kind(),
        "loss evaluated"
    );

    Ok(LossReport {
        supervised_foreground,
        supervised_background,
        unsupervised_foreground,
        unsupervised_background,
        supervised,
        unsupervised,
        total,
        unsupervised_loss_weight: output.unsupervised_loss_weight,
        supervised_classification,
        groups,
        logit_gradient_norms: None,
    })
}

/// Like [`evaluate`], and also reports how strongly the combined loss pulls on
/// each box's logits.
///
/// Boxes outside every loss group get a norm of zero.
///
/// # Errors
///
/// Same as [`evaluate`].
pub fn evaluate_with_gradients<B: AutodiffBackend>(
    config: &ExperimentConfig,
    batch: &BoxBatch,
    device: &B::Device,
) -> SoftTeacherResult<LossReport> {
    let mut report = evaluate::<B>(config, batch, device)?;
    let norms = logit_gradient_norms::<B>(config, batch, device);

    tracing::debug!(
        max_norm = norms.iter().copied().fold(0.0f32, f32::max),
        "logit gradients computed"
    );
    report.logit_gradient_norms = Some(norms);
    Ok(report)
}

fn logit_gradient_norms<B: AutodiffBackend>(
    config: &ExperimentConfig,
    batch: &BoxBatch,
    device: &B::Device,
) -> Vec<f32> {
    let num_boxes = batch.num_boxes();
    let tensors = batch.to_tensors::<B>(device);
    let class_logits = tensors.class_logits.require_grad();

    let output = config.soft_teacher.init().forward_breakdown(
        class_logits.clone(),
        tensors.labels,
        tensors.teacher_background_scores,
        tensors.is_pseudo,
    );
    // No group means the total is a constant with no graph behind it.
    if output.partition.excluded.len() == num_boxes {
        return vec![0.0; num_boxes];
    }

    let gradients = output.total().backward();
    match class_logits.grad(&gradients) {
        Some(gradient) => gradient
            .powf_scalar(2.0)
            .sum_dim(1)
            .sqrt()
            .into_data()
            .iter::<f32>()
            .collect(),
        None => vec![0.0; num_boxes],
    }
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
    tensor.into_scalar().elem()
}
