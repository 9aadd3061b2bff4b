//! Soft-Teacher classification loss for semi-supervised object detection.
//!
//! Every box is assigned to a group according to the origin of its label
//! (ground truth or teacher pseudo-label) and to the student's own prediction:
//!
//! ```text
//! supervised background   : argmax == 0                      && !pseudo
//! supervised foreground   : argmax >  0                      && !pseudo
//! unsupervised background : argmax == 0                      &&  pseudo
//! unsupervised foreground : argmax >  0 && p_max > threshold &&  pseudo
//! ```
//!
//! Pseudo-labeled boxes predicted as foreground without enough confidence belong
//! to no group and do not contribute to the loss.
//!
//! Each group is reduced by the mean of its per-box cross-entropy, except the
//! unsupervised background group which uses the teacher's background scores `s`
//! as reliability weights:
//!
//! ```text
//! w_i  = s_i / (Σ_j s_j + eps)
//! L_ub = Σ_i w_i · CE_i
//! L    = (L_sf + L_sb) + λ · (L_uf + L_ub)
//! ```
//!
//! With `reliability_mean_reduction` the weighted losses are averaged instead,
//! `L_ub = mean_i(w_i · CE_i)`, which divides by the group size once more.
//!
//! A group without boxes contributes exactly zero.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{activation, backend::Backend, Bool, Int, Tensor, TensorData},
};

use crate::cross_entropy::cross_entropy_per_box;

/// Configuration for creating a [Soft-Teacher loss](SoftTeacherLoss).
#[derive(Config, Debug)]
pub struct SoftTeacherLossConfig {
    /// Weight λ applied to the combined unsupervised term. Default: 1.0
    #[config(default = 1.0)]
    pub unsupervised_loss_weight: f64,
    /// Probability above which a pseudo-labeled foreground prediction is trusted. Default: 0.9
    #[config(default = 0.9)]
    pub foreground_threshold: f64,
    /// Added to the reliability weight normalizer. Default: 1e-4
    #[config(default = 1e-4)]
    pub epsilon: f64,
    /// Count unconfident foreground predictions on pseudo-labeled boxes as
    /// unsupervised background instead of dropping them. Default: false
    #[config(default = false)]
    pub uncertain_foreground_as_background: bool,
    /// Average the reliability-weighted background losses instead of summing
    /// them. Default: false
    #[config(default = false)]
    pub reliability_mean_reduction: bool,
}

impl SoftTeacherLossConfig {
    /// Initialize [Soft-Teacher loss](SoftTeacherLoss).
    pub fn init(&self) -> SoftTeacherLoss {
        self.assertions();
        SoftTeacherLoss {
            unsupervised_loss_weight: self.unsupervised_loss_weight,
            foreground_threshold: self.foreground_threshold,
            epsilon: self.epsilon,
            uncertain_foreground_as_background: self.uncertain_foreground_as_background,
            reliability_mean_reduction: self.reliability_mean_reduction,
        }
    }

    fn assertions(&self) {
        assert!(
            self.unsupervised_loss_weight.is_finite() && self.unsupervised_loss_weight >= 0.0,
            "Unsupervised loss weight for SoftTeacherLoss must be finite and non-negative, got {}",
            self.unsupervised_loss_weight
        );
        assert!(
            (0.0..=1.0).contains(&self.foreground_threshold),
            "Foreground threshold for SoftTeacherLoss must be in [0, 1], got {}",
            self.foreground_threshold
        );
        assert!(
            self.epsilon > 0.0,
            "Epsilon for SoftTeacherLoss must be positive, got {}",
            self.epsilon
        );
    }
}

/// Semi-supervised box classification loss with teacher reliability reweighting.
///
/// See the [module documentation](self) for the grouping rules and the
/// combination formula.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct SoftTeacherLoss {
    /// Weight λ applied to the combined unsupervised term.
    pub unsupervised_loss_weight: f64,
    /// Probability above which a pseudo-labeled foreground prediction is trusted.
    pub foreground_threshold: f64,
    /// Added to the reliability weight normalizer.
    pub epsilon: f64,
    /// Count unconfident pseudo-labeled foreground predictions as background.
    pub uncertain_foreground_as_background: bool,
    /// Average the reliability-weighted background losses instead of summing them.
    pub reliability_mean_reduction: bool,
}

impl Default for SoftTeacherLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for SoftTeacherLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("unsupervised_loss_weight", &self.unsupervised_loss_weight)
            .add("foreground_threshold", &self.foreground_threshold)
            .add("reliability_mean_reduction", &self.reliability_mean_reduction)
            .add("epsilon", &self.epsilon)
            .optional()
    }
}

/// Box indices of each loss group.
///
/// Produced by [`SoftTeacherLoss::partition`]. The four groups are disjoint;
/// boxes that satisfy none of them are listed in `excluded`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoxPartition {
    /// Ground-truth boxes the student predicts as foreground.
    pub supervised_foreground: Vec<usize>,
    /// Ground-truth boxes the student predicts as background.
    pub supervised_background: Vec<usize>,
    /// Pseudo-labeled boxes confidently predicted as foreground.
    pub unsupervised_foreground: Vec<usize>,
    /// Pseudo-labeled boxes predicted as background.
    pub unsupervised_background: Vec<usize>,
    /// Pseudo-labeled boxes predicted as foreground below the threshold.
    pub excluded: Vec<usize>,
}

impl BoxPartition {
    /// Total number of boxes that were partitioned.
    pub fn num_boxes(&self) -> usize {
        self.supervised_foreground.len()
            + self.supervised_background.len()
            + self.unsupervised_foreground.len()
            + self.unsupervised_background.len()
            + self.excluded.len()
    }
}

/// The four sub-losses of one [`SoftTeacherLoss`] evaluation.
#[derive(Debug, Clone)]
pub struct SoftTeacherLossOutput<B: Backend> {
    /// Mean cross-entropy of the supervised foreground group.
    pub supervised_foreground: Tensor<B, 1>,
    /// Mean cross-entropy of the supervised background group.
    pub supervised_background: Tensor<B, 1>,
    /// Mean cross-entropy of the unsupervised foreground group.
    pub unsupervised_foreground: Tensor<B, 1>,
    /// Reliability-weighted mean cross-entropy of the unsupervised background group.
    pub unsupervised_background: Tensor<B, 1>,
    /// Weight applied to the unsupervised term by [`total`](Self::total).
    pub unsupervised_loss_weight: f64,
    /// Groups the sub-losses were computed over.
    pub partition: BoxPartition,
}

impl<B: Backend> SoftTeacherLossOutput<B> {
    /// Sum of the supervised foreground and background terms.
    pub fn supervised(&self) -> Tensor<B, 1> {
        self.supervised_foreground.clone() + self.supervised_background.clone()
    }

    /// Sum of the unsupervised foreground and background terms.
    pub fn unsupervised(&self) -> Tensor<B, 1> {
        self.unsupervised_foreground.clone() + self.unsupervised_background.clone()
    }

    /// `supervised + unsupervised_loss_weight * unsupervised`.
    pub fn total(&self) -> Tensor<B, 1> {
        self.supervised() + self.unsupervised().mul_scalar(self.unsupervised_loss_weight)
    }
}

impl SoftTeacherLoss {
    /// Create a new Soft-Teacher loss with default configuration.
    pub fn new() -> Self {
        SoftTeacherLossConfig::new().init()
    }

    /// Compute the combined loss.
    ///
    /// # Shapes
    ///
    /// - class_logits: `[num_boxes, num_classes]`
    /// - labels: `[num_boxes]`
    /// - teacher_background_scores: `[num_boxes]`
    /// - is_pseudo: `[num_boxes]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        class_logits: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
        teacher_background_scores: Tensor<B, 1>,
        is_pseudo: Tensor<B, 1, Bool>,
    ) -> Tensor<B, 1> {
        self.forward_breakdown(class_logits, labels, teacher_background_scores, is_pseudo)
            .total()
    }

    /// Compute the four sub-losses without combining them.
    ///
    /// Shapes are the same as for [`forward`](Self::forward); every sub-loss has shape `[1]`.
    pub fn forward_breakdown<B: Backend>(
        &self,
        class_logits: Tensor<B, 2>,
        labels: Tensor<B, 1, Int>,
        teacher_background_scores: Tensor<B, 1>,
        is_pseudo: Tensor<B, 1, Bool>,
    ) -> SoftTeacherLossOutput<B> {
        self.assertions(&class_logits, &labels, &teacher_background_scores, &is_pseudo);

        let device = class_logits.device();
        let [num_boxes, _] = class_logits.dims();
        if num_boxes == 0 {
            return SoftTeacherLossOutput {
                supervised_foreground: Tensor::zeros([1], &device),
                supervised_background: Tensor::zeros([1], &device),
                unsupervised_foreground: Tensor::zeros([1], &device),
                unsupervised_background: Tensor::zeros([1], &device),
                unsupervised_loss_weight: self.unsupervised_loss_weight,
                partition: BoxPartition::default(),
            };
        }

        let partition = self.partition(class_logits.clone(), is_pseudo);
        let unweighted = cross_entropy_per_box(class_logits, labels);

        let supervised_foreground =
            group_mean(&unweighted, &partition.supervised_foreground, &device);
        let supervised_background =
            group_mean(&unweighted, &partition.supervised_background, &device);
        let unsupervised_foreground =
            group_mean(&unweighted, &partition.unsupervised_foreground, &device);

        let unsupervised_background =
            match self.reliability_weights(teacher_background_scores, &partition) {
                Some(weights) => {
                    let indices = index_tensor(&partition.unsupervised_background, &device);
                    let weighted = weights * unweighted.select(0, indices);
                    if self.reliability_mean_reduction {
                        weighted.mean()
                    } else {
                        weighted.sum()
                    }
                }
                None => Tensor::zeros([1], &device),
            };

        SoftTeacherLossOutput {
            supervised_foreground,
            supervised_background,
            unsupervised_foreground,
            unsupervised_background,
            unsupervised_loss_weight: self.unsupervised_loss_weight,
            partition,
        }
    }

    /// Split the boxes into the four loss groups.
    ///
    /// Predictions are taken from a detached softmax, so the partition never
    /// takes part in gradient computation.
    pub fn partition<B: Backend>(
        &self,
        class_logits: Tensor<B, 2>,
        is_pseudo: Tensor<B, 1, Bool>,
    ) -> BoxPartition {
        let [num_boxes, _] = class_logits.dims();
        let [num_flags] = is_pseudo.dims();
        assert_eq!(
            num_boxes, num_flags,
            "Number of logit rows ({num_boxes}) must match is_pseudo length ({num_flags})"
        );

        let mut partition = BoxPartition::default();
        if num_boxes == 0 {
            return partition;
        }

        let probabilities = activation::softmax(class_logits.detach(), 1);
        let (top_probability, top_class) = probabilities.max_dim_with_indices(1);

        let top_probability = top_probability.into_data();
        let top_class = top_class.into_data();
        let is_pseudo = is_pseudo.int().into_data();

        // Compared in the logits' precision, as the student's probabilities are.
        let threshold = self.foreground_threshold as f32;

        let boxes = top_probability
            .iter::<f32>()
            .zip(top_class.iter::<i64>())
            .zip(is_pseudo.iter::<i64>());

        for (index, ((probability, class), pseudo)) in boxes.enumerate() {
            let predicted_foreground = class > 0;
            let confident_foreground = predicted_foreground && probability > threshold;

            let group = match (pseudo != 0, predicted_foreground, confident_foreground) {
                (false, true, _) => &mut partition.supervised_foreground,
                (false, false, _) => &mut partition.supervised_background,
                (true, _, true) => &mut partition.unsupervised_foreground,
                (true, false, false) => &mut partition.unsupervised_background,
                (true, true, false) if self.uncertain_foreground_as_background => {
                    &mut partition.unsupervised_background
                }
                (true, true, false) => &mut partition.excluded,
            };
            group.push(index);
        }

        partition
    }

    /// Reliability weights of the unsupervised background group.
    ///
    /// Returns `None` when the group is empty. Otherwise the weights follow the
    /// order of `partition.unsupervised_background` and sum to
    /// `Σ s / (Σ s + epsilon)`.
    pub fn reliability_weights<B: Backend>(
        &self,
        teacher_background_scores: Tensor<B, 1>,
        partition: &BoxPartition,
    ) -> Option<Tensor<B, 1>> {
        if partition.unsupervised_background.is_empty() {
            return None;
        }

        let device = teacher_background_scores.device();
        let indices = index_tensor(&partition.unsupervised_background, &device);
        let scores = teacher_background_scores.select(0, indices);
        let normalizer = scores.clone().sum().add_scalar(self.epsilon);

        Some(scores / normalizer)
    }

    fn assertions<B: Backend>(
        &self,
        class_logits: &Tensor<B, 2>,
        labels: &Tensor<B, 1, Int>,
        teacher_background_scores: &Tensor<B, 1>,
        is_pseudo: &Tensor<B, 1, Bool>,
    ) {
        let [num_boxes, num_classes] = class_logits.dims();
        let [num_labels] = labels.dims();
        let [num_scores] = teacher_background_scores.dims();
        let [num_flags] = is_pseudo.dims();

        assert!(
            num_classes >= 2,
            "Class logits need a background and at least one foreground class, got {num_classes} classes"
        );
        assert!(
            num_labels == num_boxes && num_scores == num_boxes && num_flags == num_boxes,
            "Per-box inputs must have the same length: logits {num_boxes}, labels {num_labels}, \
             teacher scores {num_scores}, is_pseudo {num_flags}"
        );
    }
}

/// Function-style entry point for the Soft-Teacher classification loss.
///
/// Equivalent to building a [`SoftTeacherLoss`] with the given weight and
/// threshold and calling [`SoftTeacherLoss::forward`].
pub fn semi_supervised_classification_loss<B: Backend>(
    class_logits: Tensor<B, 2>,
    labels: Tensor<B, 1, Int>,
    teacher_background_scores: Tensor<B, 1>,
    is_pseudo: Tensor<B, 1, Bool>,
    unsupervised_loss_weight: f64,
    student_unsupervised_foreground_threshold: f64,
) -> Tensor<B, 1> {
    SoftTeacherLossConfig::new()
        .with_unsupervised_loss_weight(unsupervised_loss_weight)
        .with_foreground_threshold(student_unsupervised_foreground_threshold)
        .init()
        .forward(class_logits, labels, teacher_background_scores, is_pseudo)
}

fn group_mean<B: Backend>(
    losses: &Tensor<B, 1>,
    indices: &[usize],
    device: &B::Device,
) -> Tensor<B, 1> {
    if indices.is_empty() {
        return Tensor::zeros([1], device);
    }

    losses.clone().select(0, index_tensor(indices, device)).mean()
}

fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let indices: Vec<i64> = indices.iter().map(|&index| index as i64).collect();
    let len = indices.len();

    Tensor::from_data(TensorData::new(indices, [len]), device)
}
