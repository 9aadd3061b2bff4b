//! Cross-entropy evaluated independently for every box.

use burn::tensor::{activation, backend::Backend, Int, Tensor};

/// Computes the cross-entropy of every box against its class index, without reduction.
///
/// The log-softmax is taken along the class dimension and the log-probability of
/// the target class is gathered for each row:
///
/// ```text
/// loss_i = -log(softmax(logits_i)[targets_i])
/// ```
///
/// # Shapes
///
/// - logits: `[num_boxes, num_classes]`
/// - targets: `[num_boxes]`
/// - output: `[num_boxes]`
pub fn cross_entropy_per_box<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let [num_boxes, _] = logits.dims();
    let [num_targets] = targets.dims();
    assert_eq!(
        num_boxes, num_targets,
        "Number of logit rows ({num_boxes}) must match number of targets ({num_targets})"
    );

    let log_probabilities = activation::log_softmax(logits, 1);
    let nll = log_probabilities
        .gather(1, targets.reshape([num_boxes, 1]))
        .neg();

    nll.reshape([num_boxes])
}
