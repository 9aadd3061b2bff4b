//! Multi-class focal loss.
//!
//! Down-weights well-classified boxes so that training concentrates on hard ones:
//!
//! ```text
//! FL_i = -α · (1 - p_t)^γ · log(p_t)
//! ```
//!
//! where `p_t` is the predicted probability of the target class. With `γ = 0` and
//! `α = 1` the loss reduces to cross-entropy.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    nn::loss::Reduction,
    tensor::{activation, backend::Backend, Int, Tensor},
};

/// Configuration for creating a [Focal loss](FocalLoss).
#[derive(Config, Debug)]
pub struct FocalLossConfig {
    /// Focusing parameter γ. Default: 2.0
    #[config(default = 2.0)]
    pub gamma: f64,
    /// Scale α applied to every box. Default: 1.0
    #[config(default = 1.0)]
    pub alpha: f64,
}

impl FocalLossConfig {
    /// Initialize [Focal loss](FocalLoss).
    pub fn init(&self) -> FocalLoss {
        self.assertions();
        FocalLoss {
            gamma: self.gamma,
            alpha: self.alpha,
        }
    }

    fn assertions(&self) {
        assert!(
            self.gamma >= 0.0,
            "Gamma for FocalLoss must be non-negative, got {}",
            self.gamma
        );
        assert!(
            self.alpha > 0.0,
            "Alpha for FocalLoss must be positive, got {}",
            self.alpha
        );
    }
}

/// Multi-class focal loss over box classification logits.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct FocalLoss {
    /// Focusing parameter γ.
    pub gamma: f64,
    /// Scale α applied to every box.
    pub alpha: f64,
}

impl Default for FocalLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for FocalLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("gamma", &self.gamma)
            .add("alpha", &self.alpha)
            .optional()
    }
}

impl FocalLoss {
    /// Create a new focal loss with default configuration.
    pub fn new() -> Self {
        FocalLossConfig::new().init()
    }

    /// Compute the criterion with reduction.
    ///
    /// # Shapes
    ///
    /// - logits: `[num_boxes, num_classes]`
    /// - targets: `[num_boxes]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let loss = self.forward_no_reduction(logits, targets);
        match reduction {
            Reduction::Mean | Reduction::Auto => loss.mean(),
            Reduction::Sum => loss.sum(),
        }
    }

    /// Compute the criterion without reduction.
    ///
    /// # Shapes
    ///
    /// - logits: `[num_boxes, num_classes]`
    /// - targets: `[num_boxes]`
    /// - output: `[num_boxes]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let [num_boxes, _] = logits.dims();
        let [num_targets] = targets.dims();
        assert_eq!(
            num_boxes, num_targets,
            "Number of logit rows ({num_boxes}) must match number of targets ({num_targets})"
        );

        let log_p_t = activation::log_softmax(logits, 1)
            .gather(1, targets.reshape([num_boxes, 1]))
            .reshape([num_boxes]);

        // Rounding can push p_t marginally above 1.
        let modulating = log_p_t
            .clone()
            .exp()
            .neg()
            .add_scalar(1.0)
            .clamp_min(0.0)
            .powf_scalar(self.gamma);

        (modulating * log_p_t.neg()).mul_scalar(self.alpha)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance, Transaction};

    use super::*;
    use crate::{cross_entropy::cross_entropy_per_box, tests::TestBackend};

    fn inputs() -> (Tensor<TestBackend, 2>, Tensor<TestBackend, 1, Int>) {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[2.0, 1.0, 0.5], [0.1, 3.0, 0.2], [0.3, 0.2, 0.1]]),
            &device,
        );
        let targets =
            Tensor::<TestBackend, 1, Int>::from_data(TensorData::from([0, 1, 2]), &device);
        (logits, targets)
    }

    #[test]
    fn zero_gamma_matches_cross_entropy() {
        let (logits, targets) = inputs();
        let loss = FocalLossConfig::new().with_gamma(0.0).init();

        let focal = loss.forward_no_reduction(logits.clone(), targets.clone());
        let ce = cross_entropy_per_box(logits, targets);

        let [focal, ce] = Transaction::default()
            .register(focal)
            .register(ce)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");

        focal.assert_approx_eq::<f32>(&ce, Tolerance::default());
    }

    #[test]
    fn easy_boxes_are_down_weighted_more_than_hard_ones() {
        let (logits, targets) = inputs();

        let focal = FocalLoss::new()
            .forward_no_reduction(logits.clone(), targets.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let ce = cross_entropy_per_box(logits, targets)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        // Box 1 is well classified, box 2 is not.
        let easy_ratio = focal[1] / ce[1];
        let hard_ratio = focal[2] / ce[2];
        assert!(focal.iter().zip(&ce).all(|(f, c)| f <= c));
        assert!(easy_ratio < hard_ratio, "{easy_ratio} >= {hard_ratio}");
    }

    #[test]
    fn alpha_scales_the_loss() {
        let (logits, targets) = inputs();

        let base = FocalLoss::new().forward(logits.clone(), targets.clone(), Reduction::Sum);
        let scaled = FocalLossConfig::new()
            .with_alpha(0.25)
            .init()
            .forward(logits, targets, Reduction::Sum);

        let [base, scaled] = Transaction::default()
            .register(base.mul_scalar(0.25))
            .register(scaled)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");

        scaled.assert_approx_eq::<f32>(&base, Tolerance::default());
    }

    #[test]
    fn mean_and_sum_reductions_agree() {
        let (logits, targets) = inputs();
        let loss = FocalLoss::new();

        let mean = loss.forward(logits.clone(), targets.clone(), Reduction::Mean);
        let sum = loss.forward(logits, targets, Reduction::Sum);

        let [mean, sum] = Transaction::default()
            .register(mean.mul_scalar(3.0))
            .register(sum)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");

        mean.assert_approx_eq::<f32>(&sum, Tolerance::default());
    }

    #[test]
    #[should_panic(expected = "Gamma for FocalLoss must be non-negative")]
    fn negative_gamma_panics() {
        let _ = FocalLossConfig::new().with_gamma(-1.0).init();
    }
}
