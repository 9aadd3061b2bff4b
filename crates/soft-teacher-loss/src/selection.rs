//! Selectable classification loss for supervised box batches.

use core::{fmt, str::FromStr};

use burn::{
    config::Config,
    nn::loss::Reduction,
    tensor::{backend::Backend, Int, Tensor},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{cross_entropy::cross_entropy_per_box, FocalLoss, FocalLossConfig};

/// Classification loss applied to the box head of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationLossKind {
    /// Cross-entropy over all classes.
    CrossEntropy,
    /// Focal loss, see [`FocalLoss`].
    #[serde(rename = "focal_loss")]
    Focal,
}

impl Default for ClassificationLossKind {
    fn default() -> Self {
        Self::CrossEntropy
    }
}

impl ClassificationLossKind {
    /// Every selectable loss, in command-line order.
    pub const ALL: [Self; 2] = [Self::CrossEntropy, Self::Focal];

    /// Name used on the command line.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CrossEntropy => "cross_entropy",
            Self::Focal => "focal_loss",
        }
    }
}

impl fmt::Display for ClassificationLossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a classification loss name is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported classification loss function: {name} (expected one of: cross_entropy, focal_loss)")]
pub struct UnknownClassificationLoss {
    /// The name that failed to parse.
    pub name: String,
}

impl FromStr for ClassificationLossKind {
    type Err = UnknownClassificationLoss;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| UnknownClassificationLoss {
                name: name.to_owned(),
            })
    }
}

/// Configuration for creating a [box classification loss](BoxClassificationLoss).
#[derive(Config, Debug)]
pub struct BoxClassificationLossConfig {
    /// Which loss to apply. Default: cross-entropy
    #[config(default = "ClassificationLossKind::CrossEntropy")]
    pub kind: ClassificationLossKind,
    /// Focal loss settings, used when `kind` is [`ClassificationLossKind::Focal`].
    #[config(default = "FocalLossConfig::new()")]
    pub focal: FocalLossConfig,
}

impl BoxClassificationLossConfig {
    /// Initialize the [box classification loss](BoxClassificationLoss).
    pub fn init(&self) -> BoxClassificationLoss {
        match self.kind {
            ClassificationLossKind::CrossEntropy => BoxClassificationLoss::CrossEntropy,
            ClassificationLossKind::Focal => BoxClassificationLoss::Focal(self.focal.init()),
        }
    }
}

/// Classification loss over ground-truth labeled boxes, reduced by the mean.
#[derive(Debug, Clone)]
pub enum BoxClassificationLoss {
    /// Cross-entropy over all classes.
    CrossEntropy,
    /// Focal loss.
    Focal(FocalLoss),
}

impl BoxClassificationLoss {
    /// The kind of loss this instance computes.
    pub const fn kind(&self) -> ClassificationLossKind {
        match self {
            Self::CrossEntropy => ClassificationLossKind::CrossEntropy,
            Self::Focal(_) => ClassificationLossKind::Focal,
        }
    }

    /// Compute the mean loss over all boxes; an empty batch gives zero.
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
    ) -> Tensor<B, 1> {
        let [num_boxes, _] = logits.dims();
        if num_boxes == 0 {
            return Tensor::zeros([1], &logits.device());
        }

        match self {
            Self::CrossEntropy => cross_entropy_per_box(logits, targets).mean(),
            Self::Focal(focal) => focal.forward(logits, targets, Reduction::Mean),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn kinds_parse_from_command_line_names() {
        assert_eq!(
            "cross_entropy".parse::<ClassificationLossKind>(),
            Ok(ClassificationLossKind::CrossEntropy)
        );
        assert_eq!(
            "focal_loss".parse::<ClassificationLossKind>(),
            Ok(ClassificationLossKind::Focal)
        );
        for kind in ClassificationLossKind::ALL {
            assert_eq!(kind.to_string().parse::<ClassificationLossKind>(), Ok(kind));
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let error = "hinge".parse::<ClassificationLossKind>().unwrap_err();

        assert_eq!(error.name, "hinge");
        assert!(error.to_string().contains("cross_entropy, focal_loss"));
    }

    #[test]
    fn config_selects_variant() {
        let ce = BoxClassificationLossConfig::new().init();
        let focal = BoxClassificationLossConfig::new()
            .with_kind(ClassificationLossKind::Focal)
            .with_focal(FocalLossConfig::new().with_gamma(1.0))
            .init();

        assert_eq!(ce.kind(), ClassificationLossKind::CrossEntropy);
        assert_eq!(focal.kind(), ClassificationLossKind::Focal);
        match focal {
            BoxClassificationLoss::Focal(loss) => assert_eq!(loss.gamma, 1.0),
            BoxClassificationLoss::CrossEntropy => panic!("expected focal loss"),
        }
    }

    #[test]
    fn focal_is_not_larger_than_cross_entropy() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[2.0, 1.0, 0.5], [0.1, 3.0, 0.2]]),
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_data(TensorData::from([0, 1]), &device);

        let ce: f32 = BoxClassificationLoss::CrossEntropy
            .forward(logits.clone(), targets.clone())
            .into_scalar();
        let focal: f32 = BoxClassificationLoss::Focal(FocalLoss::new())
            .forward(logits, targets)
            .into_scalar();

        assert!(focal > 0.0 && focal < ce, "focal {focal}, ce {ce}");
    }

    #[test]
    fn empty_batch_gives_zero() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::zeros([0, 4], &device);
        let targets = Tensor::<TestBackend, 1, Int>::zeros([0], &device);

        let value: f32 = BoxClassificationLoss::CrossEntropy
            .forward(logits, targets)
            .into_scalar();

        assert_eq!(value, 0.0);
    }
}
