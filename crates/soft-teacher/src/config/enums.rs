//! Enumeration types for experiment configuration.

use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use soft_teacher_loss::ClassificationLossKind;

use crate::error::{SoftTeacherError, SoftTeacherResult};

/// Defines the feature extractor of the Faster R-CNN detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    /// ResNet-50 with a feature pyramid network.
    Resnet50,
    /// EfficientNetV2.
    EfficientNetV2,
    /// MobileNetV3 (large).
    MobileNetV3,
}

impl Default for Network {
    fn default() -> Self {
        Self::Resnet50
    }
}

impl Network {
    /// Every selectable backbone, in command-line order.
    pub const ALL: [Self; 3] = [Self::Resnet50, Self::EfficientNetV2, Self::MobileNetV3];

    /// Name used on the command line and in experiment files.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Resnet50 => "resnet50",
            Self::EfficientNetV2 => "efficient_net_v2",
            Self::MobileNetV3 => "mobile_net_v3",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = SoftTeacherError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|network| network.name() == name)
            .ok_or_else(|| SoftTeacherError::UnsupportedBackbone {
                backbone: name.to_owned(),
            })
    }
}

/// Parses a classification loss by its command-line name.
///
/// # Errors
///
/// Returns `Err(SoftTeacherError::UnsupportedLossFunction)` for an unknown name.
pub fn parse_classification_loss(name: &str) -> SoftTeacherResult<ClassificationLossKind> {
    Ok(name.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn networks_parse_from_command_line_names() {
        assert_eq!("resnet50".parse::<Network>().unwrap(), Network::Resnet50);
        assert_eq!(
            "efficient_net_v2".parse::<Network>().unwrap(),
            Network::EfficientNetV2
        );
        assert_eq!(
            "mobile_net_v3".parse::<Network>().unwrap(),
            Network::MobileNetV3
        );
    }

    #[test]
    fn serde_names_match_command_line_names() {
        for network in Network::ALL {
            let json = serde_json::to_string(&network).unwrap();
            assert_eq!(json, format!("\"{network}\""));
            assert_eq!(serde_json::from_str::<Network>(&json).unwrap(), network);
        }
    }

    #[test]
    fn unknown_network_is_unsupported() {
        let error = "vgg16".parse::<Network>().unwrap_err();

        assert!(matches!(
            error,
            SoftTeacherError::UnsupportedBackbone { ref backbone } if backbone == "vgg16"
        ));
        assert_eq!(error.to_string(), "Unsupported backbone: vgg16");
    }

    #[test]
    fn classification_losses_parse_through_experiment_errors() {
        assert_eq!(
            parse_classification_loss("focal_loss").unwrap(),
            ClassificationLossKind::Focal
        );

        let error = parse_classification_loss("hinge").unwrap_err();
        assert!(matches!(
            error,
            SoftTeacherError::UnsupportedLossFunction(ref unknown) if unknown.name == "hinge"
        ));
        assert!(error.to_string().starts_with("Unsupported classification loss function: hinge"));
    }
}
