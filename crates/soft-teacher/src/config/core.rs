//! Core experiment configuration.

use std::{fs, path::Path};

use burn::config::Config;
use soft_teacher_loss::{BoxClassificationLossConfig, SoftTeacherLossConfig};

use super::enums::Network;
use crate::error::{SoftTeacherError, SoftTeacherResult};

/// Configuration of one semi-supervised Faster R-CNN experiment.
///
/// Resolved once from the command line or a JSON file and passed by
/// reference to everything that needs it.
#[derive(Config, Debug)]
pub struct ExperimentConfig {
    /// Number of images per training step.
    #[config(default = 2)]
    pub batch_size: usize,

    /// Feature extractor of the detector.
    #[config(default = "Network::Resnet50")]
    pub backbone: Network,

    /// Shorter image side after resizing.
    #[config(default = 800)]
    pub min_image_size: usize,

    /// Upper bound on the longer image side after resizing.
    #[config(default = 1066)]
    pub max_image_size: usize,

    /// Keep the backbone weights fixed during training.
    #[config(default = false)]
    pub freeze_backbone: bool,

    /// Classification loss applied to ground-truth labeled boxes.
    #[config(default = "BoxClassificationLossConfig::new()")]
    pub classification_loss: BoxClassificationLossConfig,

    /// Semi-supervised classification loss settings.
    #[config(default = "SoftTeacherLossConfig::new()")]
    pub soft_teacher: SoftTeacherLossConfig,

    /// Number of passes over the training data.
    #[config(default = 40)]
    pub max_epochs: usize,

    /// Directory receiving training logs.
    #[config(default = "\"logs\".to_string()")]
    pub log_directory: String,
}

impl ExperimentConfig {
    /// Reads a configuration from a JSON file and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> SoftTeacherResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| SoftTeacherError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|source| SoftTeacherError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn write_to(&self, path: impl AsRef<Path>) -> SoftTeacherResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| SoftTeacherError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| SoftTeacherError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Name under which the experiment is logged, e.g. `faster_rcnn#1a2b3c4`.
    pub fn experiment_name(&self, revision: &str) -> String {
        format!("faster_rcnn#{revision}")
    }

    /// Validates the configuration.
    ///
    /// Checks every value the loss constructors would otherwise assert on, so
    /// that a bad file is reported as an error instead of a panic.
    ///
    /// # Errors
    ///
    /// Returns `Err(SoftTeacherError::InvalidConfiguration)` if any validation rule is violated.
    pub fn validate(&self) -> SoftTeacherResult<()> {
        if self.batch_size == 0 {
            return Err(SoftTeacherError::InvalidConfiguration {
                reason: "batch_size must be at least 1".to_owned(),
            });
        }

        if self.min_image_size == 0 || self.min_image_size > self.max_image_size {
            return Err(SoftTeacherError::InvalidConfiguration {
                reason: format!(
                    "image sizes must satisfy 0 < min_image_size <= max_image_size, got {} and {}",
                    self.min_image_size, self.max_image_size
                ),
            });
        }

        if self.max_epochs == 0 {
            return Err(SoftTeacherError::InvalidConfiguration {
                reason: "max_epochs must be at least 1".to_owned(),
            });
        }

        let soft_teacher = &self.soft_teacher;
        if !soft_teacher.unsupervised_loss_weight.is_finite()
            || soft_teacher.unsupervised_loss_weight < 0.0
        {
            return Err(SoftTeacherError::InvalidConfiguration {
                reason: format!(
                    "unsupervised_loss_weight must be finite and non-negative, got {}",
                    soft_teacher.unsupervised_loss_weight
                ),
            });
        }

        if !(0.0..=1.0).contains(&soft_teacher.foreground_threshold) {
            return Err(SoftTeacherError::InvalidConfiguration {
                reason: format!(
                    "foreground_threshold must be in [0, 1], got {}",
                    soft_teacher.foreground_threshold
                ),
            });
        }

        if !soft_teacher.epsilon.is_finite() || soft_teacher.epsilon <= 0.0 {
            return Err(SoftTeacherError::InvalidConfiguration {
                reason: format!(
                    "epsilon must be finite and positive, got {}",
                    soft_teacher.epsilon
                ),
            });
        }

        let focal = &self.classification_loss.focal;
        if !focal.gamma.is_finite()
            || focal.gamma < 0.0
            || !focal.alpha.is_finite()
            || focal.alpha <= 0.0
        {
            return Err(SoftTeacherError::InvalidConfiguration {
                reason: format!(
                    "focal loss needs gamma >= 0 and alpha > 0, got gamma {} and alpha {}",
                    focal.gamma, focal.alpha
                ),
            });
        }

        Ok(())
    }

    /// Emits the resolved configuration as one structured log line.
    pub fn log_start(&self, experiment_name: &str) {
        tracing::info!(
            experiment = experiment_name,
            batch_size = self.batch_size,
            backbone = %self.backbone,
            min_image_size = self.min_image_size,
            max_image_size = self.max_image_size,
            freeze_backbone = self.freeze_backbone,
            classification_loss = %self.classification_loss.kind,
            unsupervised_loss_weight = self.soft_teacher.unsupervised_loss_weight,
            foreground_threshold = self.soft_teacher.foreground_threshold,
            uncertain_foreground_as_background =
                self.soft_teacher.uncertain_foreground_as_background,
            reliability_mean_reduction = self.soft_teacher.reliability_mean_reduction,
            max_epochs = self.max_epochs,
            log_directory = %self.log_directory,
            "Starting experiment with"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        time::{SystemTime, UNIX_EPOCH},
    };

    use soft_teacher_loss::ClassificationLossKind;

    use super::*;

    fn unique_temp_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        dir.push(format!("soft_teacher_config_{nanos}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn defaults_follow_training_script() {
        let config = ExperimentConfig::new();

        assert_eq!(config.batch_size, 2);
        assert_eq!(config.backbone, Network::Resnet50);
        assert_eq!(config.min_image_size, 800);
        assert_eq!(config.max_image_size, 1066);
        assert!(!config.freeze_backbone);
        assert_eq!(
            config.classification_loss.kind,
            ClassificationLossKind::CrossEntropy
        );
        assert_eq!(config.soft_teacher.unsupervised_loss_weight, 1.0);
        assert_eq!(config.soft_teacher.foreground_threshold, 0.9);
        assert!(!config.soft_teacher.reliability_mean_reduction);
        assert_eq!(config.max_epochs, 40);
        assert_eq!(config.log_directory, "logs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn experiment_name_contains_revision() {
        assert_eq!(
            ExperimentConfig::new().experiment_name("1a2b3c4"),
            "faster_rcnn#1a2b3c4"
        );
    }

    #[test]
    fn json_file_round_trip() {
        let dir = unique_temp_dir();
        let path = dir.join("experiment.json");
        let config = ExperimentConfig::new()
            .with_batch_size(4)
            .with_backbone(Network::MobileNetV3)
            .with_freeze_backbone(true)
            .with_classification_loss(
                BoxClassificationLossConfig::new().with_kind(ClassificationLossKind::Focal),
            )
            .with_soft_teacher(
                SoftTeacherLossConfig::new()
                    .with_unsupervised_loss_weight(0.5)
                    .with_reliability_mean_reduction(true),
            );

        config.write_to(&path).unwrap();
        let loaded = ExperimentConfig::from_file(&path).unwrap();

        assert_eq!(loaded.batch_size, 4);
        assert_eq!(loaded.backbone, Network::MobileNetV3);
        assert!(loaded.freeze_backbone);
        assert_eq!(loaded.classification_loss.kind, ClassificationLossKind::Focal);
        assert_eq!(loaded.soft_teacher.unsupervised_loss_weight, 0.5);
        assert!(loaded.soft_teacher.reliability_mean_reduction);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = unique_temp_dir().join("missing.json");

        let error = ExperimentConfig::from_file(&path).unwrap_err();

        assert!(matches!(error, SoftTeacherError::Io { .. }));
    }

    #[test]
    fn malformed_file_is_json_error() {
        let dir = unique_temp_dir();
        let path = dir.join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let error = ExperimentConfig::from_file(&path).unwrap_err();

        assert!(matches!(error, SoftTeacherError::Json { .. }));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn inverted_image_sizes_are_rejected() {
        let config = ExperimentConfig::new()
            .with_min_image_size(1200)
            .with_max_image_size(1000);

        assert!(matches!(
            config.validate(),
            Err(SoftTeacherError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn loss_hyperparameters_are_validated() {
        let negative_weight = ExperimentConfig::new()
            .with_soft_teacher(SoftTeacherLossConfig::new().with_unsupervised_loss_weight(-1.0));
        let threshold_above_one = ExperimentConfig::new()
            .with_soft_teacher(SoftTeacherLossConfig::new().with_foreground_threshold(1.5));
        let zero_batch = ExperimentConfig::new().with_batch_size(0);

        for config in [negative_weight, threshold_above_one, zero_batch] {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
