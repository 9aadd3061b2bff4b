//! Host-side box batches.
//!
//! A [`BoxBatch`] holds the four per-box inputs of the semi-supervised
//! classification loss as plain vectors, so that batches can be read from
//! JSON, checked once, and then moved onto any backend.

use std::{fs, path::Path};

use burn::tensor::{backend::Backend, Bool, Int, Tensor, TensorData};
use serde::{Deserialize, Serialize};

use crate::error::{SoftTeacherError, SoftTeacherResult};

/// Per-box inputs of one training step, row `i` of every field describing box `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxBatch {
    /// Raw class scores, `[num_boxes][num_classes]`; class 0 is background.
    pub class_logits: Vec<Vec<f32>>,
    /// Ground-truth or pseudo class index of every box.
    pub labels: Vec<i64>,
    /// Teacher's background confidence for every box.
    pub teacher_background_scores: Vec<f32>,
    /// Whether the label came from the teacher.
    pub is_pseudo: Vec<bool>,
}

/// Tensors built from a [`BoxBatch`].
#[derive(Debug, Clone)]
pub struct BoxBatchTensors<B: Backend> {
    /// `[num_boxes, num_classes]`
    pub class_logits: Tensor<B, 2>,
    /// `[num_boxes]`
    pub labels: Tensor<B, 1, Int>,
    /// `[num_boxes]`
    pub teacher_background_scores: Tensor<B, 1>,
    /// `[num_boxes]`
    pub is_pseudo: Tensor<B, 1, Bool>,
}

impl BoxBatch {
    /// Reads a batch from a JSON file and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> SoftTeacherResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| SoftTeacherError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let batch: Self =
            serde_json::from_str(&contents).map_err(|source| SoftTeacherError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        batch.validate()?;
        Ok(batch)
    }

    /// Number of boxes.
    pub fn num_boxes(&self) -> usize {
        self.labels.len()
    }

    /// Number of classes, background included; `None` for an empty batch.
    pub fn num_classes(&self) -> Option<usize> {
        self.class_logits.first().map(Vec::len)
    }

    /// Checks the per-box input contract.
    ///
    /// An empty batch is valid and evaluates to a zero loss.
    ///
    /// # Errors
    ///
    /// Returns `Err(SoftTeacherError::InvalidBatch)` when field lengths differ, logit
    /// rows are ragged or have fewer than two classes, a label is out of range, a
    /// logit is not finite, or a teacher score is negative or not finite.
    pub fn validate(&self) -> SoftTeacherResult<()> {
        let num_boxes = self.num_boxes();
        let lengths = [
            ("class_logits", self.class_logits.len()),
            ("teacher_background_scores", self.teacher_background_scores.len()),
            ("is_pseudo", self.is_pseudo.len()),
        ];
        for (field, len) in lengths {
            if len != num_boxes {
                return Err(invalid(format!(
                    "{field} has {len} entries but labels has {num_boxes}"
                )));
            }
        }

        let Some(num_classes) = self.num_classes() else {
            return Ok(());
        };
        if num_classes < 2 {
            return Err(invalid(format!(
                "at least two classes are required, got {num_classes}"
            )));
        }

        for (index, row) in self.class_logits.iter().enumerate() {
            if row.len() != num_classes {
                return Err(invalid(format!(
                    "box {index} has {} logits, expected {num_classes}",
                    row.len()
                )));
            }
            if row.iter().any(|logit| !logit.is_finite()) {
                return Err(invalid(format!("box {index} has a non-finite logit")));
            }
        }

        for (index, &label) in self.labels.iter().enumerate() {
            if label < 0 || label as usize >= num_classes {
                return Err(invalid(format!(
                    "box {index} has label {label} outside [0, {num_classes})"
                )));
            }
        }

        for (index, &score) in self.teacher_background_scores.iter().enumerate() {
            if !score.is_finite() || score < 0.0 {
                return Err(invalid(format!(
                    "box {index} has teacher background score {score}, expected a finite non-negative value"
                )));
            }
        }

        Ok(())
    }

    /// Moves the batch onto `device`.
    ///
    /// An empty batch becomes tensors with zero rows and two classes.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> BoxBatchTensors<B> {
        let num_boxes = self.num_boxes();
        let num_classes = self.num_classes().unwrap_or(2);
        let logits: Vec<f32> = self.class_logits.iter().flatten().copied().collect();

        BoxBatchTensors {
            class_logits: Tensor::from_data(
                TensorData::new(logits, [num_boxes, num_classes]),
                device,
            ),
            labels: Tensor::from_data(TensorData::new(self.labels.clone(), [num_boxes]), device),
            teacher_background_scores: Tensor::from_data(
                TensorData::new(self.teacher_background_scores.clone(), [num_boxes]),
                device,
            ),
            is_pseudo: Tensor::from_data(
                TensorData::new(self.is_pseudo.clone(), [num_boxes]),
                device,
            ),
        }
    }
}

fn invalid(reason: String) -> SoftTeacherError {
    SoftTeacherError::InvalidBatch { reason }
}
