//! Batch - one unit of training data handed from the prefetch worker to the loop

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Metadata key every batch carries.
pub const SOURCE_ID_KEY: &str = "source_id";

/// Dense `f32` tensor with a row-major shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking that `data` fills `shape` exactly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Source`] if the element count does not match the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::Source(format!(
                "tensor shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional tensor over `data`.
    #[must_use]
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Tensor shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat element buffer.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Batch of input/target data plus metadata.
///
/// Owned by the prefetch worker until handed off through the channel, then
/// owned by the iteration loop for exactly one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    input: Tensor,
    target: Tensor,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl Batch {
    /// Create a batch tagged with the id of the source that produced it.
    #[must_use]
    pub fn new(input: Tensor, target: Tensor, source_id: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            SOURCE_ID_KEY.to_string(),
            serde_json::Value::String(source_id.into()),
        );
        Self {
            input,
            target,
            metadata,
        }
    }

    /// Attach an extra metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let key = key.into();
        if key != SOURCE_ID_KEY {
            self.metadata.insert(key, value);
        }
        self
    }

    /// Input tensor.
    #[must_use]
    pub const fn input(&self) -> &Tensor {
        &self.input
    }

    /// Target tensor.
    #[must_use]
    pub const fn target(&self) -> &Tensor {
        &self.target
    }

    /// Identifier of the source that produced this batch.
    #[must_use]
    pub fn source_id(&self) -> &str {
        self.metadata
            .get(SOURCE_ID_KEY)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
    }

    /// Full metadata map.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape_mismatch_rejected() {
        let result = Tensor::new(vec![2, 3], vec![0.0; 5]);
        assert!(matches!(result, Err(Error::Source(_))));
    }

    #[test]
    fn test_tensor_new() {
        let tensor = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(tensor.shape(), &[2, 2]);
        assert_eq!(tensor.len(), 4);
        assert!(!tensor.is_empty());
    }

    #[test]
    fn test_batch_source_id() {
        let batch = Batch::new(Tensor::from_vec(vec![1.0]), Tensor::from_vec(vec![0.0]), "kettle");
        assert_eq!(batch.source_id(), "kettle");
    }

    #[test]
    fn test_batch_metadata_cannot_override_source_id() {
        let batch = Batch::new(Tensor::from_vec(vec![1.0]), Tensor::from_vec(vec![0.0]), "a")
            .with_metadata(SOURCE_ID_KEY, serde_json::json!("b"))
            .with_metadata("fold", serde_json::json!("train"));
        assert_eq!(batch.source_id(), "a");
        assert_eq!(batch.metadata().get("fold"), Some(&serde_json::json!("train")));
    }
}
