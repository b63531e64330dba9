//! Tensor and parameter types
//!
//! Provides the `Tensor` type used by every module in the crate (a row-major
//! `f32` array with shape validation) and `Parameter`, the learnable variant
//! carrying a `requires_grad` flag. Parameters are exclusively owned by the
//! module that declares them; copying one between modules goes through
//! [`Parameter::clone`], which preserves the flag.

use serde::{Deserialize, Serialize};

use crate::error::{InyectarError, Result};

/// N-dimensional row-major tensor of `f32` values
///
/// # Examples
///
/// ```
/// use inyectar::Tensor;
///
/// let t = Tensor::from_vec(vec![2, 3], vec![
///     1.0, 2.0, 3.0,
///     4.0, 5.0, 6.0,
/// ]).unwrap();
///
/// assert_eq!(t.shape(), &[2, 3]);
/// assert_eq!(t.size(), 6);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// Flattened data in row-major order
    data: Vec<f32>,
    /// Shape of the tensor
    shape: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor from a vector and shape
    ///
    /// # Arguments
    ///
    /// * `shape` - Dimensions of the tensor
    /// * `data` - Flattened data in row-major order
    ///
    /// # Errors
    ///
    /// Returns `Err` if the shape is empty, contains zero, or doesn't match
    /// the data length.
    pub fn from_vec(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        if shape.is_empty() {
            return Err(InyectarError::InvalidShape {
                reason: "Shape cannot be empty".to_string(),
            });
        }

        if shape.contains(&0) {
            return Err(InyectarError::InvalidShape {
                reason: "Shape dimensions cannot be zero".to_string(),
            });
        }

        let expected_size = shape.iter().product();
        if data.len() != expected_size {
            return Err(InyectarError::DataShapeMismatch {
                data_size: data.len(),
                shape: shape.clone(),
                expected: expected_size,
            });
        }

        Ok(Self { data, shape })
    }

    /// Create a tensor filled with zeros
    ///
    /// # Errors
    ///
    /// Returns `Err` if the shape is empty or contains zero.
    pub fn zeros(shape: Vec<usize>) -> Result<Self> {
        let size = shape.iter().product();
        Self::from_vec(shape, vec![0.0; size])
    }

    /// Get the shape of the tensor
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the number of dimensions
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get the total number of elements
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Get a reference to the underlying data
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Element-wise scale into a new tensor
    ///
    /// Used by injection policies that must rescale copied weights to
    /// compensate for a kernel's internal scaling convention.
    #[must_use]
    pub fn scale(&self, factor: f32) -> Self {
        Self {
            data: self.data.iter().map(|&x| x * factor).collect(),
            shape: self.shape.clone(),
        }
    }
}

/// A learnable tensor owned by a module
///
/// Wraps a [`Tensor`] with the `requires_grad` flag of the host framework's
/// parameter object. Injection preserves the flag: a frozen parameter on the
/// original stays frozen on the replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter values
    tensor: Tensor,
    /// Whether the parameter participates in gradient updates
    requires_grad: bool,
}

impl Parameter {
    /// Create a trainable parameter
    #[must_use]
    pub fn new(tensor: Tensor) -> Self {
        Self {
            tensor,
            requires_grad: true,
        }
    }

    /// Create a parameter with an explicit `requires_grad` flag
    #[must_use]
    pub fn with_requires_grad(tensor: Tensor, requires_grad: bool) -> Self {
        Self {
            tensor,
            requires_grad,
        }
    }

    /// Get the underlying tensor
    #[must_use]
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Get the parameter shape
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.tensor.shape()
    }

    /// Get the parameter values
    #[must_use]
    pub fn data(&self) -> &[f32] {
        self.tensor.data()
    }

    /// Whether the parameter participates in gradient updates
    #[must_use]
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Copy of this parameter with every value multiplied by `factor`
    ///
    /// Keeps the `requires_grad` flag of the source.
    #[must_use]
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            tensor: self.tensor.scale(factor),
            requires_grad: self.requires_grad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_creation() {
        let t = Tensor::from_vec(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.ndim(), 2);
        assert_eq!(t.size(), 6);
    }

    #[test]
    fn test_tensor_empty_shape_rejected() {
        let result = Tensor::from_vec(vec![], vec![1.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_tensor_zero_dim_rejected() {
        let result = Tensor::from_vec(vec![2, 0], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_tensor_size_mismatch_rejected() {
        let result = Tensor::from_vec(vec![2, 2], vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            result,
            Err(InyectarError::DataShapeMismatch { expected: 4, .. })
        ));
    }

    #[test]
    fn test_tensor_zeros() {
        let t = Tensor::zeros(vec![3, 4]).unwrap();
        assert_eq!(t.size(), 12);
        assert!(t.data().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_tensor_scale() {
        let t = Tensor::from_vec(vec![2], vec![1.5, -2.0]).unwrap();
        let scaled = t.scale(2.0);
        assert_eq!(scaled.data(), &[3.0, -4.0]);
        assert_eq!(t.data(), &[1.5, -2.0]);
    }

    #[test]
    fn test_parameter_defaults_trainable() {
        let p = Parameter::new(Tensor::zeros(vec![4]).unwrap());
        assert!(p.requires_grad());
    }

    #[test]
    fn test_parameter_frozen_stays_frozen_through_scale() {
        let p = Parameter::with_requires_grad(
            Tensor::from_vec(vec![2], vec![1.0, 2.0]).unwrap(),
            false,
        );
        let scaled = p.scaled(8.0);
        assert!(!scaled.requires_grad());
        assert_eq!(scaled.data(), &[8.0, 16.0]);
    }
}
