use std::num::NonZeroUsize;

use crate::error::ReducerError;

/// One named block of parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl Tensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            values,
        }
    }
}

/// The in-memory representation of a model, an ordered list of tensors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Model {
    tensors: Vec<Tensor>,
}

impl Model {
    pub fn new(tensors: Vec<Tensor>) -> Self {
        Self { tensors }
    }

    /// A model made of a single flat tensor.
    pub fn flat(values: Vec<f32>) -> Self {
        let shape = vec![values.len()];
        Self::new(vec![Tensor::new("params", shape, values)])
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    /// Folds `next` into this running mean, `n` being the amount of models
    /// averaged once `next` is included.
    ///
    /// # Errors
    /// A `ReducerError::Format` if both models don't have the same layout,
    /// in which case `self` is left untouched.
    pub fn increment_average(&mut self, next: &Model, n: NonZeroUsize) -> Result<(), ReducerError> {
        self.check_layout(next)?;

        let n = n.get() as f32;
        for (tensor, other) in self.tensors.iter_mut().zip(&next.tensors) {
            tensor
                .values
                .iter_mut()
                .zip(&other.values)
                .for_each(|(w, x)| *w += (x - *w) / n);
        }

        Ok(())
    }

    fn check_layout(&self, other: &Model) -> Result<(), ReducerError> {
        if self.tensors.len() != other.tensors.len() {
            return Err(ReducerError::Format(format!(
                "expected {} tensors, got {}",
                self.tensors.len(),
                other.tensors.len()
            )));
        }

        for (a, b) in self.tensors.iter().zip(&other.tensors) {
            if a.name != b.name || a.shape != b.shape || a.values.len() != b.values.len() {
                return Err(ReducerError::Format(format!(
                    "tensor {}{:?} doesn't match {}{:?}",
                    a.name, a.shape, b.name, b.shape
                )));
            }
        }

        Ok(())
    }
}
