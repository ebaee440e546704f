use ::safetensors::{Dtype, SafeTensors, tensor::TensorView};

use super::{Model, ModelHelper, ModelKind, Tensor};
use crate::error::ReducerError;

const F32_SIZE: usize = size_of::<f32>();

/// Models stored in the safetensors format, `f32` tensors only.
///
/// Tensors are kept sorted by name so two files with the same content always
/// load into the same layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsHelper;

fn format_err(e: impl std::fmt::Display) -> ReducerError {
    ReducerError::Format(e.to_string())
}

impl ModelHelper for SafetensorsHelper {
    fn kind(&self) -> ModelKind {
        ModelKind::Safetensors
    }

    fn load(&self, blob: &[u8]) -> Result<Model, ReducerError> {
        let file = SafeTensors::deserialize(blob).map_err(format_err)?;

        let mut names = file.names();
        names.sort();

        let mut tensors = Vec::with_capacity(names.len());
        for name in names {
            let view = file.tensor(name).map_err(format_err)?;
            if view.dtype() != Dtype::F32 {
                return Err(ReducerError::Format(format!(
                    "tensor {name} is {:?}, only F32 can be averaged",
                    view.dtype()
                )));
            }

            let values = view
                .data()
                .chunks_exact(F32_SIZE)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();

            tensors.push(Tensor::new(name.as_str(), view.shape().to_vec(), values));
        }

        Ok(Model::new(tensors))
    }

    fn save(&self, model: &Model) -> Result<Vec<u8>, ReducerError> {
        let buffers: Vec<Vec<u8>> = model
            .tensors()
            .iter()
            .map(|t| t.values.iter().flat_map(|v| v.to_le_bytes()).collect())
            .collect();

        let views = model
            .tensors()
            .iter()
            .zip(&buffers)
            .map(|(t, data)| {
                let view = TensorView::new(Dtype::F32, t.shape.clone(), data).map_err(format_err)?;
                Ok((t.name.clone(), view))
            })
            .collect::<Result<Vec<_>, ReducerError>>()?;

        ::safetensors::serialize(views, &None).map_err(format_err)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    fn model(scale: f32) -> Model {
        Model::new(vec![
            Tensor::new("dense.bias", vec![2], vec![scale, -scale]),
            Tensor::new("dense.weight", vec![2, 2], vec![scale; 4]),
        ])
    }

    #[test]
    fn test_saved_model_loads_back() {
        let helper = SafetensorsHelper;
        let blob = helper.save(&model(1.5)).unwrap();

        assert_eq!(helper.load(&blob).unwrap(), model(1.5));
    }

    #[test]
    fn test_average_of_two_files() {
        let helper = SafetensorsHelper;
        let mut running = helper.load(&helper.save(&model(1.0)).unwrap()).unwrap();
        let next = helper.load(&helper.save(&model(3.0)).unwrap()).unwrap();

        helper
            .increment_average(&mut running, &next, NonZeroUsize::new(2).unwrap())
            .unwrap();

        assert_eq!(running, model(2.0));
    }

    #[test]
    fn test_garbage_is_a_format_error() {
        let err = SafetensorsHelper.load(b"definitely not a header").unwrap_err();
        assert!(matches!(err, ReducerError::Format(_)));
    }
}
