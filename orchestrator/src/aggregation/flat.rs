use super::{Model, ModelHelper, ModelKind};
use crate::error::ReducerError;

const F32_SIZE: usize = size_of::<f32>();

/// Models stored as a bare little-endian `f32` array.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatF32Helper;

impl ModelHelper for FlatF32Helper {
    fn kind(&self) -> ModelKind {
        ModelKind::FlatF32
    }

    fn load(&self, blob: &[u8]) -> Result<Model, ReducerError> {
        if blob.len() % F32_SIZE != 0 {
            return Err(ReducerError::Format(format!(
                "flat model of {} bytes isn't a whole number of f32s",
                blob.len()
            )));
        }

        let values = blob
            .chunks_exact(F32_SIZE)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Model::flat(values))
    }

    fn save(&self, model: &Model) -> Result<Vec<u8>, ReducerError> {
        let values = model.tensors().iter().flat_map(|t| &t.values);
        Ok(values.flat_map(|v| v.to_le_bytes()).collect())
    }
}

/// Serializes `values` the way `FlatF32Helper` expects them.
pub fn flat_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_reads_saved_values() {
        let helper = FlatF32Helper;
        let model = helper.load(&flat_blob(&[0.5, -1.0, 2.0])).unwrap();

        assert_eq!(model, Model::flat(vec![0.5, -1.0, 2.0]));
        assert_eq!(helper.save(&model).unwrap(), flat_blob(&[0.5, -1.0, 2.0]));
    }

    #[test]
    fn test_blob_is_little_endian() {
        assert_eq!(flat_blob(&[1.0, -2.0]), [0, 0, 128, 63, 0, 0, 0, 192]);

        let model = FlatF32Helper.load(&[0, 0, 128, 63, 0, 0, 0, 192]).unwrap();
        assert_eq!(model, Model::flat(vec![1.0, -2.0]));
    }

    #[test]
    fn test_ragged_blob_is_a_format_error() {
        let err = FlatF32Helper.load(&[0, 0, 128, 63, 1]).unwrap_err();
        assert!(matches!(err, ReducerError::Format(_)));
    }
}
