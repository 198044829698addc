use std::path::Path;

use safetensors::{
    SafeTensorError,
    tensor::{self, Dtype, TensorView},
};

use crate::{
    MlErr, Result,
    arch::{Model, ParamEntry},
};

impl From<SafeTensorError> for MlErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Checkpoint(value.to_string())
    }
}

/// Builds one safetensors view per named parameter tensor of the model.
fn views<'a>(layout: &[ParamEntry], params: &'a [f32]) -> Result<Vec<(String, TensorView<'a>)>> {
    layout
        .iter()
        .map(|entry| {
            let data = params.get(entry.range.clone()).ok_or(MlErr::SizeMismatch {
                what: "checkpoint parameters",
                got: params.len(),
                expected: entry.range.end,
            })?;

            let view = TensorView::new(Dtype::F32, entry.shape.clone(), bytemuck::cast_slice(data))?;
            Ok((entry.name.clone(), view))
        })
        .collect()
}

/// Writes the model's parameters to `path` in the safetensors format, one tensor per named
/// parameter (e.g. `conv1.weight`).
///
/// # Arguments
/// * `model` - The model describing the parameter layout.
/// * `params` - The model's flat parameters.
/// * `path` - Where to write the file.
pub fn save<M: Model>(model: &M, params: &[f32], path: &Path) -> Result<()> {
    let layout = model.param_layout();
    let views = views(&layout, params)?;
    let named = views.iter().map(|(name, view)| (name.as_str(), view));

    tensor::serialize_to_file(named, &None, path)?;
    Ok(())
}

/// Same as `save`, into an in-memory buffer.
pub fn to_bytes<M: Model>(model: &M, params: &[f32]) -> Result<Vec<u8>> {
    let layout = model.param_layout();
    let views = views(&layout, params)?;
    let named = views.iter().map(|(name, view)| (name.as_str(), view));

    Ok(tensor::serialize(named, &None)?)
}

#[cfg(test)]
mod tests {
    use safetensors::SafeTensors;

    use super::*;
    use crate::arch::{Sequential, layers::Layer};

    #[test]
    fn writes_every_named_tensor() {
        let model = Sequential::from_named([("fc", Layer::dense((3, 2)))]);
        let params: Vec<f32> = (0..model.size()).map(|i| i as f32).collect();

        let bytes = to_bytes(&model, &params).unwrap();
        let st = SafeTensors::deserialize(&bytes).unwrap();

        let weight = st.tensor("fc.weight").unwrap();
        assert_eq!(weight.shape(), [3, 2]);
        assert_eq!(weight.dtype(), Dtype::F32);

        let bias = st.tensor("fc.bias").unwrap();
        let bias: Vec<f32> = bias
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(bias, [6.0, 7.0]);
    }

    #[test]
    fn rejects_short_params() {
        let model = Sequential::from_named([("fc", Layer::dense((3, 2)))]);
        assert!(to_bytes(&model, &[0.0; 4]).is_err());
    }
}
