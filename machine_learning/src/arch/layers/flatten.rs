use ndarray::{ArrayD, IxDyn};

use crate::{MlErr, Result};

/// Collapses every axis but the batch one.
#[derive(Clone, Default)]
pub struct Flatten {
    in_shape: Option<Vec<usize>>,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = x.shape().to_vec();
        let n = shape.first().copied().unwrap_or(1);
        let rest: usize = shape.iter().skip(1).product();

        let y = x.to_shape(IxDyn(&[n, rest]))?.into_owned();
        self.in_shape = Some(shape);
        Ok(y)
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let shape = self.in_shape.as_ref().ok_or(MlErr::NoForwardPass("flatten"))?;
        Ok(d.to_shape(IxDyn(shape))?.into_owned())
    }
}
