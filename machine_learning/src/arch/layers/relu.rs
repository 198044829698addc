use ndarray::ArrayD;

use crate::{MlErr, Result};

/// Rectified linear unit, `max(0, x)`.
#[derive(Clone, Default)]
pub struct Relu {
    x: Option<ArrayD<f32>>,
}

impl Relu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> ArrayD<f32> {
        let y = x.mapv(|v| v.max(0.));
        self.x = Some(x);
        y
    }

    pub fn backward(&mut self, mut d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = self.x.as_ref().ok_or(MlErr::NoForwardPass("relu"))?;

        if x.shape() != d.shape() {
            return Err(MlErr::SizeMismatch {
                what: "relu delta",
                got: d.len(),
                expected: x.len(),
            });
        }

        d.zip_mut_with(x, |d, &x| {
            if x <= 0. {
                *d = 0.;
            }
        });

        Ok(d)
    }
}
