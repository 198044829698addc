use ndarray::{Ix2, prelude::*};

use crate::{MlErr, Result};

/// Row-wise `log(softmax(x))`, numerically stabilized by the row maximum.
pub fn log_softmax(x: ArrayView2<f32>) -> Array2<f32> {
    let mut y = x.to_owned();

    for mut row in y.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let log_sum = row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
        row.mapv_inplace(|v| (v - max) - log_sum);
    }

    y
}

/// `LogSoftmax` over the class axis of a `(batch, classes)` input.
#[derive(Clone, Default)]
pub struct LogSoftmax {
    y: Option<Array2<f32>>,
}

impl LogSoftmax {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let ndim = x.ndim();
        let x = x.into_dimensionality::<Ix2>().map_err(|_| MlErr::Rank {
            layer: "log_softmax",
            got: ndim,
            expected: 2,
        })?;

        let y = log_softmax(x.view());
        self.y = Some(y.clone());
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let y = self.y.as_ref().ok_or(MlErr::NoForwardPass("log_softmax"))?;
        let mut d = d.into_dimensionality::<Ix2>()?;

        for (mut d_row, y_row) in d.rows_mut().into_iter().zip(y.rows()) {
            let total = d_row.sum();
            d_row.zip_mut_with(&y_row, |d, &y| *d -= y.exp() * total);
        }

        Ok(d.into_dyn())
    }
}
