use ndarray::{Ix2, linalg, prelude::*};
use rand::Rng;

use crate::{MlErr, Result, initialization};

/// A fully connected layer, `z = x · w + b`.
///
/// The weights are laid out as an `(input, output)` matrix followed by the biases.
#[derive(Clone)]
pub struct Dense {
    dim: (usize, usize),
    size: usize,

    // Forward metadata
    x: Option<Array2<f32>>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The `(input, output)` dimensions.
    pub fn new(dim: (usize, usize)) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            x: None,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn param_shapes(&self) -> Vec<(&'static str, Vec<usize>)> {
        vec![
            ("weight", vec![self.dim.0, self.dim.1]),
            ("bias", vec![self.dim.1]),
        ]
    }

    pub fn init_params<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        initialization::fan_in_uniform(rng, self.dim.0, self.size)
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let ndim = x.ndim();
        let x = x.into_dimensionality::<Ix2>().map_err(|_| MlErr::Rank {
            layer: "dense",
            got: ndim,
            expected: 2,
        })?;

        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input features",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;
        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        self.x = Some(x);
        Ok(z.into_dyn())
    }

    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let x = self.x.as_ref().ok_or(MlErr::NoForwardPass("dense"))?;
        let d = d.into_dimensionality::<Ix2>()?;

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(params)?;
        let mut dx = Array2::zeros((d.nrows(), self.dim.0));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut dx);

        Ok(dx.into_dyn())
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(&self, grad: &'a mut [f32]) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w_size = self.size - self.dim.1;
        let (w_raw, b_raw) = params.split_at(w_size);
        let weights = ArrayView2::from_shape(self.dim, w_raw)?;
        let biases = ArrayView1::from_shape(self.dim.1, b_raw)?;
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_is_affine() {
        let mut dense = Dense::new((2, 1));
        let params = [2.0, 3.0, 1.0];
        let x = array![[1.0, 1.0], [0.0, 2.0]].into_dyn();

        let z = dense.forward(&params, x).unwrap();
        assert_eq!(z, array![[6.0], [7.0]].into_dyn());
    }

    #[test]
    fn backward_accumulates_gradients() {
        let mut dense = Dense::new((2, 1));
        let params = [2.0, 3.0, 1.0];
        let x = array![[1.0, 1.0], [0.0, 2.0]].into_dyn();
        let mut grad = [0.0; 3];

        dense.forward(&params, x.clone()).unwrap();
        let d = array![[1.0], [1.0]].into_dyn();
        let dx = dense.backward(&params, &mut grad, d.clone()).unwrap();

        assert_eq!(grad, [1.0, 3.0, 2.0]);
        assert_eq!(dx, array![[2.0, 3.0], [2.0, 3.0]].into_dyn());

        dense.forward(&params, x).unwrap();
        dense.backward(&params, &mut grad, d).unwrap();
        assert_eq!(grad, [2.0, 6.0, 4.0]);
    }

    #[test]
    fn wrong_rank_is_rejected() {
        let mut dense = Dense::new((2, 1));
        let params = [0.0; 3];
        let x = ArrayD::zeros(IxDyn(&[1, 1, 2]));
        assert!(matches!(
            dense.forward(&params, x),
            Err(MlErr::Rank { expected: 2, .. })
        ));
    }
}
