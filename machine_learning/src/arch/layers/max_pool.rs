use ndarray::{Ix4, prelude::*};

use crate::{MlErr, Result};

/// Non-overlapping 2D max pooling over square windows.
#[derive(Clone)]
pub struct MaxPool2d {
    kernel: usize,

    // Forward metadata
    in_shape: (usize, usize, usize, usize),
    argmax: Option<Array4<(usize, usize)>>,
}

impl MaxPool2d {
    pub fn new(kernel: usize) -> Self {
        Self {
            kernel: kernel.max(1),
            in_shape: (0, 0, 0, 0),
            argmax: None,
        }
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let ndim = x.ndim();
        let x = x.into_dimensionality::<Ix4>().map_err(|_| MlErr::Rank {
            layer: "max_pool2d",
            got: ndim,
            expected: 4,
        })?;

        let k = self.kernel;
        let (n, c, h, w) = x.dim();
        let (oh, ow) = (h / k, w / k);

        let mut y = Array4::zeros((n, c, oh, ow));
        let mut argmax = Array4::from_elem((n, c, oh, ow), (0, 0));

        for ((b, ch, i, j), out) in y.indexed_iter_mut() {
            let mut best = f32::NEG_INFINITY;
            let mut at = (i * k, j * k);

            for di in 0..k {
                for dj in 0..k {
                    let (r, s) = (i * k + di, j * k + dj);
                    let v = x[[b, ch, r, s]];
                    if v > best {
                        best = v;
                        at = (r, s);
                    }
                }
            }

            *out = best;
            argmax[[b, ch, i, j]] = at;
        }

        self.in_shape = (n, c, h, w);
        self.argmax = Some(argmax);
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let argmax = self.argmax.as_ref().ok_or(MlErr::NoForwardPass("max_pool2d"))?;
        let d = d.into_dimensionality::<Ix4>()?;

        if d.dim() != argmax.dim() {
            return Err(MlErr::SizeMismatch {
                what: "max_pool2d delta",
                got: d.len(),
                expected: argmax.len(),
            });
        }

        let mut dx = Array4::zeros(self.in_shape);
        for ((b, ch, i, j), &(r, s)) in argmax.indexed_iter() {
            dx[[b, ch, r, s]] += d[[b, ch, i, j]];
        }

        Ok(dx.into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_window_maximum_and_routes_the_gradient_back() {
        let mut pool = MaxPool2d::new(2);
        let x = array![[[
            [1.0, 2.0, 0.0, 0.0],
            [4.0, 3.0, 0.0, 9.0],
            [0.0, 0.0, 5.0, 0.0],
            [0.0, 7.0, 0.0, 0.0]
        ]]]
        .into_dyn();

        let y = pool.forward(x).unwrap();
        assert_eq!(y, array![[[[4.0, 9.0], [7.0, 5.0]]]].into_dyn());

        let dx = pool.backward(ArrayD::ones(y.raw_dim())).unwrap();
        let expected = array![[[
            [0.0, 0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 1.0, 0.0, 0.0]
        ]]]
        .into_dyn();
        assert_eq!(dx, expected);
    }

    #[test]
    fn odd_sides_are_floored() {
        let mut pool = MaxPool2d::new(2);
        let y = pool.forward(ArrayD::zeros(IxDyn(&[1, 1, 5, 5]))).unwrap();
        assert_eq!(y.shape(), &[1, 1, 2, 2]);
    }
}
