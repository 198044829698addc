use ndarray::prelude::*;
use rand::{Rng, rngs::StdRng};

use crate::{MlErr, Result};

/// Draws the keep mask value for one unit: `0` when dropped, `1 / (1 - p)` otherwise.
fn keep_scale(rng: &mut StdRng, p: f32) -> f32 {
    if p <= 0. {
        return 1.;
    }

    if p >= 1. || rng.random::<f32>() < p {
        0.
    } else {
        1. / (1. - p)
    }
}

/// Zeroes single activations with probability `p` while training.
#[derive(Clone)]
pub struct Dropout {
    p: f32,
    mask: Option<ArrayD<f32>>,
}

impl Dropout {
    pub fn new(p: f32) -> Self {
        Self { p, mask: None }
    }

    pub fn forward(&mut self, x: ArrayD<f32>, training: bool, rng: &mut StdRng) -> ArrayD<f32> {
        if !training {
            self.mask = None;
            return x;
        }

        let mask = x.map(|_| keep_scale(rng, self.p));
        let y = &x * &mask;
        self.mask = Some(mask);
        y
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        match &self.mask {
            Some(mask) if mask.shape() != d.shape() => Err(MlErr::SizeMismatch {
                what: "dropout delta",
                got: d.len(),
                expected: mask.len(),
            }),
            Some(mask) => Ok(d * mask),
            None => Ok(d),
        }
    }
}

/// Zeroes entire channels of a `(batch, channels, h, w)` input with probability `p`
/// while training.
#[derive(Clone)]
pub struct Dropout2d {
    p: f32,
    mask: Option<Array2<f32>>,
}

impl Dropout2d {
    pub fn new(p: f32) -> Self {
        Self { p, mask: None }
    }

    pub fn forward(&mut self, mut x: ArrayD<f32>, training: bool, rng: &mut StdRng) -> Result<ArrayD<f32>> {
        if x.ndim() != 4 {
            return Err(MlErr::Rank {
                layer: "dropout2d",
                got: x.ndim(),
                expected: 4,
            });
        }

        if !training {
            self.mask = None;
            return Ok(x);
        }

        let (n, c) = (x.shape()[0], x.shape()[1]);
        let mask = Array2::from_shape_simple_fn((n, c), || keep_scale(rng, self.p));
        apply_channel_mask(&mut x, &mask);

        self.mask = Some(mask);
        Ok(x)
    }

    pub fn backward(&mut self, mut d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let Some(mask) = &self.mask else {
            return Ok(d);
        };

        if d.ndim() != 4 || d.shape()[..2] != *mask.shape() {
            return Err(MlErr::SizeMismatch {
                what: "dropout2d delta",
                got: d.len(),
                expected: mask.len(),
            });
        }

        apply_channel_mask(&mut d, mask);
        Ok(d)
    }
}

fn apply_channel_mask(x: &mut ArrayD<f32>, mask: &Array2<f32>) {
    for ((b, ch), &m) in mask.indexed_iter() {
        x.index_axis_mut(Axis(0), b)
            .index_axis_mut(Axis(0), ch)
            .mapv_inplace(|v| v * m);
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn eval_mode_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let x = ArrayD::from_elem(IxDyn(&[2, 3]), 1.5);

        let mut dropout = Dropout::new(0.5);
        assert_eq!(dropout.forward(x.clone(), false, &mut rng), x);

        let x = ArrayD::from_elem(IxDyn(&[2, 3, 2, 2]), 1.5);
        let mut dropout = Dropout2d::new(0.5);
        assert_eq!(dropout.forward(x.clone(), false, &mut rng).unwrap(), x);
    }

    #[test]
    fn kept_units_are_rescaled() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut dropout = Dropout::new(0.5);
        let y = dropout.forward(ArrayD::ones(IxDyn(&[64, 64])), true, &mut rng);

        assert!(y.iter().all(|&v| v == 0. || v == 2.));
        let kept = y.iter().filter(|&&v| v == 2.).count();
        assert!(kept > 1500 && kept < 2600, "kept {kept}");
    }

    #[test]
    fn channel_dropout_zeroes_whole_channels() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut dropout = Dropout2d::new(0.5);
        let y = dropout
            .forward(ArrayD::ones(IxDyn(&[4, 16, 3, 3])), true, &mut rng)
            .unwrap();

        for b in 0..4 {
            for ch in 0..16 {
                let channel = y.index_axis(Axis(0), b).index_axis(Axis(0), ch).to_owned();
                let first = channel[[0, 0]];
                assert!(channel.iter().all(|&v| v == first));
            }
        }

        let d = dropout.backward(ArrayD::ones(IxDyn(&[4, 16, 3, 3]))).unwrap();
        assert_eq!(d, y);
    }
}
