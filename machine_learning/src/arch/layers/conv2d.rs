use ndarray::{Ix4, prelude::*};
use rand::Rng;
use rayon::prelude::*;

use crate::{MlErr, Result, initialization};

/// A 2D convolution without padding, lowered to a matrix product per sample (im2col).
///
/// The weights are laid out as `(out_channels, in_channels, kernel, kernel)`
/// followed by one bias per output channel.
#[derive(Clone)]
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    size: usize,

    // Forward metadata
    in_shape: (usize, usize, usize, usize),
    cols: Vec<Array2<f32>>,
}

impl Conv2d {
    /// Creates a new `Conv2d` layer.
    ///
    /// # Arguments
    /// * `in_channels` - The amount of channels of the input.
    /// * `out_channels` - The amount of filters, one output channel each.
    /// * `kernel` - The side of the square kernel.
    /// * `stride` - The step between two consecutive kernel applications.
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize, stride: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            stride: stride.max(1),
            size: out_channels * in_channels * kernel * kernel + out_channels,
            in_shape: (0, 0, 0, 0),
            cols: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn param_shapes(&self) -> Vec<(&'static str, Vec<usize>)> {
        let k = self.kernel;
        vec![
            ("weight", vec![self.out_channels, self.in_channels, k, k]),
            ("bias", vec![self.out_channels]),
        ]
    }

    pub fn init_params<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let fan_in = self.in_channels * self.kernel * self.kernel;
        initialization::fan_in_uniform(rng, fan_in, self.size)
    }

    /// The spatial size of the output for an input of side `side`.
    fn out_side(&self, side: usize) -> Result<usize> {
        if side < self.kernel {
            return Err(MlErr::SizeMismatch {
                what: "conv2d input side",
                got: side,
                expected: self.kernel,
            });
        }

        Ok((side - self.kernel) / self.stride + 1)
    }

    /// Convolves a `(batch, channels, height, width)` input.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of the model parameters.
    /// * `x` - The input batch.
    /// * `keep` - Whether to keep the unfolded input around for a backward pass.
    pub fn forward(&mut self, params: &[f32], x: ArrayD<f32>, keep: bool) -> Result<ArrayD<f32>> {
        let ndim = x.ndim();
        let x = x.into_dimensionality::<Ix4>().map_err(|_| MlErr::Rank {
            layer: "conv2d",
            got: ndim,
            expected: 4,
        })?;

        let (n, c, h, w) = x.dim();
        if c != self.in_channels {
            return Err(MlErr::SizeMismatch {
                what: "conv2d input channels",
                got: c,
                expected: self.in_channels,
            });
        }

        let (oh, ow) = (self.out_side(h)?, self.out_side(w)?);
        let (weights, biases) = self.view_params(params)?;
        let (k, stride) = (self.kernel, self.stride);

        let per_sample: Vec<(Option<Array2<f32>>, Array2<f32>)> = (0..n)
            .into_par_iter()
            .map(|i| {
                let cols = im2col(x.index_axis(Axis(0), i), k, stride, (oh, ow));
                let mut out = weights.dot(&cols);
                out += &biases.insert_axis(Axis(1));
                (keep.then_some(cols), out)
            })
            .collect();

        let mut y = Array4::zeros((n, self.out_channels, oh, ow));
        let mut cols = Vec::with_capacity(if keep { n } else { 0 });

        for (i, (sample_cols, out)) in per_sample.into_iter().enumerate() {
            let out = out.into_shape_with_order((self.out_channels, oh, ow))?;
            y.index_axis_mut(Axis(0), i).assign(&out);
            cols.extend(sample_cols);
        }

        self.in_shape = (n, c, h, w);
        self.cols = cols;
        Ok(y.into_dyn())
    }

    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        if self.cols.is_empty() {
            return Err(MlErr::NoForwardPass("conv2d"));
        }

        let d = d.into_dimensionality::<Ix4>()?;
        let (n, c, h, w) = self.in_shape;
        let (_, o, oh, ow) = d.dim();

        if d.dim().0 != n || o != self.out_channels {
            return Err(MlErr::SizeMismatch {
                what: "conv2d delta",
                got: d.len(),
                expected: n * self.out_channels * oh * ow,
            });
        }

        let (weights, _) = self.view_params(params)?;
        let (k, stride) = (self.kernel, self.stride);
        let cols = &self.cols;

        let per_sample: Vec<(Array2<f32>, Array1<f32>, Array3<f32>)> = (0..n)
            .into_par_iter()
            .map(|i| -> Result<(Array2<f32>, Array1<f32>, Array3<f32>)> {
                let dn = d.index_axis(Axis(0), i);
                let dn = dn.to_shape((o, oh * ow))?;
                let dw = dn.dot(&cols[i].t());
                let db = dn.sum_axis(Axis(1));
                let dcols = weights.t().dot(&dn);
                let dx = col2im(dcols.view(), (c, h, w), k, stride, (oh, ow));
                Ok((dw, db, dx))
            })
            .collect::<Result<_>>()?;

        let (mut dw_acc, mut db_acc) = self.view_grad(grad)?;
        let mut dx = Array4::zeros((n, c, h, w));

        for (i, (dw, db, dx_i)) in per_sample.into_iter().enumerate() {
            dw_acc += &dw;
            db_acc += &db;
            dx.index_axis_mut(Axis(0), i).assign(&dx_i);
        }

        Ok(dx.into_dyn())
    }

    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w_size = self.size - self.out_channels;
        let (w_raw, b_raw) = params.split_at(w_size);
        let weights = ArrayView2::from_shape((self.out_channels, w_size / self.out_channels), w_raw)?;
        let biases = ArrayView1::from_shape(self.out_channels, b_raw)?;
        Ok((weights, biases))
    }

    fn view_grad<'a>(&self, grad: &'a mut [f32]) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.size - self.out_channels;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape((self.out_channels, w_size / self.out_channels), dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.out_channels, db_raw)?;
        Ok((dw, db))
    }
}

/// Unfolds every kernel window of `x` into a column.
///
/// # Returns
/// A `(channels * k * k, oh * ow)` matrix.
fn im2col(x: ArrayView3<f32>, k: usize, stride: usize, (oh, ow): (usize, usize)) -> Array2<f32> {
    let c = x.dim().0;
    let mut cols = Array2::zeros((c * k * k, oh * ow));

    for ch in 0..c {
        for ki in 0..k {
            for kj in 0..k {
                let row = (ch * k + ki) * k + kj;
                for i in 0..oh {
                    for j in 0..ow {
                        cols[[row, i * ow + j]] = x[[ch, i * stride + ki, j * stride + kj]];
                    }
                }
            }
        }
    }

    cols
}

/// Folds columns back onto an image, adding overlapping contributions.
fn col2im(
    cols: ArrayView2<f32>,
    (c, h, w): (usize, usize, usize),
    k: usize,
    stride: usize,
    (oh, ow): (usize, usize),
) -> Array3<f32> {
    let mut x = Array3::zeros((c, h, w));

    for ch in 0..c {
        for ki in 0..k {
            for kj in 0..k {
                let row = (ch * k + ki) * k + kj;
                for i in 0..oh {
                    for j in 0..ow {
                        x[[ch, i * stride + ki, j * stride + kj]] += cols[[row, i * ow + j]];
                    }
                }
            }
        }
    }

    x
}
