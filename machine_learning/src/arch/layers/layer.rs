use ndarray::ArrayD;
use rand::{Rng, rngs::StdRng};

use super::{Conv2d, Dense, Dropout, Dropout2d, Flatten, LogSoftmax, MaxPool2d, Relu};
use crate::Result;

#[derive(Clone)]
pub enum Layer {
    Conv2d(Conv2d),
    Dense(Dense),
    Dropout(Dropout),
    Dropout2d(Dropout2d),
    Flatten(Flatten),
    LogSoftmax(LogSoftmax),
    MaxPool2d(MaxPool2d),
    Relu(Relu),
}
use Layer::*;

impl Layer {
    pub fn conv2d(in_channels: usize, out_channels: usize, kernel: usize, stride: usize) -> Self {
        Self::Conv2d(super::Conv2d::new(in_channels, out_channels, kernel, stride))
    }

    pub fn dense(dim: (usize, usize)) -> Self {
        Self::Dense(super::Dense::new(dim))
    }

    pub fn dropout(p: f32) -> Self {
        Self::Dropout(super::Dropout::new(p))
    }

    pub fn dropout2d(p: f32) -> Self {
        Self::Dropout2d(super::Dropout2d::new(p))
    }

    pub fn flatten() -> Self {
        Self::Flatten(super::Flatten::new())
    }

    pub fn log_softmax() -> Self {
        Self::LogSoftmax(super::LogSoftmax::new())
    }

    pub fn max_pool2d(kernel: usize) -> Self {
        Self::MaxPool2d(super::MaxPool2d::new(kernel))
    }

    pub fn relu() -> Self {
        Self::Relu(super::Relu::new())
    }

    /// Returns the amount of parameters this layer reads from the model's flat slice.
    pub fn size(&self) -> usize {
        match self {
            Conv2d(l) => l.size(),
            Dense(l) => l.size(),
            _ => 0,
        }
    }

    /// The named parameter tensors of this layer, in the order they appear in its slice.
    pub fn param_shapes(&self) -> Vec<(&'static str, Vec<usize>)> {
        match self {
            Conv2d(l) => l.param_shapes(),
            Dense(l) => l.param_shapes(),
            _ => Vec::new(),
        }
    }

    pub fn init_params<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        match self {
            Conv2d(l) => l.init_params(rng),
            Dense(l) => l.init_params(rng),
            _ => Ok(Vec::new()),
        }
    }

    pub fn forward(
        &mut self,
        params: &[f32],
        x: ArrayD<f32>,
        training: bool,
        rng: &mut StdRng,
    ) -> Result<ArrayD<f32>> {
        match self {
            Conv2d(l) => l.forward(params, x, training),
            Dense(l) => l.forward(params, x),
            Dropout(l) => Ok(l.forward(x, training, rng)),
            Dropout2d(l) => l.forward(x, training, rng),
            Flatten(l) => l.forward(x),
            LogSoftmax(l) => l.forward(x),
            MaxPool2d(l) => l.forward(x),
            Relu(l) => Ok(l.forward(x)),
        }
    }

    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self {
            Conv2d(l) => l.backward(params, grad, d),
            Dense(l) => l.backward(params, grad, d),
            Dropout(l) => l.backward(d),
            Dropout2d(l) => l.backward(d),
            Flatten(l) => l.backward(d),
            LogSoftmax(l) => l.backward(d),
            MaxPool2d(l) => l.backward(d),
            Relu(l) => l.backward(d),
        }
    }
}
