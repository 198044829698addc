use super::{Optimizer, optimizer::check_sizes};
use crate::Result;

/// RMSprop: divides each gradient by the running RMS of past gradients.
#[derive(Debug)]
pub struct RmsProp {
    learning_rate: f32,
    alpha: f32,
    epsilon: f32,
    square_avg: Box<[f32]>,
}

impl RmsProp {
    /// Creates a new `RmsProp` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `alpha`, `epsilon` - Smoothing constant and stability term.
    ///
    /// # Returns
    /// A new `RmsProp` instance.
    pub fn new(len: usize, learning_rate: f32, alpha: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            alpha,
            epsilon,
            square_avg: vec![0.; len].into_boxed_slice(),
        }
    }

    /// Creates a new `RmsProp` optimizer with `alpha = 0.99` and `epsilon = 1e-8`.
    pub fn with_defaults(len: usize, learning_rate: f32) -> Self {
        Self::new(len, learning_rate, 0.99, 1e-8)
    }
}

impl Optimizer for RmsProp {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params, Some(self.square_avg.len()))?;

        let Self {
            learning_rate: lr,
            alpha,
            epsilon: eps,
            ..
        } = *self;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.square_avg.iter_mut())
            .for_each(|((p, g), sq)| {
                *sq = alpha * *sq + (1. - alpha) * g * g;
                *p -= lr * g / (sq.sqrt() + eps);
            });

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    fn state_len(&self) -> usize {
        self.square_avg.len()
    }
}
