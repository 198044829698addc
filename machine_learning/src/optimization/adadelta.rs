use super::{Optimizer, optimizer::check_sizes};
use crate::Result;

/// Adadelta: scales each step by the ratio between the running RMS of past updates and the
/// running RMS of past gradients, then by `learning_rate`.
#[derive(Debug)]
pub struct Adadelta {
    learning_rate: f32,
    rho: f32,
    epsilon: f32,
    square_avg: Box<[f32]>,
    acc_delta: Box<[f32]>,
}

impl Adadelta {
    /// Creates a new `Adadelta` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The coefficient applied to the computed delta.
    /// * `rho` - The decay of the running averages.
    /// * `epsilon` - Added inside the square roots for stability.
    ///
    /// # Returns
    /// A new `Adadelta` instance.
    pub fn new(len: usize, learning_rate: f32, rho: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            rho,
            epsilon,
            square_avg: vec![0.; len].into_boxed_slice(),
            acc_delta: vec![0.; len].into_boxed_slice(),
        }
    }

    /// Creates a new `Adadelta` optimizer with `rho = 0.9` and `epsilon = 1e-6`.
    pub fn with_defaults(len: usize, learning_rate: f32) -> Self {
        Self::new(len, learning_rate, 0.9, 1e-6)
    }
}

impl Optimizer for Adadelta {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params, Some(self.square_avg.len()))?;

        let Self {
            learning_rate: lr,
            rho,
            epsilon: eps,
            ..
        } = *self;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.square_avg.iter_mut())
            .zip(self.acc_delta.iter_mut())
            .for_each(|(((p, g), sq), acc)| {
                *sq = rho * *sq + (1. - rho) * g * g;
                let delta = ((*acc + eps).sqrt() / (*sq + eps).sqrt()) * g;
                *acc = rho * *acc + (1. - rho) * delta * delta;
                *p -= lr * delta;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_matches_closed_form() {
        let mut opt = Adadelta::with_defaults(1, 1.0);
        let mut params = [1.0];
        opt.update_params(&[2.0], &mut params).unwrap();

        // sq = 0.1 * 4, delta = sqrt(1e-6) / sqrt(0.4 + 1e-6) * 2
        let delta = (1e-6f32).sqrt() / (0.4f32 + 1e-6).sqrt() * 2.0;
        assert!((params[0] - (1.0 - delta)).abs() < 1e-6);
    }

    #[test]
    fn decreases_a_quadratic() {
        let mut opt = Adadelta::with_defaults(1, 1.0);
        let mut params = [3.0f32];

        for _ in 0..200 {
            let grad = [2.0 * params[0]];
            opt.update_params(&grad, &mut params).unwrap();
        }

        assert!(params[0] < 3.0);
        assert!(params[0] > 0.0);
    }

    #[test]
    fn state_len_matches_construction() {
        assert_eq!(Adadelta::with_defaults(5, 1.0).state_len(), 5);
    }
}
