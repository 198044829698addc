use super::{Optimizer, optimizer::check_sizes};
use crate::Result;

/// Gradient descent optimization algorithm.
#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    /// Updates the parameters according to the algorithm's learning rule, that is, making a step in
    /// the opposite direction of the gradient, with a length of `learning_rate`.
    ///
    /// # Arguments
    /// * `grad` - The gradient used for taking the step.
    /// * `params` - The parameters that are going to be modified.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params, None)?;

        let lr = self.learning_rate;
        for (w, g) in params.iter_mut().zip(grad) {
            *w -= lr * g;
        }

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    fn state_len(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MlErr;

    #[test]
    fn steps_against_the_gradient() {
        let mut gd = GradientDescent::new(0.5);
        let mut params = [1.0, -1.0];
        gd.update_params(&[2.0, -4.0], &mut params).unwrap();
        assert_eq!(params, [0.0, 1.0]);
    }

    #[test]
    fn rejects_size_mismatch() {
        let mut gd = GradientDescent::new(0.5);
        let err = gd.update_params(&[1.0], &mut [0.0, 0.0]);
        assert!(matches!(err, Err(MlErr::SizeMismatch { .. })));
    }
}
