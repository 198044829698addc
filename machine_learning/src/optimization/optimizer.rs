use crate::{MlErr, Result};

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Updates the provided slice of parameters using the gradient.
    ///
    /// # Arguments
    /// * `grad` - The gradient corresponding to the `params` slice.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad`, `params` and the optimizer's state.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, learning_rate: f32);

    /// Returns the amount of parameters this optimizer keeps state for, zero if it is stateless.
    fn state_len(&self) -> usize;
}

impl<T: Optimizer + ?Sized> Optimizer for Box<T> {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        (**self).update_params(grad, params)
    }

    fn learning_rate(&self) -> f32 {
        (**self).learning_rate()
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        (**self).set_learning_rate(learning_rate)
    }

    fn state_len(&self) -> usize {
        (**self).state_len()
    }
}

/// Checks the gradient, the parameters and (if any) the optimizer state all have the same length.
pub(super) fn check_sizes(grad: &[f32], params: &[f32], state: Option<usize>) -> Result<()> {
    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "gradient and parameters",
            got: grad.len(),
            expected: params.len(),
        });
    }

    match state {
        Some(len) if len != params.len() => Err(MlErr::SizeMismatch {
            what: "optimizer state and parameters",
            got: params.len(),
            expected: len,
        }),
        _ => Ok(()),
    }
}
