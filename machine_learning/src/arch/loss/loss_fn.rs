use ndarray::{Array2, ArrayView2};

use crate::Result;

pub trait LossFn {
    /// Computes the loss of a batch of predictions against their target classes.
    fn loss(&self, y_pred: ArrayView2<f32>, targets: &[usize]) -> Result<f32>;

    /// Computes the derivative of `loss` with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, targets: &[usize]) -> Result<Array2<f32>>;
}
