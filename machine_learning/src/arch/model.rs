use std::ops::Range;

use ndarray::ArrayD;
use rand::Rng;

use crate::Result;

/// Where a named parameter tensor lives inside a model's flat parameter slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub range: Range<usize>,
}

pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Generates a fresh set of parameters for this model.
    ///
    /// # Arguments
    /// * `rng` - The random number generator to sample from.
    fn init_params<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>>;

    /// Describes every parameter tensor of the model, in flat order.
    fn param_layout(&self) -> Vec<ParamEntry>;

    /// Switches between training and evaluation behaviour (dropout).
    fn set_training(&mut self, training: bool);

    /// Computes the model's output for `x` and caches what the backward pass needs.
    ///
    /// # Arguments
    /// * `params` - The model's flat parameters.
    /// * `x` - A batch of inputs, the first axis being the batch.
    fn forward(&mut self, params: &[f32], x: ArrayD<f32>) -> Result<ArrayD<f32>>;

    /// Propagates `d`, the derivative of the loss with respect to the last output,
    /// back through the model. The parameter gradient is **accumulated** into `grad`.
    ///
    /// # Returns
    /// The derivative of the loss with respect to the input.
    fn backward(&mut self, params: &[f32], grad: &mut [f32], d: ArrayD<f32>) -> Result<ArrayD<f32>>;
}
