use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::{MlErr, Result};

/// Samples `n` values from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
///
/// This is the default initialization for both the weights and the biases of
/// convolutional and dense layers.
///
/// # Arguments
/// * `rng` - A random number generator.
/// * `fan_in` - The number of inputs that feed each output unit.
/// * `n` - The amount of values to generate.
///
/// # Returns
/// The sampled values, or an error if `fan_in` is zero.
pub fn fan_in_uniform<R: Rng + ?Sized>(rng: &mut R, fan_in: usize, n: usize) -> Result<Vec<f32>> {
    if fan_in == 0 {
        return Err(MlErr::Init("fan_in must be positive".to_string()));
    }

    let bound = 1. / (fan_in as f32).sqrt();
    let distribution = Uniform::new_inclusive(-bound, bound).map_err(|e| MlErr::Init(e.to_string()))?;

    Ok(distribution.sample_iter(rng).take(n).collect())
}
