use ndarray::{Array2, ArrayView2};

use super::LossFn;
use crate::{MlErr, Result, arch::layers::log_softmax};

/// Cross entropy between the softmax of the logits and the target classes, averaged over the
/// batch.
///
/// Feeding it log-probabilities is fine too: `log_softmax` is idempotent, so this is then the
/// negative log likelihood.
#[derive(Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    /// Returns a new `CrossEntropy`.
    pub fn new() -> Self {
        Self
    }

    fn check(y_pred: &ArrayView2<f32>, targets: &[usize]) -> Result<()> {
        if y_pred.nrows() != targets.len() {
            return Err(MlErr::SizeMismatch {
                what: "batch targets",
                got: targets.len(),
                expected: y_pred.nrows(),
            });
        }

        let classes = y_pred.ncols();
        match targets.iter().find(|&&t| t >= classes) {
            Some(&target) => Err(MlErr::InvalidTarget { target, classes }),
            None => Ok(()),
        }
    }
}

impl LossFn for CrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, targets: &[usize]) -> Result<f32> {
        Self::check(&y_pred, targets)?;
        if targets.is_empty() {
            return Ok(0.0);
        }

        let logp = log_softmax(y_pred);
        let total: f32 = targets
            .iter()
            .enumerate()
            .map(|(i, &t)| -logp[(i, t)])
            .sum();

        Ok(total / targets.len() as f32)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, targets: &[usize]) -> Result<Array2<f32>> {
        Self::check(&y_pred, targets)?;

        let n = targets.len().max(1) as f32;
        let mut d = log_softmax(y_pred).mapv_into(f32::exp);
        for (i, &t) in targets.iter().enumerate() {
            d[(i, t)] -= 1.0;
        }

        d /= n;
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn uniform_logits_give_log_classes() {
        let y = Array2::zeros((2, 4));
        let loss = CrossEntropy.loss(y.view(), &[0, 3]).unwrap();
        assert!((loss - 4f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn gradient_rows_sum_to_zero() {
        let y = array![[1.0, 2.0, 0.5], [-1.0, 0.0, 3.0]];
        let d = CrossEntropy.loss_prime(y.view(), &[1, 0]).unwrap();

        for row in d.rows() {
            assert!(row.sum().abs() < 1e-6);
        }
        assert!(d[(1, 0)] < 0.0);
    }

    #[test]
    fn log_probabilities_give_nll() {
        let logp = log_softmax(array![[0.2, 1.7, -0.3]].view());
        let loss = CrossEntropy.loss(logp.view(), &[1]).unwrap();
        assert!((loss + logp[(0, 1)]).abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_range_target() {
        let y = Array2::zeros((1, 10));
        let err = CrossEntropy.loss(y.view(), &[10]);
        assert!(matches!(err, Err(MlErr::InvalidTarget { target: 10, classes: 10 })));
    }
}
