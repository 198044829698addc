use std::ops::Range;

use machine_learning::{arch::Model, optimization::Optimizer};

use super::{DistErr, ShardedDataParallel, partition};
use crate::error::Result;

/// Optimizer state sharding.
///
/// Every rank owns a contiguous partition of the flat parameter vector and only keeps base
/// optimizer state for it. A step reduces the gradient onto the owners, lets each owner update
/// its partition and then gathers the updated partitions on every rank.
pub struct Oss<O> {
    optim: O,
    partitions: Vec<Range<usize>>,
    rank: usize,
}

impl<O: Optimizer> Oss<O> {
    /// Creates a new `Oss`.
    ///
    /// # Arguments
    /// * `num_params` - The length of the flat parameter vector.
    /// * `rank` - This process' rank.
    /// * `world_size` - The amount of ranks sharing the optimizer state.
    /// * `factory` - Builds the base optimizer for a partition of the given length.
    ///
    /// # Returns
    /// A new `Oss` instance, or an error if `rank` is out of range.
    pub fn new<F>(num_params: usize, rank: usize, world_size: usize, factory: F) -> Result<Self>
    where
        F: FnOnce(usize) -> O,
    {
        let partitions = partition::partitions(num_params, world_size)?;
        let own = partitions
            .get(rank)
            .ok_or(DistErr::InvalidRank { rank, world_size })?;
        let optim = factory(own.len());

        Ok(Self {
            optim,
            partitions,
            rank,
        })
    }

    /// Runs one optimization step.
    ///
    /// # Arguments
    /// * `ddp` - The replica to optimize.
    /// * `closure` - Clears the gradient, runs forward and backward and returns the loss.
    ///
    /// # Returns
    /// The loss returned by `closure`.
    pub async fn step<M, F>(&mut self, ddp: &mut ShardedDataParallel<M>, closure: F) -> Result<f32>
    where
        M: Model,
        F: FnOnce(&mut ShardedDataParallel<M>) -> Result<f32>,
    {
        let loss = closure(ddp)?;
        ddp.reduce_gradients(&self.partitions).await?;

        let own = self.partition();
        let (params, grad) = ddp.params_and_grad_mut();
        self.optim.update_params(&grad[own.clone()], &mut params[own])?;

        ddp.sync_params(&self.partitions).await?;
        Ok(loss)
    }

    pub fn partitions(&self) -> &[Range<usize>] {
        &self.partitions
    }

    /// The range of the flat parameter vector this rank owns.
    pub fn partition(&self) -> Range<usize> {
        self.partitions[self.rank].clone()
    }

    pub fn learning_rate(&self) -> f32 {
        self.optim.learning_rate()
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.optim.set_learning_rate(learning_rate);
    }

    /// The amount of parameters the local base optimizer keeps state for.
    pub fn state_len(&self) -> usize {
        self.optim.state_len()
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::optimization::{Adadelta, GradientDescent};

    use super::*;

    #[test]
    fn base_optimizer_only_covers_own_partition() {
        let sizes: Vec<_> = (0..3)
            .map(|rank| {
                let oss = Oss::new(10, rank, 3, |len| Adadelta::with_defaults(len, 1.0)).unwrap();
                assert_eq!(oss.state_len(), oss.partition().len());
                oss.state_len()
            })
            .collect();

        assert_eq!(sizes, [4, 3, 3]);
    }

    #[test]
    fn rejects_rank_outside_world() {
        assert!(Oss::new(10, 2, 2, |_| GradientDescent::new(0.1)).is_err());
    }

    #[test]
    fn learning_rate_reaches_base_optimizer() {
        let mut oss = Oss::new(4, 0, 1, |_| GradientDescent::new(1.0)).unwrap();
        oss.set_learning_rate(0.25);
        assert_eq!(oss.learning_rate(), 0.25);
    }
}
