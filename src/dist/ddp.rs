use std::ops::Range;

use log::debug;
use machine_learning::arch::Model;
use ndarray::ArrayD;
use rand::Rng;

use super::ProcessGroup;
use crate::error::Result;

/// A model replica whose gradients are reduced across the process group.
///
/// Parameters and gradient live in flat buffers owned here; the wrapped model only describes how
/// to run forward and backward over them.
pub struct ShardedDataParallel<M> {
    model: M,
    params: Vec<f32>,
    grad: Vec<f32>,
    group: ProcessGroup,
}

impl<M: Model> ShardedDataParallel<M> {
    /// Wraps `model`, initializing its parameters on every rank and then overwriting them with
    /// rank 0's, so that all replicas start identical.
    ///
    /// # Arguments
    /// * `model` - The replica's architecture.
    /// * `group` - The process group to synchronize through.
    /// * `rng` - The generator used for the local initialization.
    pub async fn new<R: Rng>(model: M, mut group: ProcessGroup, rng: &mut R) -> Result<Self> {
        let mut params = model.init_params(rng)?;
        group.broadcast(&mut params).await?;
        debug!(rank = group.rank(); "broadcasted {} initial parameters", params.len());

        let grad = vec![0.0; params.len()];
        Ok(Self {
            model,
            params,
            grad,
            group,
        })
    }

    pub fn train(&mut self) {
        self.model.set_training(true);
    }

    pub fn eval(&mut self) {
        self.model.set_training(false);
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn forward(&mut self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        Ok(self.model.forward(&self.params, x)?)
    }

    /// Accumulates this rank's gradient for the last forward pass.
    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<()> {
        self.model.backward(&self.params, &mut self.grad, d)?;
        Ok(())
    }

    /// Sums the gradients of all ranks into each partition's owner and averages them over the
    /// world size. Only `grad[partitions[rank]]` is meaningful afterwards.
    pub async fn reduce_gradients(&mut self, partitions: &[Range<usize>]) -> Result<()> {
        self.group.reduce_scatter(&mut self.grad, partitions).await?;

        let scale = 1.0 / self.group.world_size() as f32;
        let own = partitions[self.group.rank()].clone();
        self.grad[own].iter_mut().for_each(|g| *g *= scale);

        Ok(())
    }

    /// Rebuilds the full parameter vector on every rank from each rank's own partition.
    pub async fn sync_params(&mut self, partitions: &[Range<usize>]) -> Result<()> {
        self.group.all_gather(&mut self.params, partitions).await?;
        Ok(())
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Splits the replica into its parameters, to update, and its gradient.
    pub fn params_and_grad_mut(&mut self) -> (&mut [f32], &[f32]) {
        (&mut self.params, &self.grad)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    pub fn group_mut(&mut self) -> &mut ProcessGroup {
        &mut self.group
    }

    /// Gives the process group back, dropping the replica.
    pub fn into_group(self) -> ProcessGroup {
        self.group
    }
}
