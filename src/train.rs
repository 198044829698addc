use std::{
    path::Path,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use machine_learning::{
    MlErr, checkpoint,
    arch::{
        Model,
        loss::{CrossEntropy, LossFn},
    },
    optimization::Optimizer,
};
use ndarray::{ArrayView1, Ix2};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    config::TrainArgs,
    data::{self, Batch, DataLoader, DistributedSampler, MnistDataset, Split},
    dist::{Oss, ProcessGroup, ShardedDataParallel, partition},
    error::Result,
    model,
};

/// The only backend compiled in.
pub const BACKEND: &str = "tcp";

/// Where rank 0 writes the trained parameters with `--save_model`.
pub const CHECKPOINT_FILE: &str = "mnist_cnn.safetensors";

/// Test set metrics, summed over every rank's shard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    pub loss: f32,
    pub correct: usize,
    pub total: usize,
}

impl EvalReport {
    pub fn accuracy(&self) -> f32 {
        self.correct as f32 / self.total.max(1) as f32
    }
}

/// What a rank did during its run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub rank: usize,
    /// Monotonic wall-clock time spent in the training batches, evaluation excluded.
    pub elapsed: Duration,
    pub steps: usize,
    pub last_loss: Option<f32>,
    pub evaluations: Vec<EvalReport>,
    /// The final parameters of this rank's replica.
    pub params: Vec<f32>,
}

/// Runs one rank of the distributed training: joins the process group, fetches MNIST and fits
/// the network on this rank's shard.
///
/// # Arguments
/// * `rank` - This process' rank.
/// * `args` - The training settings.
/// * `use_cuda` - Whether a CUDA device was requested and found.
pub async fn train(rank: usize, args: &TrainArgs, use_cuda: bool) -> Result<TrainReport> {
    println!("Using backend: {BACKEND}");
    if use_cuda {
        warn!(rank = rank; "no CUDA backend is compiled in, training on the CPU");
    }

    let mut group = ProcessGroup::init(&args.init_method, rank, args.world_size).await?;

    let (train_set, test_set) = match fetch_datasets(&mut group, &args.data_dir).await {
        Ok(sets) => sets,
        Err(e) => {
            group.abort(&e.to_string()).await;
            return Err(e);
        }
    };

    fit(group, &train_set, &test_set, args).await
}

/// Rank 0 downloads whatever is missing, then every rank parses both splits.
async fn fetch_datasets(group: &mut ProcessGroup, data_dir: &Path) -> Result<(MnistDataset, MnistDataset)> {
    let raw_dir = data::mnist::raw_dir(data_dir);

    if group.is_root() && !data::is_complete(&raw_dir) {
        data::ensure_downloaded(data_dir).await?;
    }
    group.barrier().await?;

    let train_set = MnistDataset::load(&raw_dir, Split::Train)?;
    let test_set = MnistDataset::load(&raw_dir, Split::Test)?;
    debug!(rank = group.rank(); "loaded {} train and {} test images", train_set.len(), test_set.len());

    Ok((train_set, test_set))
}

/// Trains the network on `train_set` over an already joined process group, evaluating on
/// `test_set` after every epoch.
///
/// # Returns
/// The run's report, once every rank left the group.
pub async fn fit(
    group: ProcessGroup,
    train_set: &MnistDataset,
    test_set: &MnistDataset,
    args: &TrainArgs,
) -> Result<TrainReport> {
    let (rank, world_size) = (group.rank(), group.world_size());

    let mut init_rng = StdRng::seed_from_u64(args.seed);
    let net = model::net().with_seed(args.seed.wrapping_add(rank as u64));
    let mut ddp = ShardedDataParallel::new(net, group, &mut init_rng).await?;

    let mut oss = Oss::new(ddp.num_params(), rank, world_size, |len| {
        args.optimizer.build(len, args.initial_lr())
    })?;
    info!(
        rank = rank;
        "{} parameters, optimizer state kept for {:?}",
        ddp.num_params(),
        oss.partition()
    );

    let report = match run(&mut ddp, &mut oss, train_set, test_set, args).await {
        Ok(report) => report,
        Err(e) => {
            ddp.group_mut().abort(&e.to_string()).await;
            return Err(e);
        }
    };

    println!("Total Time: {}", report.elapsed.as_secs_f64());

    if args.save_model && rank == 0 {
        checkpoint::save(ddp.model(), ddp.params(), Path::new(CHECKPOINT_FILE))?;
        info!(rank = rank; "saved the model to {CHECKPOINT_FILE}");
    }

    let params = ddp.params().to_vec();
    ddp.into_group().shutdown().await?;

    Ok(TrainReport { params, ..report })
}

/// The epoch loop.
async fn run<M, O>(
    ddp: &mut ShardedDataParallel<M>,
    oss: &mut Oss<O>,
    train_set: &MnistDataset,
    test_set: &MnistDataset,
    args: &TrainArgs,
) -> Result<TrainReport>
where
    M: Model,
    O: Optimizer,
{
    let (rank, world_size) = (ddp.group().rank(), ddp.group().world_size());
    let mut sampler = DistributedSampler::new(train_set.len(), world_size, rank).with_seed(args.seed);
    let loss_fn = CrossEntropy::new();

    let mut steps = 0;
    let mut last_loss = None;
    let mut evaluations = Vec::with_capacity(args.epochs);

    let mut elapsed = Duration::ZERO;
    for epoch in 0..args.epochs {
        sampler.set_epoch(epoch as u64);
        ddp.train();

        let loader = DataLoader::new(train_set, sampler.indices(), args.batch_size);
        let (num_samples, num_batches) = (loader.num_samples(), loader.num_batches());

        let epoch_start = Instant::now();

        for (batch_idx, Batch { images, targets }) in loader.enumerate() {
            let loss = oss
                .step(ddp, |ddp| {
                    ddp.zero_grad();
                    let output = ddp.forward(images.into_dyn())?;
                    let output = output.into_dimensionality::<Ix2>().map_err(MlErr::from)?;

                    let loss = loss_fn.loss(output.view(), &targets)?;
                    let d = loss_fn.loss_prime(output.view(), &targets)?;
                    ddp.backward(d.into_dyn())?;

                    Ok(loss)
                })
                .await?;

            steps += 1;
            last_loss = Some(loss);

            if rank == 0 && batch_idx % args.log_interval == 0 {
                info!(
                    "Train Epoch: {} [{}/{} ({:.0}%)]\tLoss: {:.6}",
                    epoch + 1,
                    batch_idx * args.batch_size,
                    num_samples,
                    100.0 * batch_idx as f32 / num_batches as f32,
                    loss
                );
            }

            if args.dry_run {
                break;
            }
        }
        elapsed += epoch_start.elapsed();

        let eval = evaluate(ddp, test_set, args.test_batch_size, &loss_fn).await?;
        if rank == 0 {
            info!(
                "Test set: Average loss: {:.4}, Accuracy: {}/{} ({:.0}%)",
                eval.loss,
                eval.correct,
                eval.total,
                100.0 * eval.accuracy()
            );
        }
        evaluations.push(eval);

        oss.set_learning_rate(oss.learning_rate() * args.epoch_gamma());
    }

    Ok(TrainReport {
        rank,
        elapsed,
        steps,
        last_loss,
        evaluations,
        params: Vec::new(),
    })
}

/// Scores the replica on this rank's contiguous shard of `test_set` and sums the results over
/// the group.
async fn evaluate<M: Model>(
    ddp: &mut ShardedDataParallel<M>,
    test_set: &MnistDataset,
    batch_size: usize,
    loss_fn: &CrossEntropy,
) -> Result<EvalReport> {
    let (rank, world_size) = (ddp.group().rank(), ddp.group().world_size());
    let shard = partition::partition_range(test_set.len(), rank, world_size)?;

    ddp.eval();

    let mut loss_sum = 0.0;
    let mut correct = 0;
    let total = shard.len();

    for Batch { images, targets } in DataLoader::new(test_set, shard.collect(), batch_size) {
        let output = ddp.forward(images.into_dyn())?;
        let output = output.into_dimensionality::<Ix2>().map_err(MlErr::from)?;

        loss_sum += loss_fn.loss(output.view(), &targets)? * targets.len() as f32;
        correct += output
            .rows()
            .into_iter()
            .zip(&targets)
            .filter(|(row, target)| argmax(row.view()) == **target)
            .count();
    }

    let mut sums = [loss_sum, correct as f32, total as f32];
    ddp.group_mut().all_reduce(&mut sums).await?;
    ddp.train();

    let total = sums[2] as usize;
    Ok(EvalReport {
        loss: sums[0] / total.max(1) as f32,
        correct: sums[1] as usize,
        total,
    })
}

fn argmax(row: ArrayView1<f32>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn argmax_picks_the_first_maximum() {
        assert_eq!(argmax(array![0.1, 0.7, 0.7, -1.0].view()), 1);
        assert_eq!(argmax(array![3.0].view()), 0);
    }

    #[test]
    fn accuracy_of_an_empty_evaluation_is_zero() {
        let eval = EvalReport {
            loss: 0.0,
            correct: 0,
            total: 0,
        };
        assert_eq!(eval.accuracy(), 0.0);
    }
}
