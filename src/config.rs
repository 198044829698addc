use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use machine_learning::optimization::{Adadelta, Adam, GradientDescent, Optimizer, RmsProp};

use crate::error::{Result, TrainErr};

pub const DEFAULT_WORLD_SIZE: usize = 2;
pub const DEFAULT_INIT_METHOD: &str = "tcp://localhost:29501";

/// Learning rate of the sharded optimizer unless `--step_lr` is given.
pub const SHARDED_LR: f32 = 1e-4;

/// The base optimizer whose state gets sharded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OptimizerKind {
    Adadelta,
    RmsProp,
    Sgd,
    Adam,
}

impl OptimizerKind {
    /// Builds the optimizer for a partition of `len` parameters.
    pub fn build(self, len: usize, learning_rate: f32) -> Box<dyn Optimizer + Send> {
        match self {
            OptimizerKind::Adadelta => Box::new(Adadelta::with_defaults(len, learning_rate)),
            OptimizerKind::RmsProp => Box::new(RmsProp::with_defaults(len, learning_rate)),
            OptimizerKind::Sgd => Box::new(GradientDescent::new(learning_rate)),
            OptimizerKind::Adam => Box::new(Adam::with_defaults(len, learning_rate)),
        }
    }
}

/// Training settings.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sharded-mnist",
    version,
    about = "MNIST with sharded data parallel training and optimizer state sharding"
)]
pub struct TrainArgs {
    /// Input batch size for training
    #[arg(long = "batch_size", value_name = "N", default_value_t = 64)]
    pub batch_size: usize,

    /// Input batch size for testing
    #[arg(long = "test_batch_size", value_name = "N", default_value_t = 1000)]
    pub test_batch_size: usize,

    /// Number of epochs to train
    #[arg(long, value_name = "N", default_value_t = 14)]
    pub epochs: usize,

    /// Learning rate, only used with --step_lr
    #[arg(long, value_name = "LR", default_value_t = 1.0)]
    pub lr: f32,

    /// Learning rate step gamma, only used with --step_lr
    #[arg(long, value_name = "M", default_value_t = 0.7)]
    pub gamma: f32,

    /// Start from --lr and decay it by --gamma after every epoch
    #[arg(long = "step_lr")]
    pub step_lr: bool,

    /// Disables CUDA training
    #[arg(long = "no_cuda")]
    pub no_cuda: bool,

    /// Quickly check a single pass
    #[arg(long = "dry_run")]
    pub dry_run: bool,

    /// Random seed
    #[arg(long, value_name = "S", default_value_t = 1)]
    pub seed: u64,

    /// How many batches to wait before logging training status
    #[arg(long = "log_interval", value_name = "N", default_value_t = 10)]
    pub log_interval: usize,

    /// For saving the current model
    #[arg(long = "save_model")]
    pub save_model: bool,

    /// Number of worker processes to spawn
    #[arg(long = "world_size", value_name = "N", default_value_t = DEFAULT_WORLD_SIZE)]
    pub world_size: usize,

    /// Rendezvous endpoint of the process group
    #[arg(
        long = "init_method",
        value_name = "URL",
        env = "SHARDED_MNIST_INIT_METHOD",
        default_value = DEFAULT_INIT_METHOD
    )]
    pub init_method: String,

    /// Where MNIST is downloaded to and read from
    #[arg(
        long = "data_dir",
        value_name = "DIR",
        env = "SHARDED_MNIST_DATA_DIR",
        default_value = "../data"
    )]
    pub data_dir: PathBuf,

    /// Base optimizer to shard
    #[arg(long, value_enum, default_value_t = OptimizerKind::Adadelta)]
    pub optimizer: OptimizerKind,

    /// Set by the launcher on each spawned worker
    #[arg(long, hide = true)]
    pub rank: Option<usize>,
}

impl TrainArgs {
    /// Checks the values clap cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size),
            ("test_batch_size", self.test_batch_size),
            ("log_interval", self.log_interval),
            ("world_size", self.world_size),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(TrainErr::InvalidArgs(format!("--{name} must be positive")));
        }

        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(TrainErr::InvalidArgs(format!("--lr must be positive, got {}", self.lr)));
        }

        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(TrainErr::InvalidArgs(format!(
                "--gamma must be positive, got {}",
                self.gamma
            )));
        }

        match self.rank {
            Some(rank) if rank >= self.world_size => Err(TrainErr::InvalidArgs(format!(
                "--rank {rank} is out of range for --world_size {}",
                self.world_size
            ))),
            _ => Ok(()),
        }
    }

    /// The learning rate the sharded optimizer starts with.
    pub fn initial_lr(&self) -> f32 {
        if self.step_lr { self.lr } else { SHARDED_LR }
    }

    /// The factor applied to the learning rate after each epoch.
    pub fn epoch_gamma(&self) -> f32 {
        if self.step_lr { self.gamma } else { 1.0 }
    }

    /// Whether to train on a CUDA device.
    pub fn use_cuda(&self) -> bool {
        !self.no_cuda && accelerator_available()
    }
}

/// Only the CPU backend is compiled in.
pub fn accelerator_available() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> TrainArgs {
        TrainArgs::try_parse_from(std::iter::once("sharded-mnist").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn validate_rejects_zero_sizes_and_bad_rank() {
        assert!(parse(&[]).validate().is_ok());
        assert!(parse(&["--batch_size", "0"]).validate().is_err());
        assert!(parse(&["--world_size", "2", "--rank", "2"]).validate().is_err());
        assert!(parse(&["--lr", "0"]).validate().is_err());
    }

    #[test]
    fn optimizer_is_sized_to_the_partition() {
        for kind in [OptimizerKind::Adadelta, OptimizerKind::RmsProp, OptimizerKind::Adam] {
            assert_eq!(kind.build(7, 0.1).state_len(), 7);
        }
        assert_eq!(OptimizerKind::Sgd.build(7, 0.1).state_len(), 0);
    }

    #[test]
    fn learning_rate_is_fixed_unless_stepped() {
        let args = parse(&["--lr", "0.5", "--gamma", "0.9"]);
        assert_eq!(args.initial_lr(), SHARDED_LR);
        assert_eq!(args.epoch_gamma(), 1.0);

        let args = parse(&["--lr", "0.5", "--gamma", "0.9", "--step_lr"]);
        assert_eq!(args.initial_lr(), 0.5);
        assert_eq!(args.epoch_gamma(), 0.9);
    }

    #[test]
    fn never_uses_cuda_without_an_accelerator() {
        assert!(!parse(&[]).use_cuda());
    }
}
