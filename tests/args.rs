use std::path::PathBuf;

use clap::Parser;
use sharded_mnist::{OptimizerKind, TrainArgs};

fn parse(args: &[&str]) -> TrainArgs {
    TrainArgs::try_parse_from(std::iter::once("sharded-mnist").chain(args.iter().copied())).unwrap()
}

#[test]
fn defaults_match_the_reference_script() {
    let args = parse(&[]);

    assert_eq!(args.batch_size, 64);
    assert_eq!(args.test_batch_size, 1000);
    assert_eq!(args.epochs, 14);
    assert_eq!(args.lr, 1.0);
    assert_eq!(args.gamma, 0.7);
    assert!(!args.step_lr);
    assert_eq!(args.initial_lr(), 1e-4);
    assert!(!args.no_cuda);
    assert!(!args.dry_run);
    assert_eq!(args.seed, 1);
    assert_eq!(args.log_interval, 10);
    assert!(!args.save_model);

    assert_eq!(args.world_size, 2);
    assert_eq!(args.optimizer, OptimizerKind::Adadelta);
    assert_eq!(args.rank, None);
}

#[test]
fn every_flag_can_be_overridden() {
    let args = parse(&[
        "--batch_size",
        "32",
        "--test_batch_size",
        "500",
        "--epochs",
        "3",
        "--lr",
        "0.5",
        "--gamma",
        "0.9",
        "--step_lr",
        "--no_cuda",
        "--dry_run",
        "--seed",
        "42",
        "--log_interval",
        "5",
        "--save_model",
        "--world_size",
        "4",
        "--init_method",
        "tcp://127.0.0.1:4000",
        "--data_dir",
        "/tmp/mnist",
        "--optimizer",
        "rms-prop",
        "--rank",
        "3",
    ]);

    assert_eq!(args.batch_size, 32);
    assert_eq!(args.test_batch_size, 500);
    assert_eq!(args.epochs, 3);
    assert_eq!(args.lr, 0.5);
    assert_eq!(args.gamma, 0.9);
    assert!(args.step_lr);
    assert!(args.no_cuda);
    assert!(args.dry_run);
    assert_eq!(args.seed, 42);
    assert_eq!(args.log_interval, 5);
    assert!(args.save_model);
    assert_eq!(args.world_size, 4);
    assert_eq!(args.init_method, "tcp://127.0.0.1:4000");
    assert_eq!(args.data_dir, PathBuf::from("/tmp/mnist"));
    assert_eq!(args.optimizer, OptimizerKind::RmsProp);
    assert_eq!(args.rank, Some(3));
    assert!(args.validate().is_ok());
}

#[test]
fn flags_keep_their_underscores() {
    assert!(TrainArgs::try_parse_from(["sharded-mnist", "--batch-size", "8"]).is_err());
    assert!(TrainArgs::try_parse_from(["sharded-mnist", "--epochs", "many"]).is_err());
}
