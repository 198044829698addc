use clap::Parser;
use env_logger::Env;
use log::info;

use sharded_mnist::{TrainArgs, launcher, train};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = TrainArgs::parse();
    args.validate()?;
    let use_cuda = args.use_cuda();

    match args.rank {
        None => {
            if !args.no_cuda && !use_cuda {
                info!("CUDA is not available, training on the CPU");
            }

            launcher::spawn(&args).await?;
        }
        Some(rank) => {
            train(rank, &args, use_cuda).await?;
        }
    }

    Ok(())
}
