use std::env;

use futures::{StreamExt, stream::FuturesUnordered};
use log::{debug, info};
use tokio::process::Command;

use crate::{
    config::TrainArgs,
    error::{Result, TrainErr},
};

/// Re-executes the current binary once per rank with `--rank <r>` appended and waits for all of
/// them.
///
/// The first rank to fail makes the whole run fail; the remaining ranks are killed.
pub async fn spawn(args: &TrainArgs) -> Result<()> {
    let exe = env::current_exe()?;
    let forwarded: Vec<String> = env::args().skip(1).collect();

    info!("spawning {} ranks", args.world_size);

    let mut waiting = FuturesUnordered::new();
    for rank in 0..args.world_size {
        let mut child = Command::new(&exe)
            .args(&forwarded)
            .arg("--rank")
            .arg(rank.to_string())
            .kill_on_drop(true)
            .spawn()?;

        waiting.push(async move { (rank, child.wait().await) });
    }

    while let Some((rank, status)) = waiting.next().await {
        let status = status?;
        if !status.success() {
            return Err(TrainErr::RankFailed {
                rank,
                status: status.to_string(),
            });
        }

        debug!(rank = rank; "exited cleanly");
    }

    Ok(())
}
