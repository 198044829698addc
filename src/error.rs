use std::{error::Error, fmt, io};

use machine_learning::MlErr;

use crate::{data::DatasetErr, dist::DistErr};

/// The training run's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Anything that can stop a rank from finishing its training run.
#[derive(Debug)]
pub enum TrainErr {
    Io(io::Error),
    Ml(MlErr),
    Dist(DistErr),
    Dataset(DatasetErr),
    InvalidArgs(String),
    RankFailed { rank: usize, status: String },
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Io(e) => write!(f, "io error: {e}"),
            TrainErr::Ml(e) => write!(f, "model error: {e}"),
            TrainErr::Dist(e) => write!(f, "process group error: {e}"),
            TrainErr::Dataset(e) => write!(f, "dataset error: {e}"),
            TrainErr::InvalidArgs(msg) => write!(f, "invalid arguments: {msg}"),
            TrainErr::RankFailed { rank, status } => write!(f, "rank {rank} exited with {status}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Io(e) => Some(e),
            TrainErr::Ml(e) => Some(e),
            TrainErr::Dist(e) => Some(e),
            TrainErr::Dataset(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for TrainErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<DistErr> for TrainErr {
    fn from(value: DistErr) -> Self {
        Self::Dist(value)
    }
}

impl From<DatasetErr> for TrainErr {
    fn from(value: DatasetErr) -> Self {
        Self::Dataset(value)
    }
}
