pub mod config;
pub mod data;
pub mod dist;
pub mod error;
pub mod launcher;
pub mod model;
pub mod train;

pub use config::{OptimizerKind, TrainArgs};
pub use error::{Result, TrainErr};
pub use train::{EvalReport, TrainReport, fit, train};
