mod ddp;
mod error;
mod group;
mod oss;
pub mod partition;

pub use ddp::ShardedDataParallel;
pub use error::{DistErr, Result};
pub use group::{ProcessGroup, RENDEZVOUS_TIMEOUT, parse_init_method};
pub use oss::Oss;
