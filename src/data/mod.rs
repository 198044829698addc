mod dataloader;
mod download;
mod error;
pub mod mnist;
mod sampler;

pub use dataloader::{Batch, DataLoader};
pub use download::{MIRRORS, ensure_downloaded, is_complete};
pub use error::DatasetErr;
pub use mnist::{MnistDataset, Split};
pub use sampler::DistributedSampler;

/// The dataset module's result type.
pub type Result<T> = std::result::Result<T, DatasetErr>;
