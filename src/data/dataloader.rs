use ndarray::Array4;

use super::mnist::{IMAGE_SIDE, MnistDataset, normalize};

/// A normalized batch, images shaped `(n, 1, 28, 28)`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>,
    pub targets: Vec<usize>,
}

impl Batch {
    /// Assembles the batch made of the dataset items at `indices`.
    pub fn gather(dataset: &MnistDataset, indices: &[usize]) -> Self {
        let images = Array4::from_shape_fn((indices.len(), 1, IMAGE_SIDE, IMAGE_SIDE), |(b, _, h, w)| {
            normalize(dataset.pixels(indices[b])[h * IMAGE_SIDE + w])
        });
        let targets = indices.iter().map(|&i| dataset.label(i)).collect();

        Self { images, targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Yields batches of a dataset in the order given by a list of indices, the last one possibly
/// shorter.
#[derive(Debug, Clone)]
pub struct DataLoader<'a> {
    dataset: &'a MnistDataset,
    indices: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<'a> DataLoader<'a> {
    pub fn new(dataset: &'a MnistDataset, indices: Vec<usize>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");

        Self {
            dataset,
            indices,
            batch_size,
            cursor: 0,
        }
    }

    /// Walks the whole dataset in order.
    pub fn sequential(dataset: &'a MnistDataset, batch_size: usize) -> Self {
        Self::new(dataset, (0..dataset.len()).collect(), batch_size)
    }

    /// The amount of samples this loader goes through.
    pub fn num_samples(&self) -> usize {
        self.indices.len()
    }

    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }
}

impl Iterator for DataLoader<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.indices.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let batch = Batch::gather(self.dataset, &self.indices[self.cursor..end]);
        self.cursor = end;

        Some(batch)
    }
}
