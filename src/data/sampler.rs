use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

/// Restricts sampling to a strided subset of the dataset, one per rank.
///
/// Each epoch the dataset indices are shuffled with a generator seeded by `seed + epoch` (the
/// same on every rank), padded by wrapping around until they divide evenly among the replicas,
/// and then rank `r` takes every `num_replicas`-th index starting at `r`.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    len: usize,
    num_replicas: usize,
    rank: usize,
    shuffle: bool,
    seed: u64,
    epoch: u64,
}

impl DistributedSampler {
    /// Creates a new, shuffling `DistributedSampler`.
    ///
    /// # Arguments
    /// * `len` - The length of the dataset.
    /// * `num_replicas` - The amount of ranks sharing the dataset.
    /// * `rank` - The rank this sampler yields indices for.
    pub fn new(len: usize, num_replicas: usize, rank: usize) -> Self {
        assert!(num_replicas > 0);
        assert!(rank < num_replicas, "rank out of range");

        Self {
            len,
            num_replicas,
            rank,
            shuffle: true,
            seed: 0,
            epoch: 0,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Changes the permutation drawn by the next `indices` call.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// The amount of indices every rank gets.
    pub fn num_samples(&self) -> usize {
        self.len.div_ceil(self.num_replicas)
    }

    /// The length of the padded permutation shared among all ranks.
    pub fn total_size(&self) -> usize {
        self.num_samples() * self.num_replicas
    }

    /// This rank's indices for the current epoch.
    pub fn indices(&self) -> Vec<usize> {
        let mut perm: Vec<usize> = (0..self.len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            perm.shuffle(&mut rng);
        }

        perm.iter()
            .cycle()
            .take(self.total_size())
            .skip(self.rank)
            .step_by(self.num_replicas)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn ranks_cover_the_dataset_evenly() {
        let len = 10;
        let samplers: Vec<_> = (0..3).map(|r| DistributedSampler::new(len, 3, r).with_seed(1)).collect();

        let shards: Vec<_> = samplers.iter().map(DistributedSampler::indices).collect();
        assert!(shards.iter().all(|s| s.len() == 4));

        let seen: HashSet<_> = shards.iter().flatten().copied().collect();
        assert_eq!(seen, (0..len).collect::<HashSet<_>>());
    }

    #[test]
    fn unshuffled_is_strided_with_wraparound() {
        let s0 = DistributedSampler::new(5, 2, 0).with_shuffle(false);
        let s1 = DistributedSampler::new(5, 2, 1).with_shuffle(false);

        assert_eq!(s0.indices(), [0, 2, 4]);
        assert_eq!(s1.indices(), [1, 3, 0]);
    }

    #[test]
    fn epoch_changes_the_permutation() {
        let mut sampler = DistributedSampler::new(100, 1, 0).with_seed(7);
        let first = sampler.indices();
        assert_eq!(first, sampler.indices());

        sampler.set_epoch(1);
        assert_ne!(first, sampler.indices());
    }

    #[test]
    fn ranks_agree_on_the_permutation() {
        let a = DistributedSampler::new(9, 2, 0).with_seed(4);
        let b = DistributedSampler::new(9, 2, 1).with_seed(4);

        let disjoint: HashSet<_> = a.indices().into_iter().chain(b.indices()).collect();
        assert_eq!(disjoint.len(), 9);
    }

    #[test]
    fn empty_dataset_yields_nothing() {
        assert!(DistributedSampler::new(0, 4, 3).indices().is_empty());
    }
}
