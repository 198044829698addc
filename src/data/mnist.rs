use std::{
    fs,
    path::{Path, PathBuf},
};

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{DatasetErr, Result};

pub const IMAGE_SIDE: usize = 28;
pub const IMAGE_SIZE: usize = IMAGE_SIDE * IMAGE_SIDE;
pub const NUM_CLASSES: usize = 10;

/// Normalization constants of the MNIST training set.
pub const MEAN: f32 = 0.1307;
pub const STD: f32 = 0.3081;

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    /// The `(images, labels)` idx file names of this split.
    pub fn files(self) -> (&'static str, &'static str) {
        match self {
            Split::Train => ("train-images-idx3-ubyte", "train-labels-idx1-ubyte"),
            Split::Test => ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte"),
        }
    }
}

/// The raw directory the idx files live in, `<data_dir>/MNIST/raw`.
pub fn raw_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("MNIST").join("raw")
}

/// Read-only MNIST split: 28x28 grayscale digits and their labels.
///
/// Pixels are kept as bytes and normalized when a batch is assembled.
#[derive(Debug, Clone)]
pub struct MnistDataset {
    pixels: Vec<u8>,
    labels: Vec<u8>,
}

impl MnistDataset {
    /// Builds a dataset out of raw pixels (row major, `IMAGE_SIZE` per image) and labels.
    pub fn from_raw(pixels: Vec<u8>, labels: Vec<u8>) -> Result<Self> {
        if pixels.len() != labels.len() * IMAGE_SIZE {
            return Err(DatasetErr::CountMismatch {
                images: pixels.len() / IMAGE_SIZE,
                labels: labels.len(),
            });
        }

        if let Some(&label) = labels.iter().find(|&&l| l as usize >= NUM_CLASSES) {
            return Err(DatasetErr::InvalidLabel(label));
        }

        Ok(Self { pixels, labels })
    }

    /// Parses a split out of its idx files inside `raw_dir`.
    pub fn load(raw_dir: &Path, split: Split) -> Result<Self> {
        let (images_file, labels_file) = split.files();

        let images_path = raw_dir.join(images_file);
        let images = read(&images_path)?;
        let pixels = parse_idx(&images, IMAGES_MAGIC, &images_path)?;

        let labels_path = raw_dir.join(labels_file);
        let labels = read(&labels_path)?;
        let labels = parse_idx(&labels, LABELS_MAGIC, &labels_path)?;

        Self::from_raw(pixels.to_vec(), labels.to_vec())
    }

    /// A dataset of `len` random images whose brightness encodes the label, handy for smoke runs.
    pub fn synthetic(len: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let labels: Vec<u8> = (0..len).map(|_| rng.random_range(0..NUM_CLASSES as u8)).collect();

        let pixels = labels
            .iter()
            .flat_map(|&label| {
                let base = label as u16 * 25;
                (0..IMAGE_SIZE)
                    .map(|_| (base + rng.random_range(0..25u16)) as u8)
                    .collect::<Vec<_>>()
            })
            .collect();

        Self { pixels, labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The raw pixels of the `i`-th image.
    pub fn pixels(&self, i: usize) -> &[u8] {
        &self.pixels[i * IMAGE_SIZE..(i + 1) * IMAGE_SIZE]
    }

    pub fn label(&self, i: usize) -> usize {
        self.labels[i] as usize
    }
}

/// `ToTensor` followed by `Normalize(MEAN, STD)`.
#[inline]
pub fn normalize(pixel: u8) -> f32 {
    (pixel as f32 / 255.0 - MEAN) / STD
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| DatasetErr::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_be_u32(bytes: &[u8], offset: usize, path: &Path) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| DatasetErr::Truncated {
            path: path.to_path_buf(),
            got: bytes.len(),
            expected: offset + 4,
        })
}

/// Validates an idx buffer and returns its body.
///
/// The header is a big-endian magic, whose low byte is the amount of dimensions, followed by one
/// big-endian `u32` per dimension.
pub fn parse_idx<'a>(bytes: &'a [u8], magic: u32, path: &Path) -> Result<&'a [u8]> {
    let got = read_be_u32(bytes, 0, path)?;
    if got != magic {
        return Err(DatasetErr::BadMagic {
            path: path.to_path_buf(),
            got,
            expected: magic,
        });
    }

    let ndims = (magic & 0xff) as usize;
    let header = 4 + 4 * ndims;
    let truncated = |expected| DatasetErr::Truncated {
        path: path.to_path_buf(),
        got: bytes.len(),
        expected,
    };

    let mut len: usize = 1;
    for d in 0..ndims {
        let dim = read_be_u32(bytes, 4 + 4 * d, path)? as usize;
        len = len.checked_mul(dim).ok_or_else(|| truncated(usize::MAX))?;
    }

    let body = &bytes[header..];
    if body.len() != len {
        return Err(truncated(header.saturating_add(len)));
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(magic: u32, dims: &[u32], body: &[u8]) -> Vec<u8> {
        let mut bytes = magic.to_be_bytes().to_vec();
        for d in dims {
            bytes.extend_from_slice(&d.to_be_bytes());
        }
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn parses_labels_and_images() {
        let path = Path::new("mem");

        let labels = idx(LABELS_MAGIC, &[3], &[7, 0, 9]);
        assert_eq!(parse_idx(&labels, LABELS_MAGIC, path).unwrap(), [7, 0, 9]);

        let body = vec![1; 2 * IMAGE_SIZE];
        let images = idx(IMAGES_MAGIC, &[2, 28, 28], &body);
        assert_eq!(parse_idx(&images, IMAGES_MAGIC, path).unwrap().len(), 2 * IMAGE_SIZE);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        let path = Path::new("mem");

        let labels = idx(LABELS_MAGIC, &[3], &[7, 0, 9]);
        assert!(matches!(
            parse_idx(&labels, IMAGES_MAGIC, path),
            Err(DatasetErr::BadMagic { got: 2049, .. })
        ));

        let short = idx(LABELS_MAGIC, &[4], &[7, 0, 9]);
        assert!(matches!(
            parse_idx(&short, LABELS_MAGIC, path),
            Err(DatasetErr::Truncated { .. })
        ));

        assert!(matches!(
            parse_idx(&[0, 0], LABELS_MAGIC, path),
            Err(DatasetErr::Truncated { .. })
        ));
    }

    #[test]
    fn oversized_dimensions_are_an_error() {
        let huge = idx(IMAGES_MAGIC, &[u32::MAX, u32::MAX, u32::MAX], &[0; 16]);
        assert!(matches!(
            parse_idx(&huge, IMAGES_MAGIC, Path::new("mem")),
            Err(DatasetErr::Truncated { got: 32, .. })
        ));
    }

    #[test]
    fn loads_a_split_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();

        let (images_file, labels_file) = Split::Test.files();
        fs::write(dir.join(images_file), idx(IMAGES_MAGIC, &[1, 28, 28], &[255; IMAGE_SIZE])).unwrap();
        fs::write(dir.join(labels_file), idx(LABELS_MAGIC, &[1], &[4])).unwrap();

        let ds = MnistDataset::load(dir, Split::Test).unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.label(0), 4);
        assert_eq!(ds.pixels(0), [255; IMAGE_SIZE]);
    }

    #[test]
    fn from_raw_checks_counts_and_labels() {
        assert!(matches!(
            MnistDataset::from_raw(vec![0; IMAGE_SIZE], vec![1, 2]),
            Err(DatasetErr::CountMismatch { images: 1, labels: 2 })
        ));
        assert!(matches!(
            MnistDataset::from_raw(vec![0; IMAGE_SIZE], vec![10]),
            Err(DatasetErr::InvalidLabel(10))
        ));
    }

    #[test]
    fn normalization_matches_torchvision() {
        assert!((normalize(0) + MEAN / STD).abs() < 1e-6);
        assert!((normalize(255) - (1.0 - MEAN) / STD).abs() < 1e-6);
    }

    #[test]
    fn synthetic_is_deterministic() {
        let a = MnistDataset::synthetic(8, 3);
        let b = MnistDataset::synthetic(8, 3);
        assert_eq!(a.len(), 8);
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.pixels, b.pixels);
    }
}
