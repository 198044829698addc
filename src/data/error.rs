use std::{error::Error, fmt, io, path::PathBuf};

/// Failures while fetching or parsing the dataset.
#[derive(Debug)]
pub enum DatasetErr {
    Io {
        path: PathBuf,
        source: io::Error,
    },
    Download {
        url: String,
        source: reqwest::Error,
    },
    Decompress {
        url: String,
        source: io::Error,
    },
    BadMagic {
        path: PathBuf,
        got: u32,
        expected: u32,
    },
    Truncated {
        path: PathBuf,
        got: usize,
        expected: usize,
    },
    CountMismatch {
        images: usize,
        labels: usize,
    },
    InvalidLabel(u8),
}

impl fmt::Display for DatasetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetErr::Io { path, source } => write!(f, "{}: {source}", path.display()),
            DatasetErr::Download { url, source } => write!(f, "failed to download {url}: {source}"),
            DatasetErr::Decompress { url, source } => {
                write!(f, "failed to decompress {url}: {source}")
            }
            DatasetErr::BadMagic {
                path,
                got,
                expected,
            } => write!(
                f,
                "{} is not an idx file: magic {got}, expected {expected}",
                path.display()
            ),
            DatasetErr::Truncated {
                path,
                got,
                expected,
            } => write!(
                f,
                "{} is truncated: {got} bytes, expected {expected}",
                path.display()
            ),
            DatasetErr::CountMismatch { images, labels } => {
                write!(f, "{images} images but {labels} labels")
            }
            DatasetErr::InvalidLabel(label) => write!(f, "label {label} is not a digit"),
        }
    }
}

impl Error for DatasetErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DatasetErr::Io { source, .. } => Some(source),
            DatasetErr::Download { source, .. } => Some(source),
            DatasetErr::Decompress { source, .. } => Some(source),
            _ => None,
        }
    }
}
