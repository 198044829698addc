use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    Rank {
        layer: &'static str,
        got: usize,
        expected: usize,
    },
    Shape(ShapeError),
    InvalidTarget {
        target: usize,
        classes: usize,
    },
    NoForwardPass(&'static str),
    Init(String),
    Checkpoint(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::Rank {
                layer,
                got,
                expected,
            } => write!(
                f,
                "The {layer} layer expects a {expected}-dimensional input, got {got} dimensions"
            ),
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
            MlErr::InvalidTarget { target, classes } => {
                write!(f, "Target class {target} is out of range for {classes} classes")
            }
            MlErr::NoForwardPass(layer) => {
                write!(f, "Called backward on the {layer} layer before any forward pass")
            }
            MlErr::Init(e) => write!(f, "failed to initialize parameters: {e}"),
            MlErr::Checkpoint(e) => write!(f, "failed to write checkpoint: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}
