use std::{error::Error, fmt, io, time::Duration};

/// The process group's result type.
pub type Result<T> = std::result::Result<T, DistErr>;

/// Process group failures, every one of them is fatal for the run.
#[derive(Debug)]
pub enum DistErr {
    Io(io::Error),
    InvalidInitMethod(String),
    RendezvousTimeout {
        addr: String,
        waited: Duration,
    },
    UnexpectedMessage {
        peer: usize,
        expected: &'static str,
        got: &'static str,
    },
    LengthMismatch {
        peer: usize,
        got: usize,
        expected: usize,
    },
    WorldSizeMismatch {
        peer: usize,
        got: usize,
        expected: usize,
    },
    InvalidRank {
        rank: usize,
        world_size: usize,
    },
    DuplicateRank(usize),
    Remote {
        peer: usize,
        msg: String,
    },
}

impl fmt::Display for DistErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistErr::Io(e) => write!(f, "io error: {e}"),
            DistErr::InvalidInitMethod(s) => {
                write!(f, "invalid init method {s:?}, expected tcp://<host>:<port>")
            }
            DistErr::RendezvousTimeout { addr, waited } => {
                write!(f, "could not reach the rendezvous at {addr} after {waited:?}")
            }
            DistErr::UnexpectedMessage {
                peer,
                expected,
                got,
            } => write!(f, "unexpected message from rank {peer}: expected {expected}, got {got}"),
            DistErr::LengthMismatch {
                peer,
                got,
                expected,
            } => write!(
                f,
                "tensor length mismatch from rank {peer}: got {got}, expected {expected}"
            ),
            DistErr::WorldSizeMismatch {
                peer,
                got,
                expected,
            } => write!(
                f,
                "rank {peer} believes the world size is {got}, expected {expected}"
            ),
            DistErr::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is out of range for a world of size {world_size}")
            }
            DistErr::DuplicateRank(rank) => write!(f, "rank {rank} joined twice"),
            DistErr::Remote { peer, msg } => write!(f, "rank {peer} failed: {msg}"),
        }
    }
}

impl Error for DistErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DistErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DistErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
