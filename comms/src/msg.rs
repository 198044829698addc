use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const TENSOR_H: Header = 2;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A flat slice of numbers: parameters, gradients or reduced metrics.
    Tensor(&'a [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// First message a rank sends to the rendezvous root.
    Hello { rank: usize, world_size: usize },
    Barrier,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Returns a short name for the message kind, used in protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Hello { .. }) => "control/hello",
            Msg::Control(Command::Barrier) => "control/barrier",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Tensor(_)) => "data/tensor",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(Payload::Tensor(nums)) => {
                buf.extend_from_slice(&TENSOR_H.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap());

        match kind {
            ERR_H => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            TENSOR_H => {
                let nums = bytemuck::try_cast_slice(rest).map_err(|err| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("bad tensor payload: {err}"))
                })?;

                Ok(Self::Data(Payload::Tensor(nums)))
            }
            kind => Self::invalid_kind_byte(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_survives_serialization() {
        let msg = Msg::Control(Command::Hello {
            rank: 3,
            world_size: 4,
        });

        let mut buf = Vec::new();
        assert!(msg.serialize(&mut buf).is_none());

        match Msg::deserialize(&buf).unwrap() {
            Msg::Control(cmd) => assert_eq!(
                cmd,
                Command::Hello {
                    rank: 3,
                    world_size: 4
                }
            ),
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let buf = 9u32.to_be_bytes();
        assert!(Msg::deserialize(&buf).is_err());
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(Msg::deserialize(&[0, 1]).is_err());
    }
}
