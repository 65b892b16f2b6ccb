use std::io;

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::{
    Deserialize, Serialize,
    specs::{Event, TrainingSpec},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const KIND_ERR: Header = 0;
const KIND_CONTROL: Header = 1;
const KIND_EVENT: Header = 2;
const KIND_COMPLETED: Header = 3;

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Init(TrainingSpec),
    Start,
    Stop,
    Status,
    Disconnect,
}

/// The application layer message between a worker node and its supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    Control(Command),
    Event(Event),
    Err(String),
}

impl Msg {
    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind {kind}"),
        ))
    }
}

impl Serialize for Msg {
    fn serialize<'a>(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&KIND_ERR.to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&KIND_CONTROL.to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
            Msg::Event(Event::Completed(delta)) => {
                buf.extend_from_slice(&KIND_COMPLETED.to_be_bytes());
                Ok(Some(delta))
            }
            Msg::Event(event) => {
                buf.extend_from_slice(&KIND_EVENT.to_be_bytes());
                serde_json::to_writer(buf, event)?;
                Ok(None)
            }
        }
    }
}

impl Deserialize for Msg {
    fn deserialize(buf: &[u8]) -> io::Result<Self> {
        let Some((kind_buf, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
            return Self::buf_is_too_small(buf.len());
        };

        match Header::from_be_bytes(*kind_buf) {
            KIND_ERR => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(string.to_owned()))
            }
            KIND_CONTROL => Ok(Self::Control(serde_json::from_slice(rest)?)),
            KIND_EVENT => Ok(Self::Event(serde_json::from_slice(rest)?)),
            KIND_COMPLETED => Ok(Self::Event(Event::Completed(rest.to_vec()))),
            kind => Self::invalid_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::{ErrorKind, ErrorReport, TrainingProgress, WorkerState};

    fn roundtrip(msg: &Msg) -> Msg {
        let mut buf = Vec::new();
        if let Some(tail) = msg.serialize(&mut buf).unwrap() {
            buf.extend_from_slice(tail);
        }

        Msg::deserialize(&buf).unwrap()
    }

    #[test]
    fn control_and_events() {
        let progress = TrainingProgress {
            epoch: 1,
            total_epochs: 3,
            batch: 4,
            total_batches: 8,
            loss: 0.5,
            throughput: 1024.0,
        };

        let msgs = [
            Msg::Control(Command::Start),
            Msg::Control(Command::Stop),
            Msg::Event(Event::Progress(progress)),
            Msg::Event(Event::State(WorkerState::Stopped)),
            Msg::Event(Event::Error(ErrorReport {
                kind: ErrorKind::DeviceLost,
                message: "gone".into(),
                fatal: true,
            })),
            Msg::Err("bad command".into()),
        ];

        for msg in msgs {
            assert_eq!(roundtrip(&msg), msg);
        }
    }

    #[test]
    fn completed_delta_travels_raw() {
        let delta = vec![1, 2, 3, 4, 5];
        let msg = Msg::Event(Event::Completed(delta.clone()));

        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).unwrap();
        assert_eq!(buf, KIND_COMPLETED.to_be_bytes());
        assert_eq!(tail, Some(delta.as_slice()));

        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn unknown_kind_is_invalid_data() {
        let err = Msg::deserialize(&9u32.to_be_bytes()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = Msg::deserialize(&[0, 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
