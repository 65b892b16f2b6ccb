use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used by the frame codec.
pub type Result<T> = std::result::Result<T, FrameErr>;

/// Failures while encoding or decoding a weights frame.
///
/// All of them are recoverable at the call site, the caller chooses whether to drop
/// the frame or to request it again.
#[derive(Debug)]
pub enum FrameErr {
    /// The buffer ends before the lengths it declares.
    FrameTooShort { needed: usize, got: usize },
    /// The frame would not fit in an addressable buffer.
    SizeOverflow { what: &'static str },
    /// The metadata header is not valid JSON for a frame header.
    InvalidHeader(serde_json::Error),
    /// The matrices don't match the lengths declared in the metadata.
    LengthMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
}

impl Display for FrameErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameErr::FrameTooShort { needed, got } => {
                write!(f, "frame too short: needed {needed} bytes, got {got}")
            }
            FrameErr::SizeOverflow { what } => {
                write!(f, "frame size overflow while computing the {what} length")
            }
            FrameErr::InvalidHeader(e) => write!(f, "invalid frame header: {e}"),
            FrameErr::LengthMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "{what} length mismatch: got {got} elements, expected {expected}"
            ),
        }
    }
}

impl Error for FrameErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FrameErr::InvalidHeader(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FrameErr {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidHeader(value)
    }
}
