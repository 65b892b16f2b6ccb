//! Wire formats shared by a worker node, its supervisor and the aggregator.

mod deserialize;
pub mod error;
pub mod frame;
pub mod msg;
mod receiver;
mod sender;
mod serialize;
pub mod specs;

use tokio::io::{AsyncRead, AsyncWrite};

pub use deserialize::Deserialize;
pub use error::FrameErr;
pub use frame::{Frame, FrameKind, Metadata};
pub use receiver::OnoReceiver;
pub use sender::OnoSender;
pub use serialize::Serialize;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// The largest message body a receiver accepts, 256 MiB.
const MAX_MSG_LEN: LenType = 256 << 20;

/// Splits a supervisor link into its length-prefixed receiving and sending ends.
///
/// # Arguments
/// * `rx` - The reading half of the link.
/// * `tx` - The writing half of the link.
///
/// # Returns
/// The receiver and sender of the link, messages are `[u64 length][body]` in both ways.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
