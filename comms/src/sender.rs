//! The sending end of the supervisor link.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_MSG_LEN, Serialize};

/// Writes length-prefixed messages to the underlying writer.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends `msg`, flushing the writer afterwards.
    ///
    /// A serializer's trailing slice, such as a delta frame, is written straight after
    /// the header without being copied into the buffer.
    ///
    /// # Returns
    /// `InvalidInput` if the message is larger than a receiver accepts, nothing is
    /// written in that case.
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);

        let tail = msg.serialize(buf)?;
        let len = (buf.len() - LEN_TYPE_SIZE + tail.map_or(0, <[u8]>::len)) as LenType;

        if len > MAX_MSG_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("message of {len} bytes exceeds the {MAX_MSG_LEN} bytes limit"),
            ));
        }

        buf[..LEN_TYPE_SIZE].copy_from_slice(&len.to_be_bytes());
        tx.write_all(buf).await?;

        if let Some(tail) = tail {
            tx.write_all(tail).await?;
        }

        tx.flush().await
    }

    /// Shuts down the underlying writer, the peer reads an end of stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, duplex};

    use super::*;

    struct Raw<'a>(&'a [u8]);

    impl Serialize for Raw<'_> {
        fn serialize<'a>(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
            buf.push(0xAB);
            Ok(Some(self.0))
        }
    }

    #[tokio::test]
    async fn length_covers_the_tail() {
        let (tx, mut rx) = duplex(64);
        let mut sender = OnoSender::new(tx);

        sender.send(&Raw(&[1, 2, 3])).await.unwrap();
        sender.shutdown().await.unwrap();

        let mut wire = Vec::new();
        rx.read_to_end(&mut wire).await.unwrap();

        let mut expected = 4u64.to_be_bytes().to_vec();
        expected.extend_from_slice(&[0xAB, 1, 2, 3]);
        assert_eq!(wire, expected);
    }
}
