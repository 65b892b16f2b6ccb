use std::io;

/// A type that can be written into a message body.
pub trait Serialize {
    /// Serializes `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer to write the serialized bytes into.
    ///
    /// # Returns
    /// An optional trailing slice to be sent right after `buf` without copying it, or
    /// an io error if serialization failed.
    fn serialize<'a>(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
