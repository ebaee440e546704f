use std::io;

/// Turns a message into bytes for the wire.
pub trait Serialize<'a> {
    /// Writes the owned part of the message into `buf`.
    ///
    /// # Returns
    /// A trailing borrowed slice to be written after `buf` without copying, if any.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
