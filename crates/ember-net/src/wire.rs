//! Binary message encoding and decoding.
//!
//! Every message starts with a `u16` little-endian type id, followed by a
//! sequence of typed fields. Wire conventions, pinned once for
//! interoperability:
//!
//! - all integers are little-endian
//! - type id is 16 bits, so the minimum valid message is 2 bytes
//! - strings are a `u16` byte-length prefix followed by UTF-8 bytes
//!
//! [`MessageWriter`] builds an outbound message; [`MessageReader`] is a
//! cursor over an inbound buffer. A read past the end of the buffer fails
//! with [`WireError::BufferUnderrun`] and leaves no other message affected.

/// Byte length of the type-id header, the minimum valid message length.
pub const TYPE_ID_LEN: usize = 2;

/// Errors raised while decoding a message.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// A read would run past the end of the buffer.
    #[error("buffer underrun: needed {needed} more bytes, {available} available")]
    BufferUnderrun {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// A string field holds bytes that are not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidString,
}

/// Builder for one outbound message.
///
/// Fields are appended in wire order and the finished buffer is handed to
/// the send path with [`MessageWriter::into_bytes`] (or borrowed with
/// [`MessageWriter::as_bytes`] when the same message goes to several
/// connections). The writer is not tied to any connection.
#[derive(Debug, Clone)]
pub struct MessageWriter {
    bytes: Vec<u8>,
}

impl MessageWriter {
    /// Start a message of the given type.
    pub fn new(type_id: u16) -> Self {
        Self {
            bytes: type_id.to_le_bytes().to_vec(),
        }
    }

    /// Type id this message was created with.
    pub fn type_id(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0], self.bytes[1]])
    }

    /// Append one byte.
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    /// Append a 16-bit integer.
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a 32-bit integer.
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a length-prefixed UTF-8 string.
    ///
    /// A value longer than `u16::MAX` bytes is cut at the largest char
    /// boundary that fits the prefix; a message that large has no business
    /// on this wire and is logged.
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        let mut len = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(len) {
            len -= 1;
        }
        if len < value.len() {
            tracing::warn!(
                type_id = self.type_id(),
                full_len = value.len(),
                "string field truncated to fit u16 length prefix"
            );
        }
        self.bytes.extend_from_slice(&(len as u16).to_le_bytes());
        self.bytes.extend_from_slice(&value.as_bytes()[..len]);
        self
    }

    /// Append raw bytes with no length prefix.
    ///
    /// The reader must know how many bytes to take, either from a prior
    /// field or because the blob runs to the end of the message.
    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(value);
        self
    }

    /// Total encoded length, header included.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether anything beyond the header was written.
    pub fn is_empty(&self) -> bool {
        self.bytes.len() == TYPE_ID_LEN
    }

    /// Borrow the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Finalize into the wire bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Cursor over one inbound message.
///
/// Borrows the raw buffer for the duration of a single dispatch; nothing
/// may retain it past the handler call.
#[derive(Debug)]
pub struct MessageReader<'a> {
    type_id: u16,
    payload: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    /// Parse the header, rejecting buffers shorter than [`TYPE_ID_LEN`].
    pub fn parse(buf: &'a [u8]) -> Result<Self, WireError> {
        if buf.len() < TYPE_ID_LEN {
            return Err(WireError::BufferUnderrun {
                needed: TYPE_ID_LEN - buf.len(),
                available: buf.len(),
            });
        }
        Ok(Self {
            type_id: u16::from_le_bytes([buf[0], buf[1]]),
            payload: &buf[TYPE_ID_LEN..],
            pos: 0,
        })
    }

    /// The message's type id.
    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let available = self.remaining();
        if n > available {
            return Err(WireError::BufferUnderrun {
                needed: n - available,
                available,
            });
        }
        let slice = &self.payload[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    /// Read a 16-bit integer.
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a 32-bit integer.
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidString)
    }

    /// Read `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }

    /// Read all bytes left in the message.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let slice = &self.payload[self.pos..];
        self.pos = self.payload.len();
        slice
    }
}
