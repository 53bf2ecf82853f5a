/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Payload buffers and the factory that produces them.
//!
//! Sessions never allocate payloads on their own: every buffer goes through an
//! injected [`DataBufferFactory`], so the allocation strategy stays with
//! whoever builds the session.

use crate::error::SessionError;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

/// Shared handle to a buffer factory. Outlives any single session.
pub type SharedBufferFactory = Arc<dyn DataBufferFactory>;

/// Immutable, cheaply cloneable message payload.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct DataBuffer {
    bytes: Bytes,
}

impl DataBuffer {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Decode the payload as UTF-8.
    pub fn to_utf8(&self) -> Result<String, SessionError> {
        std::str::from_utf8(&self.bytes)
            .map(str::to_owned)
            .map_err(|e| SessionError::InvalidPayload(format!("payload is not UTF-8: {e}")))
    }
}

impl From<Bytes> for DataBuffer {
    fn from(bytes: Bytes) -> Self {
        Self { bytes }
    }
}

impl From<Vec<u8>> for DataBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Bytes::from(bytes),
        }
    }
}

impl From<BytesMut> for DataBuffer {
    fn from(bytes: BytesMut) -> Self {
        Self {
            bytes: bytes.freeze(),
        }
    }
}

impl AsRef<[u8]> for DataBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for DataBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBuffer")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Allocates and wraps payload bytes.
///
/// Implementations must be stateless or internally synchronized: one factory
/// is shared by every session it is handed to.
pub trait DataBufferFactory: Send + Sync + fmt::Debug {
    /// A writable buffer with at least `capacity` bytes reserved.
    fn allocate(&self, capacity: usize) -> BytesMut;

    /// Wrap existing bytes without copying.
    fn wrap(&self, bytes: Bytes) -> DataBuffer;

    fn wrap_vec(&self, bytes: Vec<u8>) -> DataBuffer {
        self.wrap(Bytes::from(bytes))
    }

    fn copy_from_slice(&self, bytes: &[u8]) -> DataBuffer {
        let mut buf = self.allocate(bytes.len());
        buf.extend_from_slice(bytes);
        DataBuffer::from(buf)
    }
}

/// Heap allocating factory backed by `bytes`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultBufferFactory;

impl DefaultBufferFactory {
    pub fn shared() -> SharedBufferFactory {
        Arc::new(Self)
    }
}

impl DataBufferFactory for DefaultBufferFactory {
    fn allocate(&self, capacity: usize) -> BytesMut {
        BytesMut::with_capacity(capacity)
    }

    fn wrap(&self, bytes: Bytes) -> DataBuffer {
        DataBuffer::from(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_keeps_bytes() {
        let factory = DefaultBufferFactory;
        let buf = factory.wrap_vec(vec![1, 2, 3]);
        assert_eq!(buf.as_bytes(), &[1, 2, 3]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_copy_from_slice_allocates_through_factory() {
        let factory = DefaultBufferFactory;
        let buf = factory.copy_from_slice(b"abc");
        assert_eq!(buf.to_utf8().unwrap(), "abc");
    }

    #[test]
    fn test_to_utf8_rejects_invalid_sequences() {
        let buf = DataBuffer::from(vec![0xff, 0xfe]);
        assert!(matches!(
            buf.to_utf8(),
            Err(SessionError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_debug_hides_contents() {
        let buf = DataBuffer::from(b"secret".to_vec());
        assert_eq!(format!("{buf:?}"), "DataBuffer { len: 6 }");
    }
}
