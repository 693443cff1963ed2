use std::io::{Error, ErrorKind};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProbeError;

/// Every request and response on the wire is exactly this many bytes.
pub const WIRE_VALUE_LEN: usize = 8;

/// Big-endian (network order) encoding of a wire value.
pub fn encode(value: u64) -> [u8; WIRE_VALUE_LEN] {
    value.to_be_bytes()
}

/// Decodes a wire value. Buffers of any length other than [`WIRE_VALUE_LEN`]
/// are logged with their raw contents and rejected.
pub fn decode(buf: &[u8]) -> Result<u64, ProbeError> {
    if buf.len() != WIRE_VALUE_LEN {
        tracing::warn!("Malformed wire value [len={}, bytes={:?}]", buf.len(), buf);
        return Err(if buf.len() < WIRE_VALUE_LEN {
            ProbeError::ShortRead { got: buf.len() }
        } else {
            ProbeError::InvalidLength { got: buf.len() }
        });
    }
    let mut bytes = [0u8; WIRE_VALUE_LEN];
    bytes.copy_from_slice(buf);
    Ok(u64::from_be_bytes(bytes))
}

// Frames a byte stream into a sequence of u64 values, used by the peer side
// through `Framed`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntCodec;

impl Decoder for IntCodec {
    type Item = u64;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<u64>, Error> {
        if src.len() < WIRE_VALUE_LEN {
            src.reserve(WIRE_VALUE_LEN - src.len());
            return Ok(None);
        }
        let mut frame = src.split_to(WIRE_VALUE_LEN);
        Ok(Some(frame.get_u64()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<u64>, Error> {
        match self.decode(src)? {
            Some(value) => Ok(Some(value)),
            None if src.is_empty() => Ok(None),
            None => Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "stream closed with a partial frame of {} bytes",
                    src.len()
                ),
            )),
        }
    }
}

impl Encoder<u64> for IntCodec {
    type Error = Error;

    fn encode(&mut self, item: u64, dst: &mut BytesMut) -> Result<(), Error> {
        dst.reserve(WIRE_VALUE_LEN);
        dst.put_u64(item);
        Ok(())
    }
}
