use std::io;

use thiserror::Error;

use crate::codec::WIRE_VALUE_LEN;

// Raw errno values of the "resource temporarily unavailable" / "no buffer space"
// family that the standard library leaves uncategorized on some platforms.
#[cfg(target_os = "linux")]
const RESOURCE_EXHAUSTED_CODES: &[i32] = &[11, 105];
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
const RESOURCE_EXHAUSTED_CODES: &[i32] = &[35, 55];
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
)))]
const RESOURCE_EXHAUSTED_CODES: &[i32] = &[];

/// Failure kinds observed while exchanging wire values with a peer.
#[derive(Debug, Error)]
pub enum ProbeError {
    // The io error already names the condition, e.g. "Connection reset by
    // peer (os error 104)", so we print it as is.
    #[error(transparent)]
    ConnectionReset(io::Error),

    #[error(transparent)]
    ResourceExhausted(io::Error),

    #[error("short read: expected {} bytes, got {got}", WIRE_VALUE_LEN)]
    ShortRead { got: usize },

    #[error("invalid frame length: expected {} bytes, got {got}", WIRE_VALUE_LEN)]
    InvalidLength { got: usize },

    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        use io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                ProbeError::ConnectionReset(err)
            }
            ErrorKind::WouldBlock | ErrorKind::OutOfMemory => ProbeError::ResourceExhausted(err),
            _ if err
                .raw_os_error()
                .map_or(false, |code| RESOURCE_EXHAUSTED_CODES.contains(&code)) =>
            {
                ProbeError::ResourceExhausted(err)
            }
            _ => ProbeError::Io(err),
        }
    }
}
