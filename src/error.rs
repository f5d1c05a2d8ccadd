//! Error types shared by the client and server workers.
//!
//! Every failure here is local to the one worker that hit it; nothing in
//! this module aborts the process or touches another connection.

use std::fmt;
use std::io;

/// A message segment could not be allocated.
///
/// Raised by [`crate::message::Message::allocate`]; segments allocated
/// before the failing one are released when the partial message drops.
#[derive(Debug)]
pub struct AllocationError {
    /// Index of the segment that failed (0-7).
    pub segment: usize,
    /// Requested segment size in bytes.
    pub bytes: usize,
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to allocate segment {} ({} bytes)",
            self.segment, self.bytes
        )
    }
}

impl std::error::Error for AllocationError {}

/// Outcome of a failed send or receive.
///
/// Interrupted syscalls are retried inside the transfer helpers and never
/// reach this type.
#[derive(Debug)]
pub enum TransferError {
    /// The peer shut down the stream before or during a full message.
    /// Expected when a client finishes its run; not a failure.
    Closed,
    /// Any socket-level failure other than a clean close.
    Io(io::Error),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Closed => write!(f, "peer closed the connection"),
            TransferError::Io(e) => write!(f, "transfer failed: {e}"),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Closed => None,
            TransferError::Io(e) => Some(e),
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> Self {
        TransferError::Io(e)
    }
}
