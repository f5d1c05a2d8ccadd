//! Buffered strategy: copy through one contiguous scratch buffer.
//!
//! Send packs the 8 segments into the scratch buffer and writes it whole;
//! receive reads the whole message into scratch. The server unpacks the
//! scratch back into the segments before echoing it verbatim; the client
//! reads the echo into a second buffer it never inspects. The two copies
//! per direction are the cost this strategy exists to measure.

use super::{recv_all, send_all, Strategy};
use crate::error::TransferError;
use crate::message::Message;
use bytes::BytesMut;
use std::net::TcpStream;

pub struct Buffered {
    /// Packed outbound/inbound message.
    scratch: BytesMut,
    /// Echo bytes on the client side, treated as opaque.
    echo: BytesMut,
}

impl Buffered {
    pub fn new(total: usize) -> Self {
        Self {
            scratch: BytesMut::zeroed(total),
            echo: BytesMut::zeroed(total),
        }
    }

    /// Contents of the most recently received echo, for testing.
    #[cfg(test)]
    pub fn echo(&self) -> &[u8] {
        &self.echo
    }
}

impl Strategy for Buffered {
    fn round_trip(
        &mut self,
        stream: &mut TcpStream,
        msg: &mut Message,
    ) -> Result<(), TransferError> {
        msg.pack_into(&mut self.scratch);
        send_all(stream, &self.scratch)?;
        recv_all(stream, &mut self.echo)
    }

    fn echo_once(
        &mut self,
        stream: &mut TcpStream,
        msg: &mut Message,
    ) -> Result<(), TransferError> {
        recv_all(stream, &mut self.scratch)?;
        // Unpack into the segments before echoing, like a server that
        // actually consumed the fields would.
        msg.unpack_from(&self.scratch);
        send_all(stream, &self.scratch)
    }
}
