//! Vectored strategy: scatter/gather I/O straight over the segments.
//!
//! The 8 segments are handed to the kernel as one descriptor, so no
//! packing buffer and no extra copy exist on either side. This is the
//! entire difference from the buffered strategy.

use super::{recv_vectored_all, send_vectored_all, Strategy};
use crate::error::TransferError;
use crate::message::Message;
use std::net::TcpStream;

pub struct Vectored;

impl Strategy for Vectored {
    fn round_trip(
        &mut self,
        stream: &mut TcpStream,
        msg: &mut Message,
    ) -> Result<(), TransferError> {
        if msg.total() == 0 {
            return Ok(());
        }
        send_vectored_all(stream, &mut msg.io_slices())?;
        recv_vectored_all(stream, &mut msg.io_slices_mut())
    }

    fn echo_once(
        &mut self,
        stream: &mut TcpStream,
        msg: &mut Message,
    ) -> Result<(), TransferError> {
        if msg.total() == 0 {
            return Ok(());
        }
        recv_vectored_all(stream, &mut msg.io_slices_mut())?;
        send_vectored_all(stream, &mut msg.io_slices())
    }
}
