//! Transmission strategies for moving one message across a socket.
//!
//! Three variants, selectable at runtime:
//! - `buffered`: pack the segments into one contiguous buffer, copy on
//!   receive
//! - `vectored`: scatter/gather directly over the segments, no packing
//! - `zero-copy`: vectored send with `MSG_ZEROCOPY`, completion-tracked on
//!   the socket error queue (Linux only)
//!
//! All variants share the same full-transfer contract: partial transfers
//! are resumed until the whole message has moved, interrupted syscalls are
//! retried transparently, and a zero-length read is a clean peer close.

mod buffered;
mod vectored;
#[cfg(target_os = "linux")]
mod zero_copy;

pub use buffered::Buffered;
pub use vectored::Vectored;
#[cfg(target_os = "linux")]
pub use zero_copy::ZeroCopy;

use crate::error::TransferError;
use crate::message::Message;
use clap::ValueEnum;
use serde::Deserialize;
use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::net::TcpStream;

/// Which transmission strategy a worker uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Pack into one contiguous buffer and copy on receive.
    Buffered,
    /// Scatter/gather directly over the segments.
    Vectored,
    /// Vectored send with `MSG_ZEROCOPY` (Linux only).
    ZeroCopy,
}

/// One transmission strategy, owned by a single worker.
///
/// Implementations hold whatever scratch state the variant needs; nothing
/// here is shared between workers.
pub trait Strategy: Send {
    /// One-time socket setup after connect/accept. Default: nothing.
    fn prepare(&mut self, _stream: &TcpStream) -> Result<(), TransferError> {
        Ok(())
    }

    /// Client side of one round trip: send `msg`, then read the echo back.
    fn round_trip(&mut self, stream: &mut TcpStream, msg: &mut Message)
        -> Result<(), TransferError>;

    /// Server side of one round trip: receive one full message, then echo
    /// it back unmodified.
    fn echo_once(&mut self, stream: &mut TcpStream, msg: &mut Message)
        -> Result<(), TransferError>;
}

/// Build the strategy for `kind`, with scratch sized for `total` bytes.
pub fn create(kind: StrategyKind, total: usize) -> io::Result<Box<dyn Strategy>> {
    match kind {
        StrategyKind::Buffered => Ok(Box::new(Buffered::new(total))),
        StrategyKind::Vectored => Ok(Box::new(Vectored)),
        #[cfg(target_os = "linux")]
        StrategyKind::ZeroCopy => Ok(Box::new(ZeroCopy::new())),
        #[cfg(not(target_os = "linux"))]
        StrategyKind::ZeroCopy => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "zero-copy send requires Linux",
        )),
    }
}

/// Write all of `buf`, resuming partial writes.
///
/// `write_all` already retries `EINTR`; a write that can make no progress
/// surfaces as `WriteZero`, which means the peer is gone.
pub(crate) fn send_all(stream: &mut TcpStream, buf: &[u8]) -> Result<(), TransferError> {
    stream.write_all(buf).map_err(|e| match e.kind() {
        io::ErrorKind::WriteZero => TransferError::Closed,
        _ => TransferError::Io(e),
    })
}

/// Read exactly `buf.len()` bytes, resuming partial reads.
///
/// End-of-stream anywhere inside the message is a clean close; the peer
/// never half-sends a message on purpose.
pub(crate) fn recv_all(stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), TransferError> {
    stream.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => TransferError::Closed,
        _ => TransferError::Io(e),
    })
}

/// Write every byte described by `slices`, advancing the descriptor on
/// partial completion. One `writev` in the common case.
pub(crate) fn send_vectored_all(
    stream: &mut TcpStream,
    slices: &mut [IoSlice<'_>],
) -> Result<(), TransferError> {
    let mut remaining: usize = slices.iter().map(|s| s.len()).sum();
    let mut bufs = slices;

    while remaining > 0 {
        match stream.write_vectored(bufs) {
            Ok(0) => return Err(TransferError::Closed),
            Ok(n) => {
                remaining -= n;
                IoSlice::advance_slices(&mut bufs, n);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransferError::Io(e)),
        }
    }
    Ok(())
}

/// Read bytes into every region described by `slices`, advancing the
/// descriptor on partial completion. One `readv` in the common case.
pub(crate) fn recv_vectored_all(
    stream: &mut TcpStream,
    slices: &mut [IoSliceMut<'_>],
) -> Result<(), TransferError> {
    let mut remaining: usize = slices.iter().map(|s| s.len()).sum();
    let mut bufs = slices;

    while remaining > 0 {
        match stream.read_vectored(bufs) {
            Ok(0) => return Err(TransferError::Closed),
            Ok(n) => {
                remaining -= n;
                IoSliceMut::advance_slices(&mut bufs, n);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransferError::Io(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{segment_pattern, SegmentLayout, SEGMENT_COUNT};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    /// The wire image of a freshly filled message of `total` bytes.
    fn pattern_bytes(total: usize) -> Vec<u8> {
        let layout = SegmentLayout::for_total(total);
        let mut bytes = Vec::with_capacity(total);
        for (i, &size) in layout.sizes().iter().enumerate() {
            bytes.extend(std::iter::repeat(segment_pattern(i)).take(size));
        }
        bytes
    }

    /// Accept one connection and hand it to `peer` on its own thread;
    /// returns the client-side stream.
    fn loopback_pair<F>(peer: F) -> (TcpStream, thread::JoinHandle<()>)
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            peer(stream);
        });
        (TcpStream::connect(addr).unwrap(), handle)
    }

    /// Drive one client round trip against a peer that checks the request
    /// bytes and replies with their bitwise complement, so the test can
    /// prove the receive path actually wrote the buffers.
    fn check_round_trip(kind: StrategyKind, total: usize) {
        let expected = pattern_bytes(total);
        let reply: Vec<u8> = expected.iter().map(|b| !b).collect();

        let expected_clone = expected.clone();
        let reply_clone = reply.clone();
        let (mut client, peer) = loopback_pair(move |mut stream| {
            let mut request = vec![0u8; total];
            stream.read_exact(&mut request).unwrap();
            assert_eq!(request, expected_clone);
            stream.write_all(&reply_clone).unwrap();
        });

        let layout = SegmentLayout::for_total(total);
        let mut msg = Message::allocate(&layout).unwrap();
        let mut strategy = create(kind, total).unwrap();
        if strategy.prepare(&client).is_err() {
            // Kernel without zero-copy support; nothing to test here.
            drop(client);
            peer.join().ok();
            return;
        }

        msg.fill();
        strategy.round_trip(&mut client, &mut msg).unwrap();
        peer.join().unwrap();

        // Vectored strategies receive the echo into the segments; the
        // buffered strategy keeps it in its opaque echo buffer.
        match kind {
            StrategyKind::Buffered => {
                for i in 0..SEGMENT_COUNT {
                    assert!(msg.segment(i).iter().all(|&b| b == segment_pattern(i)));
                }
            }
            _ => {
                let mut received = Vec::with_capacity(total);
                for i in 0..SEGMENT_COUNT {
                    received.extend_from_slice(msg.segment(i));
                }
                assert_eq!(received, reply);
            }
        }
    }

    #[test]
    fn test_buffered_round_trip() {
        for total in [1, 7, 8, 127, 128, 4096] {
            check_round_trip(StrategyKind::Buffered, total);
        }
    }

    #[test]
    fn test_vectored_round_trip() {
        for total in [1, 7, 8, 127, 128, 4096] {
            check_round_trip(StrategyKind::Vectored, total);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_zero_copy_round_trip() {
        for total in [1, 7, 8, 127, 128, 4096] {
            check_round_trip(StrategyKind::ZeroCopy, total);
        }
    }

    #[test]
    fn test_zero_total_round_trip_is_noop() {
        #[cfg(target_os = "linux")]
        let kinds = [
            StrategyKind::Buffered,
            StrategyKind::Vectored,
            StrategyKind::ZeroCopy,
        ];
        #[cfg(not(target_os = "linux"))]
        let kinds = [StrategyKind::Buffered, StrategyKind::Vectored];

        for kind in kinds {
            let (mut client, peer) = loopback_pair(move |stream| {
                // Nothing moves on the wire for an empty message.
                drop(stream);
            });

            let layout = SegmentLayout::for_total(0);
            let mut msg = Message::allocate(&layout).unwrap();
            let mut strategy = create(kind, 0).unwrap();
            msg.fill();
            strategy.round_trip(&mut client, &mut msg).unwrap();
            peer.join().unwrap();
        }
    }

    /// A peer that moves bytes one at a time in both directions still
    /// yields a byte-exact round trip.
    fn check_dribbling_peer(kind: StrategyKind, total: usize) {
        let expected = pattern_bytes(total);
        let reply: Vec<u8> = expected.iter().map(|b| !b).collect();

        let expected_clone = expected.clone();
        let reply_clone = reply.clone();
        let (mut client, peer) = loopback_pair(move |mut stream| {
            let mut request = vec![0u8; total];
            for byte in request.iter_mut() {
                stream.read_exact(std::slice::from_mut(byte)).unwrap();
            }
            assert_eq!(request, expected_clone);
            for &byte in &reply_clone {
                stream.write_all(&[byte]).unwrap();
                stream.flush().unwrap();
            }
        });

        // Shrink the socket buffers so even the send side sees partial
        // completion, not just the dribbled receive.
        let sock = socket2::SockRef::from(&client);
        let _ = sock.set_send_buffer_size(4096);
        let _ = sock.set_recv_buffer_size(4096);

        let layout = SegmentLayout::for_total(total);
        let mut msg = Message::allocate(&layout).unwrap();
        let mut strategy = create(kind, total).unwrap();
        msg.fill();
        strategy.round_trip(&mut client, &mut msg).unwrap();
        peer.join().unwrap();

        if kind == StrategyKind::Vectored {
            let mut received = Vec::with_capacity(total);
            for i in 0..SEGMENT_COUNT {
                received.extend_from_slice(msg.segment(i));
            }
            assert_eq!(received, reply);
        }
    }

    #[test]
    fn test_buffered_partial_transfers() {
        check_dribbling_peer(StrategyKind::Buffered, 1024);
    }

    #[test]
    fn test_vectored_partial_transfers() {
        check_dribbling_peer(StrategyKind::Vectored, 1024);
    }

    #[test]
    fn test_recv_half_message_then_close_is_closed() {
        let total = 128;
        let (mut client, peer) = loopback_pair(move |mut stream| {
            let mut request = vec![0u8; total];
            stream.read_exact(&mut request).unwrap();
            // Echo only half the message, then disappear.
            stream.write_all(&request[..total / 2]).unwrap();
        });

        let layout = SegmentLayout::for_total(total);
        let mut msg = Message::allocate(&layout).unwrap();
        let mut strategy = create(StrategyKind::Vectored, total).unwrap();
        msg.fill();
        let err = strategy.round_trip(&mut client, &mut msg).unwrap_err();
        assert!(matches!(err, TransferError::Closed));
        peer.join().unwrap();
    }

    #[test]
    fn test_echo_once_reports_close() {
        let total = 64;
        let (client, peer) = loopback_pair(move |mut stream| {
            // Serve one echo, then observe the close.
            let mut strategy = create(StrategyKind::Buffered, total).unwrap();
            let layout = SegmentLayout::for_total(total);
            let mut msg = Message::allocate(&layout).unwrap();
            strategy.echo_once(&mut stream, &mut msg).unwrap();
            let err = strategy.echo_once(&mut stream, &mut msg).unwrap_err();
            assert!(matches!(err, TransferError::Closed));
        });

        let mut client = client;
        let request = pattern_bytes(total);
        client.write_all(&request).unwrap();
        let mut echo = vec![0u8; total];
        client.read_exact(&mut echo).unwrap();
        assert_eq!(echo, request);
        drop(client);
        peer.join().unwrap();
    }
}
