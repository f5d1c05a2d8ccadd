//! Zero-copy strategy: `MSG_ZEROCOPY` sends over the segment descriptor.
//!
//! The send side asks the kernel to pin the caller's pages instead of
//! copying them into socket buffers. Completion is asynchronous: the
//! kernel posts a notification on the socket error queue once it has
//! stopped referencing the pages, and only then may the segments be
//! refilled or received into. This implementation drains those
//! notifications after every send, before the echo is read back into the
//! same segments; reusing the buffers earlier would race the in-flight
//! send (see DESIGN.md).
//!
//! Linux only: requires `SO_ZEROCOPY` (kernel 4.14+ for TCP). Sends that
//! the kernel chooses to copy anyway still produce a notification and are
//! handled identically.
//!
//! The receive path is plain vectored I/O; there is nothing zero-copy
//! about a receive into user memory, and the descriptor is the same.

use super::{recv_vectored_all, Strategy};
use crate::error::TransferError;
use crate::message::{Message, SEGMENT_COUNT};
use std::io;
use std::mem;
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};

/// `SO_EE_ORIGIN_ZEROCOPY` from `<linux/errqueue.h>`; not re-exported by
/// the `libc` version in use, so it is defined here with its UAPI value.
const SO_EE_ORIGIN_ZEROCOPY: u8 = 5;

pub struct ZeroCopy {
    /// Sequence the kernel will assign to the next zero-copy send.
    /// Starts at 0 on a fresh socket and wraps at `u32::MAX`.
    next_seq: u32,
    /// One past the highest completed sequence. Sends are outstanding
    /// while `completed != next_seq`.
    completed: u32,
}

impl ZeroCopy {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            completed: 0,
        }
    }

    /// Send the whole message with `MSG_ZEROCOPY`, resuming partial
    /// completion. Every syscall that moves bytes consumes one kernel
    /// sequence number.
    fn send_zero_copy(&mut self, fd: RawFd, msg: &Message) -> Result<(), TransferError> {
        let mut iovecs: [libc::iovec; SEGMENT_COUNT] = std::array::from_fn(|i| {
            let segment = msg.segment(i);
            libc::iovec {
                iov_base: segment.as_ptr() as *mut libc::c_void,
                iov_len: segment.len(),
            }
        });

        let mut first = 0;
        let mut remaining = msg.total();

        while remaining > 0 {
            skip_empty(&iovecs, &mut first);

            let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
            hdr.msg_iov = iovecs[first..].as_mut_ptr();
            hdr.msg_iovlen = (SEGMENT_COUNT - first) as _;

            let flags = libc::MSG_ZEROCOPY | libc::MSG_NOSIGNAL;
            let n = unsafe { libc::sendmsg(fd, &hdr, flags) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(TransferError::Io(err));
            }
            if n == 0 {
                return Err(TransferError::Closed);
            }

            self.next_seq = self.next_seq.wrapping_add(1);
            remaining -= n as usize;
            advance_iovecs(&mut iovecs, &mut first, n as usize);
        }
        Ok(())
    }

    /// Block until the kernel has released every outstanding send.
    fn await_completions(&mut self, fd: RawFd) -> Result<(), TransferError> {
        while self.completed != self.next_seq {
            // The error queue raises POLLERR unconditionally; no events
            // need to be requested.
            let mut pollfd = libc::pollfd {
                fd,
                events: 0,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut pollfd, 1, -1) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(TransferError::Io(err));
            }
            self.drain_error_queue(fd)?;
        }
        Ok(())
    }

    /// Consume whatever completion notifications are queued right now.
    fn drain_error_queue(&mut self, fd: RawFd) -> Result<(), TransferError> {
        loop {
            // u64 storage keeps the control buffer aligned for cmsghdr.
            let mut control = [0u64; 16];
            let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
            hdr.msg_control = control.as_mut_ptr() as *mut libc::c_void;
            hdr.msg_controllen = mem::size_of_val(&control) as _;

            let n = unsafe { libc::recvmsg(fd, &mut hdr, libc::MSG_ERRQUEUE) };
            if n < 0 {
                let err = io::Error::last_os_error();
                return match err.kind() {
                    // Queue drained for now.
                    io::ErrorKind::WouldBlock => Ok(()),
                    io::ErrorKind::Interrupted => continue,
                    _ => Err(TransferError::Io(err)),
                };
            }

            let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&hdr) };
            while !cmsg.is_null() {
                let header = unsafe { &*cmsg };
                let recverr = (header.cmsg_level == libc::SOL_IP
                    && header.cmsg_type == libc::IP_RECVERR)
                    || (header.cmsg_level == libc::SOL_IPV6
                        && header.cmsg_type == libc::IPV6_RECVERR);
                if recverr {
                    let err = unsafe {
                        &*(libc::CMSG_DATA(cmsg) as *const libc::sock_extended_err)
                    };
                    if err.ee_origin == SO_EE_ORIGIN_ZEROCOPY && err.ee_errno == 0 {
                        // ee_info..=ee_data is an inclusive range of
                        // completed sequence numbers.
                        self.completed = err.ee_data.wrapping_add(1);
                    }
                }
                cmsg = unsafe { libc::CMSG_NXTHDR(&hdr, cmsg) };
            }
        }
    }
}

impl Strategy for ZeroCopy {
    /// Opt the socket into zero-copy sends. Fails on kernels without
    /// `SO_ZEROCOPY` support.
    fn prepare(&mut self, stream: &TcpStream) -> Result<(), TransferError> {
        let enable: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                stream.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_ZEROCOPY,
                &enable as *const _ as *const libc::c_void,
                mem::size_of_val(&enable) as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(TransferError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn round_trip(
        &mut self,
        stream: &mut TcpStream,
        msg: &mut Message,
    ) -> Result<(), TransferError> {
        if msg.total() == 0 {
            return Ok(());
        }
        let fd = stream.as_raw_fd();
        self.send_zero_copy(fd, msg)?;
        self.await_completions(fd)?;
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
        let fd = stream.as_raw_fd();
        recv_vectored_all(stream, &mut msg.io_slices_mut())?;
        self.send_zero_copy(fd, msg)?;
        self.await_completions(fd)
    }
}

/// Step past fully consumed regions.
fn skip_empty(iovecs: &[libc::iovec; SEGMENT_COUNT], first: &mut usize) {
    while *first < SEGMENT_COUNT && iovecs[*first].iov_len == 0 {
        *first += 1;
    }
}

/// Advance the descriptor by `n` transferred bytes.
fn advance_iovecs(iovecs: &mut [libc::iovec; SEGMENT_COUNT], first: &mut usize, mut n: usize) {
    while n > 0 {
        let iov = &mut iovecs[*first];
        if iov.iov_len <= n {
            n -= iov.iov_len;
            iov.iov_len = 0;
            *first += 1;
        } else {
            iov.iov_base = unsafe { (iov.iov_base as *mut u8).add(n) } as *mut libc::c_void;
            iov.iov_len -= n;
            n = 0;
        }
    }
}
