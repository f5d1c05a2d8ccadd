//! TCP echo server: one blocking worker thread per connection.
//!
//! The listener accepts in an unbounded loop and never waits on the
//! workers it spawns; join handles are tracked in a registry so finished
//! workers are reaped as the server runs and everything is joined if the
//! accept path dies. A worker failure only ever takes down its own
//! connection.

use crate::config::ServerConfig;
use crate::error::TransferError;
use crate::message::{Message, SegmentLayout};
use crate::strategy::{self, StrategyKind};
use slab::Slab;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Accept backlog.
const LISTEN_BACKLOG: i32 = 1024;

/// Tracks join handles for in-flight connection workers.
///
/// Finished workers are reaped opportunistically on each accept, so the
/// slab stays proportional to the number of live connections and the
/// server can report how many are active.
struct WorkerRegistry {
    workers: Slab<JoinHandle<()>>,
}

impl WorkerRegistry {
    fn new() -> Self {
        Self {
            workers: Slab::new(),
        }
    }

    /// Number of tracked workers (live plus not-yet-reaped).
    fn len(&self) -> usize {
        self.workers.len()
    }

    fn insert(&mut self, handle: JoinHandle<()>) -> usize {
        self.workers.insert(handle)
    }

    /// Join every worker that has already exited.
    fn reap(&mut self) {
        let finished: Vec<usize> = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| id)
            .collect();
        for id in finished {
            let _ = self.workers.remove(id).join();
        }
    }

    /// Join everything, finished or not.
    fn join_all(&mut self) {
        for handle in self.workers.drain() {
            let _ = handle.join();
        }
    }
}

/// Echo server bound to its listen address.
pub struct Server {
    listener: TcpListener,
    layout: SegmentLayout,
    strategy: StrategyKind,
    workers: WorkerRegistry,
}

impl Server {
    /// Bind the listen socket. No connections are accepted yet.
    pub fn bind(config: &ServerConfig) -> io::Result<Self> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        Ok(Self {
            listener: create_listener(addr)?,
            layout: SegmentLayout::for_total(config.message_size),
            strategy: config.strategy,
            workers: WorkerRegistry::new(),
        })
    }

    /// The bound address (useful when configured with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the accept path fails.
    ///
    /// An accept failure is the one process-fatal condition: it is
    /// reported, in-flight workers are joined, and the error is returned.
    pub fn run(mut self) -> io::Result<()> {
        info!(
            addr = %self.listener.local_addr()?,
            message_size = self.layout.total(),
            strategy = ?self.strategy,
            "Server listening"
        );

        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.workers.reap();

                    let layout = self.layout;
                    let kind = self.strategy;
                    let handle = thread::Builder::new()
                        .name(format!("conn-{peer}"))
                        .spawn(move || connection_worker(stream, peer, layout, kind))?;

                    self.workers.insert(handle);
                    debug!(peer = %peer, active = self.workers.len(), "Connection accepted");
                }
                Err(e) => {
                    error!(error = %e, "Accept failed, shutting down");
                    self.workers.join_all();
                    return Err(e);
                }
            }
        }
    }
}

/// Serve one connection: allocate, then receive-and-echo until the peer
/// closes or a transfer fails. All resources drop on every exit path.
fn connection_worker(
    mut stream: TcpStream,
    peer: SocketAddr,
    layout: SegmentLayout,
    kind: StrategyKind,
) {
    let mut strategy = match strategy::create(kind, layout.total()) {
        Ok(s) => s,
        Err(e) => {
            error!(peer = %peer, error = %e, "Strategy unavailable");
            return;
        }
    };
    if let Err(e) = strategy.prepare(&stream) {
        warn!(peer = %peer, error = %e, "Socket setup failed");
        return;
    }

    let mut msg = match Message::allocate(&layout) {
        Ok(m) => m,
        Err(e) => {
            error!(peer = %peer, error = %e, "Message allocation failed");
            return;
        }
    };

    // A zero-size message moves no bytes, so the only observable event on
    // this connection is the peer closing it.
    if layout.total() == 0 {
        wait_for_close(&mut stream);
        debug!(peer = %peer, "Connection closed");
        return;
    }

    let mut rounds: u64 = 0;
    loop {
        match strategy.echo_once(&mut stream, &mut msg) {
            Ok(()) => rounds += 1,
            Err(TransferError::Closed) => {
                debug!(peer = %peer, rounds, "Connection closed");
                break;
            }
            Err(e) => {
                warn!(peer = %peer, rounds, error = %e, "Connection failed");
                break;
            }
        }
    }
}

/// Park until the peer closes its write side. By construction no payload
/// bytes ever arrive on a zero-size connection, so any read outcome ends
/// the wait.
fn wait_for_close(stream: &mut TcpStream) {
    let mut probe = [0u8; 1];
    let _ = stream.read(&mut probe);
}

/// Create the listen socket with an explicit backlog.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::segment_pattern;
    use std::io::Write;
    use std::time::Duration;

    fn test_config(strategy: StrategyKind, message_size: usize) -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            message_size,
            strategy,
        }
    }

    fn spawn_server(strategy: StrategyKind, message_size: usize) -> SocketAddr {
        let server = Server::bind(&test_config(strategy, message_size)).unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || {
            let _ = server.run();
        });
        addr
    }

    /// The packed wire image of a filled message.
    fn wire_pattern(total: usize) -> Vec<u8> {
        let layout = SegmentLayout::for_total(total);
        let mut bytes = Vec::with_capacity(total);
        for (i, &size) in layout.sizes().iter().enumerate() {
            bytes.extend(std::iter::repeat(segment_pattern(i)).take(size));
        }
        bytes
    }

    #[test]
    fn test_worker_echoes_and_exits_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let layout = SegmentLayout::for_total(128);

        let worker = thread::spawn(move || {
            let (stream, peer) = listener.accept().unwrap();
            connection_worker(stream, peer, layout, StrategyKind::Buffered);
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let request = wire_pattern(128);
        for _ in 0..3 {
            client.write_all(&request).unwrap();
            let mut echo = vec![0u8; 128];
            client.read_exact(&mut echo).unwrap();
            assert_eq!(echo, request);
        }
        drop(client);

        // Clean close path: the worker exits rather than hanging.
        worker.join().unwrap();
    }

    #[test]
    fn test_worker_exits_on_close_with_zero_size_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let layout = SegmentLayout::for_total(0);

        let worker = thread::spawn(move || {
            let (stream, peer) = listener.accept().unwrap();
            connection_worker(stream, peer, layout, StrategyKind::Buffered);
        });

        let client = TcpStream::connect(addr).unwrap();
        thread::sleep(Duration::from_millis(50));
        drop(client);
        worker.join().unwrap();
    }

    #[test]
    fn test_concurrent_connections_do_not_cross_talk() {
        let total = 256;
        let addr = spawn_server(StrategyKind::Vectored, total);

        let clients: Vec<_> = (0..4u8)
            .map(|id| {
                thread::spawn(move || {
                    let mut stream = TcpStream::connect(addr).unwrap();
                    // Each client sends its own recognizable payload.
                    let request = vec![0xA0 | id; total];
                    for _ in 0..16 {
                        stream.write_all(&request).unwrap();
                        let mut echo = vec![0u8; total];
                        stream.read_exact(&mut echo).unwrap();
                        assert_eq!(echo, request, "cross-talk for client {id}");
                    }
                })
            })
            .collect();

        for client in clients {
            client.join().unwrap();
        }
    }

    #[test]
    fn test_server_echoes_under_buffered_strategy() {
        let total = 127;
        let addr = spawn_server(StrategyKind::Buffered, total);

        let mut stream = TcpStream::connect(addr).unwrap();
        let request = wire_pattern(total);
        stream.write_all(&request).unwrap();
        let mut echo = vec![0u8; total];
        stream.read_exact(&mut echo).unwrap();
        assert_eq!(echo, request);
    }
}
