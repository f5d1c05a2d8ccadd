//! Load-generating client: one blocking worker thread per simulated
//! client connection.
//!
//! Every worker connects, then spins fill → send → receive-echo until a
//! shared deadline passes. There is deliberately no pacing or back-off;
//! throughput is whatever the strategy and the socket allow. The driver
//! joins all workers, aggregates their reports, and logs the run summary.

use crate::config::ClientConfig;
use crate::error::TransferError;
use crate::message::{Message, SegmentLayout};
use crate::strategy::{self, StrategyKind};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What one load worker accomplished.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerReport {
    /// Completed round trips.
    pub rounds: u64,
    /// Payload bytes sent (the same count came back as echoes).
    pub bytes_sent: u64,
}

/// Aggregated outcome of a whole run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub rounds: u64,
    pub bytes_sent: u64,
    pub elapsed: Duration,
}

/// Run the benchmark: spawn the configured number of workers, wait for
/// all of them, and report. Returning is the run's termination point.
pub fn run(config: &ClientConfig) -> io::Result<RunSummary> {
    let addr = resolve_peer(config)?;
    let layout = SegmentLayout::for_total(config.message_size);
    let deadline = Instant::now() + Duration::from_secs(config.duration);

    info!(
        peer = %addr,
        connections = config.connections,
        message_size = config.message_size,
        duration_secs = config.duration,
        strategy = ?config.strategy,
        "Starting benchmark"
    );

    let start = Instant::now();
    let mut handles = Vec::with_capacity(config.connections);
    for worker_id in 0..config.connections {
        let kind = config.strategy;
        let handle = thread::Builder::new()
            .name(format!("load-{worker_id}"))
            .spawn(move || load_worker(worker_id, addr, layout, kind, deadline))?;
        handles.push(handle);
    }

    let mut summary = RunSummary {
        rounds: 0,
        bytes_sent: 0,
        elapsed: Duration::ZERO,
    };
    for handle in handles {
        if let Ok(report) = handle.join() {
            summary.rounds += report.rounds;
            summary.bytes_sent += report.bytes_sent;
        }
    }
    summary.elapsed = start.elapsed();

    let secs = summary.elapsed.as_secs_f64();
    info!(
        rounds = summary.rounds,
        bytes_sent = summary.bytes_sent,
        elapsed_secs = secs,
        rounds_per_sec = summary.rounds as f64 / secs,
        mb_per_sec = summary.bytes_sent as f64 / secs / (1024.0 * 1024.0),
        "Benchmark complete"
    );

    Ok(summary)
}

/// One simulated client: connect, allocate, exchange until the deadline.
///
/// Connect failure is reported and ends the worker without retrying; the
/// benchmark only counts sessions that actually connected. The deadline
/// is checked at the top of each iteration, so an in-flight exchange may
/// overrun it by up to one round trip.
fn load_worker(
    worker_id: usize,
    addr: SocketAddr,
    layout: SegmentLayout,
    kind: StrategyKind,
    deadline: Instant,
) -> WorkerReport {
    let mut report = WorkerReport::default();

    let mut stream = match TcpStream::connect(addr) {
        Ok(s) => s,
        Err(e) => {
            error!(worker = worker_id, error = %e, "Connect failed");
            return report;
        }
    };

    let mut strategy = match strategy::create(kind, layout.total()) {
        Ok(s) => s,
        Err(e) => {
            error!(worker = worker_id, error = %e, "Strategy unavailable");
            return report;
        }
    };
    if let Err(e) = strategy.prepare(&stream) {
        error!(worker = worker_id, error = %e, "Socket setup failed");
        return report;
    }

    let mut msg = match Message::allocate(&layout) {
        Ok(m) => m,
        Err(e) => {
            error!(worker = worker_id, error = %e, "Message allocation failed");
            return report;
        }
    };

    while Instant::now() < deadline {
        msg.fill();
        match strategy.round_trip(&mut stream, &mut msg) {
            Ok(()) => {
                report.rounds += 1;
                report.bytes_sent += layout.total() as u64;
            }
            Err(TransferError::Closed) => {
                debug!(worker = worker_id, rounds = report.rounds, "Server closed connection");
                break;
            }
            Err(e) => {
                warn!(worker = worker_id, rounds = report.rounds, error = %e, "Exchange failed");
                break;
            }
        }
    }

    debug!(
        worker = worker_id,
        rounds = report.rounds,
        bytes_sent = report.bytes_sent,
        "Worker finished"
    );
    report
}

fn resolve_peer(config: &ClientConfig) -> io::Result<SocketAddr> {
    (config.host.as_str(), config.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address found for {}:{}", config.host, config.port),
            )
        })
}
