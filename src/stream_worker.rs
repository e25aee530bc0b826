//! Streaming drain thread between the transport and the display side.
//!
//! The worker runs on its own thread for the lifetime of a session group:
//! `start_stream`/`stop_stream` toggle active draining without tearing the
//! thread down, `stop_worker` terminates it for good. While draining it
//! coalesces small transport reads into larger chunks and pushes them into a
//! bounded queue. A full queue drops the chunk and counts it; the producer
//! never blocks, because blocking here would stall the transport read loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::transport::{StreamConfig, Transport, TransportError};

/// Chunks the queue holds before backpressure drops kick in.
pub const QUEUE_CAPACITY: usize = 8192;

/// Flush the coalescing buffer at this size...
const COALESCE_TARGET: usize = 256 * 1024;
/// ...or this long after the previous flush, whichever comes first.
const COALESCE_INTERVAL: Duration = Duration::from_millis(10);

/// Per-read timeout; bounds how quickly the worker observes stop requests.
const READ_TIMEOUT: Duration = Duration::from_millis(10);
/// Poll period while idle (not draining).
const IDLE_POLL: Duration = Duration::from_millis(50);
/// Pause after a transport error before retrying the read.
const ERROR_BACKOFF: Duration = Duration::from_millis(20);

/// One drain cycle's output. Transport failures travel through the same
/// queue as data so the consumer observes them in order.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Data(Vec<u8>),
    Failed(TransportError),
}

/// Shared diagnostic counters; cloneable, lock-free.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    drop_count: Arc<AtomicU64>,
    bytes_pushed: Arc<AtomicU64>,
}

impl StreamStats {
    /// Chunks discarded because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.drop_count.load(Ordering::Relaxed)
    }

    /// Payload bytes successfully queued.
    pub fn bytes_pushed(&self) -> u64 {
        self.bytes_pushed.load(Ordering::Relaxed)
    }
}

// Accumulates reads until either the size or the interval threshold trips.
struct Coalescer {
    buf: Vec<u8>,
    last_flush: Instant,
}

impl Coalescer {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn should_flush(&self) -> bool {
        self.buf.len() >= COALESCE_TARGET
            || (!self.buf.is_empty() && self.last_flush.elapsed() >= COALESCE_INTERVAL)
    }

    // Resets the flush timer; returns the buffer only if non-empty.
    fn take(&mut self) -> Option<Vec<u8>> {
        self.last_flush = Instant::now();
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

// Drop-newest push. Never blocks: a full queue means visible, counted loss.
fn push_chunk(sender: &Sender<StreamChunk>, stats: &StreamStats, chunk: StreamChunk) {
    let payload_len = match &chunk {
        StreamChunk::Data(bytes) => bytes.len() as u64,
        StreamChunk::Failed(_) => 0,
    };
    match sender.try_send(chunk) {
        Ok(()) => {
            stats.bytes_pushed.fetch_add(payload_len, Ordering::Relaxed);
        }
        Err(TrySendError::Full(_)) => {
            stats.drop_count.fetch_add(1, Ordering::Relaxed);
        }
        Err(TrySendError::Disconnected(_)) => {
            // Consumer is gone; the worker will be shut down shortly.
        }
    }
}

/// Handle to the drain thread.
pub struct StreamWorker {
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    stats: StreamStats,
    handle: Option<JoinHandle<()>>,
}

impl StreamWorker {
    /// Spawn the drain thread against `transport`, returning the worker
    /// handle and the consumer end of the bounded queue. The thread starts
    /// idle; call [`start_stream`](Self::start_stream) to begin draining.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        config: StreamConfig,
    ) -> (Self, Receiver<StreamChunk>) {
        let (sender, receiver) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        let running = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = StreamStats::default();

        let handle = {
            let running = Arc::clone(&running);
            let shutdown = Arc::clone(&shutdown);
            let stats = stats.clone();
            thread::spawn(move || run(&*transport, &sender, &running, &shutdown, &stats, config))
        };

        (
            Self {
                running,
                shutdown,
                stats,
                handle: Some(handle),
            },
            receiver,
        )
    }

    /// Begin draining the transport's streaming channel.
    pub fn start_stream(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Stop draining; the thread stays alive, idle, ready to restart.
    pub fn stop_stream(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_draining(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> StreamStats {
        self.stats.clone()
    }

    /// Terminate the thread permanently and wait for it to exit.
    pub fn stop_worker(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.running.store(false, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("stream worker thread panicked");
            }
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn run(
    transport: &dyn Transport,
    sender: &Sender<StreamChunk>,
    running: &AtomicBool,
    shutdown: &AtomicBool,
    stats: &StreamStats,
    config: StreamConfig,
) {
    log::debug!("stream worker started");
    let mut coalescer = Coalescer::new();

    while !shutdown.load(Ordering::Acquire) {
        if !running.load(Ordering::Acquire) {
            // Draining -> Idle: flush whatever accumulated so no partial
            // chunk is silently lost, and keep the timer fresh for restart.
            if let Some(buf) = coalescer.take() {
                push_chunk(sender, stats, StreamChunk::Data(buf));
            }
            thread::sleep(IDLE_POLL);
            continue;
        }

        match transport.read_chunk(config.max_read_len, READ_TIMEOUT) {
            Ok(bytes) => coalescer.push(&bytes),
            Err(err) => {
                log::warn!("stream read failed: {err}");
                push_chunk(sender, stats, StreamChunk::Failed(err));
                thread::sleep(ERROR_BACKOFF);
                continue;
            }
        }

        if coalescer.should_flush() {
            if let Some(buf) = coalescer.take() {
                push_chunk(sender, stats, StreamChunk::Data(buf));
            }
        }
    }

    if let Some(buf) = coalescer.take() {
        push_chunk(sender, stats, StreamChunk::Data(buf));
    }
    log::debug!("stream worker stopped");
}
