//! Capture session lifecycle: the control plane around the stream.
//!
//! `CaptureController` owns the worker and the sample ring, drives the
//! command frames for start/stop, and is ticked once per display refresh to
//! move queued chunks into the ring. Transport failures halt the session and
//! require an explicit restart; this layer never retries on its own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::frame_codec::{Command, FrameError};
use crate::sample_rate::RateParameter;
use crate::sample_ring::SampleRing;
use crate::stream_worker::{StreamChunk, StreamStats, StreamWorker};
use crate::transport::{StreamConfig, Transport, TransportError};

/// `Active` with no data for this long reports [`CaptureStatus::Stale`].
const HEALTH_TIMEOUT: Duration = Duration::from_millis(600);

/// Fast rates need a longer settle window before trusting the stream.
const FAST_RATE_THRESHOLD_HZ: f64 = 200_000.0;
const FAST_SETTLE: Duration = Duration::from_millis(1500);
const MIN_SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("frame encoding failed: {0}")]
    Frame(#[from] FrameError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Starting { settle_until: Instant },
    Active,
    Stopping,
    Error,
}

/// Operator-visible session status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    /// Start command sent; queued chunks are being discarded until the
    /// settle window elapses.
    Starting,
    Running,
    /// Active, but nothing has arrived within the health timeout.
    Stale,
    /// Transport failed; an explicit restart is required.
    Error(String),
}

/// One diagnostics snapshot, cheap enough for every refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    pub status: CaptureStatus,
    pub total_samples: u64,
    pub dropped_chunks: u64,
    pub achievable_hz: Option<f64>,
}

/// Orchestrates one capture session at a time against a shared transport.
pub struct CaptureController {
    transport: Arc<dyn Transport>,
    worker: StreamWorker,
    receiver: Receiver<StreamChunk>,
    stats: StreamStats,
    ring: SampleRing,
    stream_config: StreamConfig,
    state: SessionState,
    rate: Option<RateParameter>,
    last_data: Instant,
    last_error: Option<TransportError>,
}

impl CaptureController {
    /// Open the transport and spawn the (idle) stream worker.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self, CaptureError> {
        Self::with_ring(transport, SampleRing::default())
    }

    pub fn with_ring(
        transport: Arc<dyn Transport>,
        ring: SampleRing,
    ) -> Result<Self, CaptureError> {
        transport.open()?;
        let stream_config = StreamConfig::default();
        let (worker, receiver) = StreamWorker::spawn(Arc::clone(&transport), stream_config);
        let stats = worker.stats();
        Ok(Self {
            transport,
            worker,
            receiver,
            stats,
            ring,
            stream_config,
            state: SessionState::Idle,
            rate: None,
            last_data: Instant::now(),
            last_error: None,
        })
    }

    /// Begin a capture session at (the closest achievable rate to)
    /// `target_hz`. Returns the quantized rate actually configured.
    pub fn start(&mut self, target_hz: u32) -> Result<RateParameter, CaptureError> {
        self.worker.stop_stream();

        // Defensive STOP clears any stale device-side capture state before
        // the new configuration goes out.
        self.send(&Command::CaptureStop)?;
        self.flush_queue();
        self.ring.reset();

        let rate = RateParameter::from_target_hz(target_hz);
        self.transport.start_streaming(&self.stream_config)?;
        self.worker.start_stream();
        self.send(&Command::CaptureStart {
            divider: rate.divider(),
        })?;

        let settle = settle_window(rate.achievable_hz());
        log::debug!(
            "capture starting: divider={} achievable={:.1} Hz settle={:?}",
            rate.divider(),
            rate.achievable_hz(),
            settle
        );

        self.rate = Some(rate);
        self.last_error = None;
        self.last_data = Instant::now();
        self.state = SessionState::Starting {
            settle_until: Instant::now() + settle,
        };
        Ok(rate)
    }

    /// End the session. Best effort: a device that stopped answering still
    /// leaves the host side idle and flushed.
    pub fn stop(&mut self) {
        self.state = SessionState::Stopping;
        if let Err(err) = self.send(&Command::CaptureStop) {
            log::warn!("stop command failed: {err}");
        }
        self.worker.stop_stream();
        self.transport.stop_streaming();
        self.flush_queue();
        self.state = SessionState::Idle;
        log::debug!("capture stopped");
    }

    /// Drain every queued chunk; call once per display refresh.
    ///
    /// While `Starting`, data is discarded so samples captured under the
    /// previous configuration never reach the ring; once the settle window
    /// elapses the session turns `Active` and chunks are ingested.
    pub fn tick(&mut self) {
        while let Ok(chunk) = self.receiver.try_recv() {
            self.on_chunk(chunk);
        }

        if let SessionState::Starting { settle_until } = self.state {
            if Instant::now() >= settle_until {
                log::debug!("settle window elapsed, capture active");
                self.state = SessionState::Active;
                self.last_data = Instant::now();
            }
        }
    }

    pub fn status(&self) -> CaptureStatus {
        match self.state {
            SessionState::Idle | SessionState::Stopping => CaptureStatus::Idle,
            SessionState::Starting { .. } => CaptureStatus::Starting,
            SessionState::Active => {
                if self.last_data.elapsed() > HEALTH_TIMEOUT {
                    CaptureStatus::Stale
                } else {
                    CaptureStatus::Running
                }
            }
            SessionState::Error => CaptureStatus::Error(
                self.last_error
                    .as_ref()
                    .map_or_else(|| "unknown transport failure".into(), ToString::to_string),
            ),
        }
    }

    pub fn report(&self) -> CaptureReport {
        CaptureReport {
            status: self.status(),
            total_samples: self.ring.total_samples(),
            dropped_chunks: self.stats.drop_count(),
            achievable_hz: self.rate.map(|r| r.achievable_hz()),
        }
    }

    /// Ordered per-channel view of the ring; see [`SampleRing::snapshot`].
    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.ring.snapshot()
    }

    /// The rate configured by the last successful [`start`](Self::start).
    pub fn active_rate(&self) -> Option<RateParameter> {
        self.rate
    }

    /// Stop the session, terminate the worker thread, release the transport.
    pub fn shutdown(mut self) {
        self.stop();
        self.worker.stop_worker();
        self.transport.close();
    }

    fn send(&mut self, command: &Command) -> Result<(), CaptureError> {
        let frame = command.encode()?;
        if let Err(err) = self.transport.send_command(&frame) {
            self.fail(err.clone());
            return Err(err.into());
        }
        Ok(())
    }

    // A worker read that was in flight when the session ended can still
    // deliver a failure chunk; only a live session may latch `Error`.
    fn on_chunk(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::Failed(err) => match self.state {
                SessionState::Starting { .. } | SessionState::Active => self.fail(err),
                SessionState::Idle | SessionState::Stopping | SessionState::Error => {
                    log::debug!("ignoring stream error outside a live session: {err}");
                }
            },
            StreamChunk::Data(bytes) => {
                if self.state == SessionState::Active {
                    self.ring.ingest(&bytes);
                    self.last_data = Instant::now();
                }
            }
        }
    }

    fn fail(&mut self, err: TransportError) {
        log::error!("capture halted by transport failure: {err}");
        self.last_error = Some(err);
        self.state = SessionState::Error;
        self.worker.stop_stream();
    }

    fn flush_queue(&self) {
        while self.receiver.try_recv().is_ok() {}
    }
}

fn settle_window(achievable_hz: f64) -> Duration {
    if achievable_hz > FAST_RATE_THRESHOLD_HZ {
        FAST_SETTLE
    } else {
        MIN_SETTLE.max(Duration::from_secs_f64(10.0 / achievable_hz.max(1.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{init_test_logging, MockTransport};
    use std::thread;

    const STOP_FRAME: [u8; 6] = [0xAA, 0x55, 0x0C, 0x00, 0x00, 0x0C];

    fn tick_until<F: Fn(&CaptureController) -> bool>(
        controller: &mut CaptureController,
        timeout: Duration,
        done: F,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            controller.tick();
            if done(controller) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_start_sends_stop_then_start() {
        let transport = MockTransport::connected();
        let mut controller = CaptureController::new(Arc::clone(&transport) as Arc<dyn Transport>).unwrap();

        let rate = controller.start(100_000).unwrap();
        assert_eq!(rate.divider(), 600);
        assert!((rate.achievable_hz() - 100_000.0).abs() < f64::EPSILON);

        let sent = transport.sent_frames();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], STOP_FRAME);
        // START with divider 600 = 0x0258.
        assert_eq!(sent[1], [0xAA, 0x55, 0x0B, 0x00, 0x02, 0x02, 0x58, 0x67]);

        assert_eq!(controller.status(), CaptureStatus::Starting);
        assert!(transport.is_streaming());
        controller.shutdown();
    }

    #[test]
    fn test_settle_discards_stale_then_ingests() {
        init_test_logging();
        let transport = MockTransport::connected();
        let mut controller = CaptureController::new(Arc::clone(&transport) as Arc<dyn Transport>).unwrap();

        // Bytes from "the previous configuration", available immediately.
        transport.queue_stream_bytes(&[0xFF; 64]);
        controller.start(100_000).unwrap();

        // Everything drained during the settle window must be discarded.
        assert!(tick_until(
            &mut controller,
            Duration::from_secs(2),
            |c| c.status() == CaptureStatus::Running,
        ));
        assert_eq!(controller.report().total_samples, 0);

        // Fresh bytes after settling are ingested: channel 0 sees bit 0.
        transport.queue_stream_bytes(&[0x01, 0x02, 0x04]);
        assert!(tick_until(
            &mut controller,
            Duration::from_secs(2),
            |c| c.report().total_samples == 3,
        ));
        let snap = controller.snapshot();
        assert_eq!(snap[0], vec![1, 0, 0]);
        assert_eq!(snap[1], vec![0, 1, 0]);
        assert_eq!(snap[2], vec![0, 0, 1]);
        controller.shutdown();
    }

    #[test]
    fn test_transport_failure_halts_session() {
        init_test_logging();
        let transport = MockTransport::connected();
        let mut controller = CaptureController::new(Arc::clone(&transport) as Arc<dyn Transport>).unwrap();
        controller.start(100_000).unwrap();

        transport.set_read_failure(true);
        assert!(tick_until(
            &mut controller,
            Duration::from_secs(2),
            |c| matches!(c.status(), CaptureStatus::Error(_)),
        ));

        // No automatic retry: the state sticks until an explicit restart.
        controller.tick();
        assert!(matches!(controller.status(), CaptureStatus::Error(_)));

        transport.set_read_failure(false);
        controller.start(100_000).unwrap();
        assert_eq!(controller.status(), CaptureStatus::Starting);
        controller.shutdown();
    }

    #[test]
    fn test_active_without_data_reports_stale() {
        init_test_logging();
        let transport = MockTransport::connected();
        let mut controller = CaptureController::new(Arc::clone(&transport) as Arc<dyn Transport>).unwrap();
        controller.start(100_000).unwrap();

        assert!(tick_until(
            &mut controller,
            Duration::from_secs(2),
            |c| c.status() == CaptureStatus::Running,
        ));

        thread::sleep(HEALTH_TIMEOUT + Duration::from_millis(50));
        controller.tick();
        assert_eq!(controller.status(), CaptureStatus::Stale);
        controller.shutdown();
    }

    #[test]
    fn test_straggler_error_chunk_after_stop_is_ignored() {
        init_test_logging();
        let transport = MockTransport::connected();
        let mut controller = CaptureController::new(Arc::clone(&transport) as Arc<dyn Transport>).unwrap();
        controller.start(100_000).unwrap();
        controller.stop();

        // A read that was in flight during stop() can fail after the queue
        // flush and land while idle; it must not latch the error state.
        controller.on_chunk(StreamChunk::Failed(TransportError::Io(
            "read aborted mid-stop".into(),
        )));
        controller.tick();
        assert_eq!(controller.status(), CaptureStatus::Idle);

        // The next session starts cleanly and errors still work within it.
        controller.start(100_000).unwrap();
        controller.on_chunk(StreamChunk::Failed(TransportError::Io(
            "device unplugged".into(),
        )));
        assert!(matches!(controller.status(), CaptureStatus::Error(_)));
        controller.shutdown();
    }

    #[test]
    fn test_stop_returns_to_idle() {
        let transport = MockTransport::connected();
        let mut controller = CaptureController::new(Arc::clone(&transport) as Arc<dyn Transport>).unwrap();
        controller.start(100_000).unwrap();

        controller.stop();
        assert_eq!(controller.status(), CaptureStatus::Idle);
        assert!(!transport.is_streaming());
        // STOP, START, then the session-ending STOP.
        assert_eq!(transport.sent_frames().last().unwrap(), &STOP_FRAME);
        controller.shutdown();
    }

    #[test]
    fn test_failed_start_command_reports_error() {
        let transport = MockTransport::connected();
        let mut controller = CaptureController::new(Arc::clone(&transport) as Arc<dyn Transport>).unwrap();

        transport.set_send_failure(true);
        assert!(controller.start(100_000).is_err());
        assert!(matches!(controller.status(), CaptureStatus::Error(_)));
        controller.shutdown();
    }

    #[test]
    fn test_settle_window_policy() {
        assert_eq!(settle_window(1_000_000.0), FAST_SETTLE);
        assert_eq!(settle_window(100_000.0), MIN_SETTLE);
        // Very slow rates wait for ~10 sample periods.
        assert_eq!(settle_window(10.0), Duration::from_secs(1));
    }
}
