//! Boundary to the physical USB/serial driver.
//!
//! This crate never talks to hardware directly; a platform-specific driver
//! implements [`Transport`] and everything above it is written against the
//! contract. Methods take `&self` so one handle can be shared between the
//! control plane (command sends) and the stream worker (chunk reads);
//! implementors provide their own interior mutability.

use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("device not found")]
    DeviceNotFound,

    #[error("channel is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),
}

/// Parameters for the device's streaming endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Upper bound on a single `read_chunk` transfer, in bytes.
    pub max_read_len: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_read_len: 32 * 1024,
        }
    }
}

/// Contract for the command/streaming channel to the device.
///
/// Requirements on implementors:
/// - `close` and `stop_streaming` are idempotent; `stop_streaming` is safe
///   even if streaming was never started.
/// - `read_chunk` returns an empty buffer on timeout and never blocks
///   longer than the given timeout.
pub trait Transport: Send + Sync {
    fn open(&self) -> Result<(), TransportError>;

    fn close(&self);

    /// Write one complete command frame to the control endpoint.
    fn send_command(&self, frame: &[u8]) -> Result<(), TransportError>;

    fn start_streaming(&self, config: &StreamConfig) -> Result<(), TransportError>;

    fn stop_streaming(&self);

    /// Read up to `max_len` raw streamed bytes, waiting at most `timeout`.
    fn read_chunk(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}
