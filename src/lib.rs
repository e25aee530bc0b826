//! # DigiCap RS
//!
//! Device-communication core for FPGA2025-class digital-capture controllers:
//! a checksummed binary framing protocol for configuration and command
//! traffic, plus a continuous streaming-capture pipeline that keeps a live
//! eight-channel feed flowing without stalling the control plane.
//!
//! ## Features
//!
//! - **Command framing**: checksummed `0xAA55` command frames for every
//!   peripheral family (capture, UART, I2C, sequencer), with per-field byte
//!   order declared rather than assumed
//! - **Upload decoding**: `0xAA44` upload frames with forward scanning and
//!   automatic resynchronization past corrupt or partial data
//! - **Streaming capture**: a dedicated drain thread coalescing transport
//!   reads into bounded-queue chunks, dropping (and counting) under overload
//!   instead of ever blocking the read loop
//! - **Sample demultiplexing**: a fixed-capacity ring unpacking each
//!   streamed byte into eight single-bit channels for display
//! - **Session control**: start/stop/tick lifecycle with settle windows,
//!   stale detection and explicit error surfacing
//!
//! ## Examples
//!
//! ### Driving a capture session
//!
//! ```rust,no_run
//! use digicap_rs::{CaptureController, CaptureStatus, Transport};
//! use std::sync::Arc;
//!
//! # fn connect_device() -> Arc<dyn Transport> { unimplemented!() }
//! let transport: Arc<dyn Transport> = connect_device();
//! let mut capture = CaptureController::new(transport)?;
//!
//! // The device quantizes the request; use the reported rate, not the ask.
//! let rate = capture.start(1_000_000)?;
//! println!("capturing at {:.0} Hz", rate.achievable_hz());
//!
//! loop {
//!     capture.tick();
//!     match capture.status() {
//!         CaptureStatus::Running => {
//!             let channels = capture.snapshot();
//!             println!("channel 0: {} samples", channels[0].len());
//!         }
//!         CaptureStatus::Error(e) => {
//!             eprintln!("capture halted: {e}");
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok::<(), digicap_rs::CaptureError>(())
//! ```
//!
//! ### Encoding command frames
//!
//! ```rust
//! use digicap_rs::Command;
//!
//! let stop = Command::CaptureStop.encode()?;
//! assert_eq!(stop, [0xAA, 0x55, 0x0C, 0x00, 0x00, 0x0C]);
//!
//! let start = Command::CaptureStart { divider: 60 }.encode()?;
//! assert_eq!(start, [0xAA, 0x55, 0x0B, 0x00, 0x02, 0x00, 0x3C, 0x49]);
//! # Ok::<(), digicap_rs::FrameError>(())
//! ```
//!
//! ### Decoding uploads with resynchronization
//!
//! ```rust
//! use digicap_rs::UploadDeframer;
//!
//! let mut deframer = UploadDeframer::new();
//! deframer.feed(&[0xAA, 0x44, 0x04, 0x00, 0x02, 0xBE, 0xEF, 0xB3]);
//! let frame = deframer.next_frame().expect("complete frame");
//! assert_eq!(frame.source, 0x04);
//! assert_eq!(frame.data, [0xBE, 0xEF]);
//! ```

pub mod capture;
pub mod frame_codec;
pub mod sample_rate;
pub mod sample_ring;
pub mod stream_worker;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the main types for convenience
pub use capture::{CaptureController, CaptureError, CaptureReport, CaptureStatus};

pub use frame_codec::{
    decode_upload, encode_command, ByteOrder, Command, FrameError, I2cClock, UploadDeframer,
    UploadFrame, UploadOutcome,
};

pub use sample_rate::{RateParameter, MAX_DIVIDER, MIN_DIVIDER, REFERENCE_CLOCK_HZ};

pub use sample_ring::{SampleRing, CHANNELS, DEFAULT_CAPACITY};

pub use stream_worker::{StreamChunk, StreamStats, StreamWorker, QUEUE_CAPACITY};

pub use transport::{StreamConfig, Transport, TransportError};
