//! Scripted in-memory transport used by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::transport::{StreamConfig, Transport, TransportError};

/// Route `log` output through the test harness; honors `RUST_LOG`.
/// Safe to call from every test, first caller wins.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    streaming: bool,
    sent: Vec<Vec<u8>>,
    stream: VecDeque<u8>,
    fail_reads: bool,
    fail_sends: bool,
}

/// A [`Transport`] whose stream contents and failures are scripted by the
/// test. Reads serve queued bytes immediately and simulate the timeout when
/// the script runs dry.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn connected() -> Arc<Self> {
        let transport = Self::default();
        transport.lock().open = true;
        Arc::new(transport)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Append bytes for future `read_chunk` calls to serve.
    pub fn queue_stream_bytes(&self, bytes: &[u8]) {
        self.lock().stream.extend(bytes);
    }

    /// Every command frame sent so far, oldest first.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    pub fn set_read_failure(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn set_send_failure(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }
}

impl Transport for MockTransport {
    fn open(&self) -> Result<(), TransportError> {
        self.lock().open = true;
        Ok(())
    }

    fn close(&self) {
        let mut state = self.lock();
        state.open = false;
        state.streaming = false;
    }

    fn send_command(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.fail_sends {
            return Err(TransportError::Io("scripted send failure".into()));
        }
        if !state.open {
            return Err(TransportError::Closed);
        }
        state.sent.push(frame.to_vec());
        Ok(())
    }

    fn start_streaming(&self, _config: &StreamConfig) -> Result<(), TransportError> {
        self.lock().streaming = true;
        Ok(())
    }

    fn stop_streaming(&self) {
        self.lock().streaming = false;
    }

    fn read_chunk(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        {
            let mut state = self.lock();
            if state.fail_reads {
                return Err(TransportError::Io("scripted read failure".into()));
            }
            if !state.stream.is_empty() {
                let take = max_len.min(state.stream.len());
                return Ok(state.stream.drain(..take).collect());
            }
        }
        // Script ran dry: behave like a device with nothing to say.
        thread::sleep(timeout);
        Ok(Vec::new())
    }
}
