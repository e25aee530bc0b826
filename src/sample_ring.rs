//! Fixed-capacity circular buffer for demultiplexed digital samples.
//!
//! The capture stream is unframed: one raw byte per sample tick, bit `i`
//! carrying the logic level of channel `i`. Each incoming byte is unpacked
//! through a 256-entry lookup table into eight single-bit samples, and a
//! shared write cursor wraps all channels together.

/// Number of digital channels carried in each streamed byte.
pub const CHANNELS: usize = 8;

/// Default per-channel capacity, sized for one display window.
pub const DEFAULT_CAPACITY: usize = 4096;

// byte value -> one 0/1 sample per channel, LSB first.
const fn build_lookup() -> [[u8; CHANNELS]; 256] {
    let mut table = [[0u8; CHANNELS]; 256];
    let mut byte = 0;
    while byte < 256 {
        let mut bit = 0;
        while bit < CHANNELS {
            table[byte][bit] = ((byte >> bit) & 1) as u8;
            bit += 1;
        }
        byte += 1;
    }
    table
}

static BIT_LOOKUP: [[u8; CHANNELS]; 256] = build_lookup();

/// Multi-channel sample ring, owned exclusively by the consumer side.
#[derive(Debug)]
pub struct SampleRing {
    channels: [Vec<u8>; CHANNELS],
    capacity: usize,
    cursor: usize,
    valid: usize,
    total: u64,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: std::array::from_fn(|_| vec![0; capacity]),
            capacity,
            cursor: 0,
            valid: 0,
            total: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples per channel currently held, up to capacity.
    pub fn valid_samples(&self) -> usize {
        self.valid
    }

    /// Samples ingested over the whole session, drops not included.
    pub fn total_samples(&self) -> u64 {
        self.total
    }

    /// Unpack a streamed chunk into the ring, one sample per byte.
    ///
    /// A chunk at least as large as the capacity overwrites the whole ring
    /// with its tail; anything smaller writes at the cursor and wraps.
    pub fn ingest(&mut self, chunk: &[u8]) {
        let n = chunk.len();
        if n == 0 {
            return;
        }

        if n >= self.capacity {
            let tail = &chunk[n - self.capacity..];
            for (offset, byte) in tail.iter().enumerate() {
                self.write_sample(offset, *byte);
            }
            self.cursor = 0;
            self.valid = self.capacity;
        } else {
            for (offset, byte) in chunk.iter().enumerate() {
                let index = (self.cursor + offset) % self.capacity;
                self.write_sample(index, *byte);
            }
            self.cursor = (self.cursor + n) % self.capacity;
            self.valid = self.capacity.min(self.valid + n);
        }

        self.total += n as u64;
    }

    fn write_sample(&mut self, index: usize, byte: u8) {
        let bits = &BIT_LOOKUP[usize::from(byte)];
        for (channel, bit) in self.channels.iter_mut().zip(bits) {
            channel[index] = *bit;
        }
    }

    /// Logical-order view of every channel, oldest to newest.
    ///
    /// O(capacity); intended to run once per display refresh, not per sample.
    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.channels
            .iter()
            .map(|channel| {
                if self.valid < self.capacity {
                    channel[..self.valid].to_vec()
                } else {
                    let mut ordered = Vec::with_capacity(self.capacity);
                    ordered.extend_from_slice(&channel[self.cursor..]);
                    ordered.extend_from_slice(&channel[..self.cursor]);
                    ordered
                }
            })
            .collect()
    }

    /// Zero everything; called at the start of every capture session.
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.iter_mut().for_each(|s| *s = 0);
        }
        self.cursor = 0;
        self.valid = 0;
        self.total = 0;
    }
}

impl Default for SampleRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_unpacks_lsb_first() {
        assert_eq!(BIT_LOOKUP[0x01], [1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(BIT_LOOKUP[0x80], [0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(BIT_LOOKUP[0xA5], [1, 0, 1, 0, 0, 1, 0, 1]);
    }

    #[test]
    fn test_partial_fill_returns_prefix() {
        let mut ring = SampleRing::new(8);
        ring.ingest(&[0x01, 0x00, 0x01]);
        assert_eq!(ring.valid_samples(), 3);

        let snap = ring.snapshot();
        assert_eq!(snap.len(), CHANNELS);
        assert_eq!(snap[0], vec![1, 0, 1]);
        assert_eq!(snap[1], vec![0, 0, 0]);
    }

    #[test]
    fn test_wraparound_keeps_newest_window() {
        let capacity = 8;
        let overshoot = 3;
        let mut ring = SampleRing::new(capacity);

        // Bytes 0..11; channel 0 sees each byte's bit 0.
        let input: Vec<u8> = (0..(capacity + overshoot) as u8).collect();
        for byte in &input {
            ring.ingest(&[*byte]);
        }

        assert_eq!(ring.valid_samples(), capacity);
        let snap = ring.snapshot();
        assert_eq!(snap[0].len(), capacity);

        // Oldest surviving sample is input byte index `overshoot`.
        let expected: Vec<u8> = input[overshoot..].iter().map(|b| b & 1).collect();
        assert_eq!(snap[0], expected);
    }

    #[test]
    fn test_oversized_chunk_overwrites_whole_ring() {
        let mut ring = SampleRing::new(4);
        ring.ingest(&[0xFF; 3]);

        let chunk: Vec<u8> = vec![0x00, 0x00, 0x01, 0x00, 0x01, 0x01];
        ring.ingest(&chunk);

        assert_eq!(ring.valid_samples(), 4);
        let snap = ring.snapshot();
        // Last 4 bytes of the chunk, in order.
        assert_eq!(snap[0], vec![1, 0, 1, 1]);
    }

    #[test]
    fn test_chunk_spanning_the_seam() {
        let mut ring = SampleRing::new(4);
        ring.ingest(&[0x01, 0x01, 0x01]);
        // Cursor at 3; this chunk wraps past the end.
        ring.ingest(&[0x00, 0x00]);

        let snap = ring.snapshot();
        assert_eq!(snap[0], vec![1, 1, 0, 0]);

        ring.ingest(&[0x01]);
        let snap = ring.snapshot();
        assert_eq!(snap[0], vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ring = SampleRing::new(4);
        ring.ingest(&[0xFF; 6]);
        assert_eq!(ring.total_samples(), 6);

        ring.reset();
        assert_eq!(ring.valid_samples(), 0);
        assert_eq!(ring.total_samples(), 0);
        assert!(ring.snapshot()[0].is_empty());
    }
}
