//! Binary framing for the FPGA2025 USB-CDC protocol.
//!
//! Command frames travel host -> device, upload frames device -> host:
//!
//! ```text
//! Command: [0xAA,0x55][CMD:1][LEN:2 BE][PAYLOAD:LEN][CHK:1]
//! Upload:  [0xAA,0x44][SRC:1][LEN:2 BE][DATA:LEN]   [CHK:1]
//! ```
//!
//! The checksum is the wrapping byte sum of everything between the magic and
//! the checksum itself, length field included. The length field is always
//! big-endian; multi-byte values *inside* a payload follow the byte order of
//! the peripheral register they mirror, so the field helpers here take an
//! explicit [`ByteOrder`] instead of assuming one convention frame-wide.

/// Magic prefix of host -> device command frames.
pub const COMMAND_MAGIC: [u8; 2] = [0xAA, 0x55];
/// Magic prefix of device -> host upload frames.
pub const UPLOAD_MAGIC: [u8; 2] = [0xAA, 0x44];

/// Bytes of fixed prefix in an upload frame: magic(2) + source(1) + length(2).
const UPLOAD_PREFIX_LEN: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("payload of {len} bytes exceeds the 16-bit length field")]
    PayloadTooLarge { len: usize },
    #[error("sequencer channel {channel} outside 0..=7")]
    ChannelOutOfRange { channel: u8 },
    #[error("sequencer pattern length {length} outside 1..=64 bits")]
    SequenceLengthOutOfRange { length: u8 },
}

/// Byte order of a single multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

pub fn put_u16(buf: &mut Vec<u8>, value: u16, order: ByteOrder) {
    match order {
        ByteOrder::Big => buf.extend_from_slice(&value.to_be_bytes()),
        ByteOrder::Little => buf.extend_from_slice(&value.to_le_bytes()),
    }
}

pub fn put_u32(buf: &mut Vec<u8>, value: u32, order: ByteOrder) {
    match order {
        ByteOrder::Big => buf.extend_from_slice(&value.to_be_bytes()),
        ByteOrder::Little => buf.extend_from_slice(&value.to_le_bytes()),
    }
}

pub fn put_u64(buf: &mut Vec<u8>, value: u64, order: ByteOrder) {
    match order {
        ByteOrder::Big => buf.extend_from_slice(&value.to_be_bytes()),
        ByteOrder::Little => buf.extend_from_slice(&value.to_le_bytes()),
    }
}

/// Read a `u16` field, or `None` if fewer than two bytes are available.
pub fn read_u16(bytes: &[u8], order: ByteOrder) -> Option<u16> {
    let pair: [u8; 2] = bytes.get(..2)?.try_into().ok()?;
    Some(match order {
        ByteOrder::Big => u16::from_be_bytes(pair),
        ByteOrder::Little => u16::from_le_bytes(pair),
    })
}

/// Wrapping byte sum, the protocol's one-byte checksum.
fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encode a raw command frame around an already-built payload.
pub fn encode_command(code: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > usize::from(u16::MAX) {
        return Err(FrameError::PayloadTooLarge { len: payload.len() });
    }

    let mut frame = Vec::with_capacity(COMMAND_MAGIC.len() + 4 + payload.len());
    frame.extend_from_slice(&COMMAND_MAGIC);
    frame.push(code);
    put_u16(&mut frame, payload.len() as u16, ByteOrder::Big);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame[COMMAND_MAGIC.len()..]));
    Ok(frame)
}

/// I2C bus clock selection codes understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cClock {
    Khz50,
    Khz100,
    Khz200,
    Khz400,
}

impl I2cClock {
    pub fn code(self) -> u8 {
        match self {
            Self::Khz50 => 0x00,
            Self::Khz100 => 0x01,
            Self::Khz200 => 0x02,
            Self::Khz400 => 0x03,
        }
    }
}

/// Every command family the device understands, closed and exhaustively
/// matchable. Payload layouts mirror the device registers, which is why some
/// families carry big-endian parameters and the sequencer pattern word is
/// little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Begin continuous digital capture at `reference_clock / divider`.
    CaptureStart { divider: u16 },
    /// Halt digital capture.
    CaptureStop,
    UartConfig {
        baud: u32,
        data_bits: u8,
        stop_bits: u8,
        parity: u8,
    },
    UartTransmit { data: Vec<u8> },
    /// Request buffered UART receive data; the reply arrives as an upload frame.
    UartReceive,
    I2cConfig { address: u8, clock: I2cClock },
    I2cWrite { register: u16, data: Vec<u8> },
    I2cRead { register: u16, length: u16 },
    /// Load one channel of the pattern sequencer.
    SeqConfig {
        channel: u8,
        enable: bool,
        divider: u16,
        length: u8,
        pattern: u64,
    },
}

impl Command {
    pub fn code(&self) -> u8 {
        match self {
            Self::I2cConfig { .. } => 0x04,
            Self::I2cWrite { .. } => 0x05,
            Self::I2cRead { .. } => 0x06,
            Self::UartConfig { .. } => 0x07,
            Self::UartTransmit { .. } => 0x08,
            Self::UartReceive => 0x09,
            Self::CaptureStart { .. } => 0x0B,
            Self::CaptureStop => 0x0C,
            Self::SeqConfig { .. } => 0xF0,
        }
    }

    fn payload(&self) -> Result<Vec<u8>, FrameError> {
        let mut p = Vec::new();
        match self {
            Self::CaptureStart { divider } => {
                put_u16(&mut p, *divider, ByteOrder::Big);
            }
            Self::CaptureStop | Self::UartReceive => {}
            Self::UartConfig {
                baud,
                data_bits,
                stop_bits,
                parity,
            } => {
                put_u32(&mut p, *baud, ByteOrder::Big);
                p.push(*data_bits);
                p.push(*stop_bits);
                p.push(*parity);
            }
            Self::UartTransmit { data } => p.extend_from_slice(data),
            Self::I2cConfig { address, clock } => {
                p.push(*address);
                p.push(clock.code());
            }
            Self::I2cWrite { register, data } => {
                put_u16(&mut p, *register, ByteOrder::Big);
                p.extend_from_slice(data);
            }
            Self::I2cRead { register, length } => {
                put_u16(&mut p, *register, ByteOrder::Big);
                put_u16(&mut p, *length, ByteOrder::Big);
            }
            Self::SeqConfig {
                channel,
                enable,
                divider,
                length,
                pattern,
            } => {
                if *channel > 7 {
                    return Err(FrameError::ChannelOutOfRange { channel: *channel });
                }
                // The pattern register holds at most 64 bits; zero-length
                // sequences are meaningless to the device.
                if *length < 1 || *length > 64 {
                    return Err(FrameError::SequenceLengthOutOfRange { length: *length });
                }
                p.push(*channel);
                p.push(u8::from(*enable));
                put_u16(&mut p, *divider, ByteOrder::Big);
                p.push(*length);
                // Sequencer data register is little-endian, unlike the rest
                // of the payload.
                put_u64(&mut p, *pattern, ByteOrder::Little);
            }
        }
        Ok(p)
    }

    /// Encode this command as a complete checksummed frame.
    ///
    /// Fails when a field cannot be represented on the wire, such as a
    /// sequencer channel or pattern length outside the device's range.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_command(self.code(), &self.payload()?)
    }
}

/// A verified upload frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFrame {
    pub source: u8,
    pub data: Vec<u8>,
}

/// Result of scanning a buffer for one upload frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// A whole frame verified; `consumed` bytes (leading garbage included)
    /// can be dropped from the front of the buffer.
    Valid { frame: UploadFrame, consumed: usize },
    /// Magic matched but the checksum did not. Discard `resume` bytes (one
    /// past the magic byte) and rescan; never fatal.
    ChecksumMismatch { resume: usize },
    /// Not enough bytes yet for a verdict.
    Incomplete,
}

/// Scan `buf` for the next upload frame.
///
/// Leading bytes before the upload magic are skipped. No partial or corrupt
/// frame is ever surfaced as valid.
pub fn decode_upload(buf: &[u8]) -> UploadOutcome {
    let Some(start) = find_magic(buf) else {
        return UploadOutcome::Incomplete;
    };

    let frame = &buf[start..];
    if frame.len() < UPLOAD_PREFIX_LEN {
        return UploadOutcome::Incomplete;
    }

    let source = frame[2];
    // Length is always big-endian; prefix length checked above.
    let len = usize::from(read_u16(&frame[3..5], ByteOrder::Big).unwrap_or(0));
    let total = UPLOAD_PREFIX_LEN + len + 1;
    if frame.len() < total {
        return UploadOutcome::Incomplete;
    }

    let expected = checksum(&frame[2..UPLOAD_PREFIX_LEN + len]);
    let received = frame[UPLOAD_PREFIX_LEN + len];
    if expected != received {
        log::debug!(
            "upload checksum mismatch: calculated 0x{expected:02X}, received 0x{received:02X}"
        );
        return UploadOutcome::ChecksumMismatch { resume: start + 1 };
    }

    UploadOutcome::Valid {
        frame: UploadFrame {
            source,
            data: frame[UPLOAD_PREFIX_LEN..UPLOAD_PREFIX_LEN + len].to_vec(),
        },
        consumed: start + total,
    }
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    buf.windows(UPLOAD_MAGIC.len())
        .position(|w| w == UPLOAD_MAGIC)
}

/// Accumulates raw device bytes and yields only whole, verified upload
/// frames, resynchronizing past any corrupted or partial frame.
#[derive(Debug, Default)]
pub struct UploadDeframer {
    buf: Vec<u8>,
}

impl UploadDeframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next verified frame, if a whole one has accumulated.
    pub fn next_frame(&mut self) -> Option<UploadFrame> {
        loop {
            match decode_upload(&self.buf) {
                UploadOutcome::Valid { frame, consumed } => {
                    self.buf.drain(..consumed);
                    return Some(frame);
                }
                UploadOutcome::ChecksumMismatch { resume } => {
                    log::warn!("discarding corrupt upload frame, resynchronizing");
                    self.buf.drain(..resume);
                }
                UploadOutcome::Incomplete => {
                    self.discard_garbage();
                    return None;
                }
            }
        }
    }

    /// Bytes currently buffered, garbage included.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    // Drop bytes that can no longer start a frame, keeping a possible
    // partial magic at the tail.
    fn discard_garbage(&mut self) {
        if let Some(start) = find_magic(&self.buf) {
            self.buf.drain(..start);
        } else if self.buf.last() == Some(&UPLOAD_MAGIC[0]) {
            let tail = self.buf.len() - 1;
            self.buf.drain(..tail);
        } else {
            self.buf.clear();
        }
    }
}
