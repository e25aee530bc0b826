//! Sample-rate divider math for the capture START command.
//!
//! The device derives its sample clock by integer division of a fixed 60 MHz
//! reference, so most requested rates are not exactly achievable. The
//! achievable rate is computed from the clamped divider and reported back
//! instead of being assumed equal to the request.

/// Reference clock feeding the capture divider, in Hz.
pub const REFERENCE_CLOCK_HZ: u32 = 60_000_000;

/// Smallest divider the device accepts.
pub const MIN_DIVIDER: u16 = 1;

/// Largest divider representable in the 16-bit START payload field.
pub const MAX_DIVIDER: u16 = u16::MAX;

/// A divider/rate pair mirroring the device's rate register.
///
/// Threaded explicitly through the capture session rather than held as
/// ambient state, so host and device never disagree about the active rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateParameter {
    divider: u16,
    achievable_hz: f64,
}

impl RateParameter {
    /// Quantize a target rate to the nearest achievable divider.
    ///
    /// A request above the reference clock clamps to [`MIN_DIVIDER`]; a
    /// request so slow the divider overflows its field clamps to
    /// [`MAX_DIVIDER`]. A zero request is treated as 1 Hz.
    pub fn from_target_hz(target_hz: u32) -> Self {
        let raw = u64::from(REFERENCE_CLOCK_HZ) / u64::from(target_hz.max(1));
        let divider = raw.clamp(u64::from(MIN_DIVIDER), u64::from(MAX_DIVIDER)) as u16;
        if u64::from(divider) != raw {
            log::debug!("divider {raw} out of range, clamped to {divider}");
        }
        Self {
            divider,
            achievable_hz: f64::from(REFERENCE_CLOCK_HZ) / f64::from(divider),
        }
    }

    /// The divider word carried in the START payload.
    pub fn divider(&self) -> u16 {
        self.divider
    }

    /// The rate the clamped divider actually produces, in Hz.
    pub fn achievable_hz(&self) -> f64 {
        self.achievable_hz
    }
}
