//! Time bases and timestamps
//!
//! Streams express presentation time in ticks of a rational time base
//! (seconds per tick). Packets carry `i64` tick counts, with
//! [`NO_TIMESTAMP`] standing in for "unknown".

use std::sync::OnceLock;
use std::time::Instant;

/// Sentinel for an unknown pts/dts. Rescaling preserves it.
pub const NO_TIMESTAMP: i64 = i64::MIN;

/// A rational number expressing one tick of a presentation clock in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// The value of this time base as a float, in seconds per tick.
    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Rescale a tick count from one time base to another, rounding half away
/// from zero. [`NO_TIMESTAMP`] passes through unchanged.
///
/// The intermediate product is computed in 128 bits so that large
/// timestamps against fine time bases cannot overflow.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if value == NO_TIMESTAMP {
        return NO_TIMESTAMP;
    }
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    let half = den.abs() / 2;
    let rounded = if num >= 0 { num + half } else { num - half } / den;
    rounded as i64
}

/// Microseconds on a process-local monotonic clock.
///
/// The zero point is the first call in this process; only differences are
/// meaningful, which is all the frame pacing and descriptor timestamps need.
pub fn monotonic_us() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}
