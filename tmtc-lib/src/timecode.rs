//! Spacecraft elapsed time carried in secondary headers.
#[cfg(feature = "timecode")]
use hifitime::{Duration, Epoch};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Spacecraft elapsed time as coarse seconds plus a binary fraction of `fine_bits` bits.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scet {
    pub coarse: u32,
    pub fine: u32,
    pub fine_bits: u8,
}

impl Scet {
    /// Seconds since the mission epoch.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds(&self) -> f64 {
        f64::from(self.coarse) + f64::from(self.fine) / self.denominator() as f64
    }

    fn denominator(&self) -> u64 {
        1u64 << self.fine_bits.min(32)
    }

    /// Fractional part in nanoseconds, truncated.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn fine_nanos(&self) -> u64 {
        (u128::from(self.fine) * 1_000_000_000 / u128::from(self.denominator())) as u64
    }

    /// Absolute time given the mission epoch `base`.
    ///
    /// # Example
    /// ```
    /// use std::str::FromStr;
    /// use hifitime::Epoch;
    /// use tmtc::Scet;
    ///
    /// let base = Epoch::from_str("2000-01-01T00:00:00Z").unwrap();
    /// let scet = Scet { coarse: 60, fine: 0x8000, fine_bits: 16 };
    /// assert_eq!(
    ///     scet.epoch(base),
    ///     Epoch::from_str("2000-01-01T00:01:00.5Z").unwrap()
    /// );
    /// ```
    #[cfg(feature = "timecode")]
    #[must_use]
    pub fn epoch(&self, base: Epoch) -> Epoch {
        let elapsed = Duration::compose(
            0,
            0,
            0,
            0,
            u64::from(self.coarse),
            0,
            0,
            self.fine_nanos(),
        );
        base + elapsed
    }
}
