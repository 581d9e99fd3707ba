//! Small value types shared across the conversion model.

use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A bit rate in bits per second. Arithmetic and equality operate on the
/// underlying bps value; the kbps accessors exist for display and for
/// FFmpeg's `k` suffixed arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bitrate(u64);

impl Bitrate {
    pub fn from_bps(bps: u64) -> Self {
        Self(bps)
    }

    /// Fractional kbps inputs round to whole bits per second.
    pub fn from_kbps(kbps: f64) -> Self {
        Self((kbps * 1000.0).round() as u64)
    }

    pub fn bps(self) -> u64 {
        self.0
    }

    pub fn kbps(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Rendered the way FFmpeg rate arguments expect it, e.g. `4000k`.
    pub fn as_ffmpeg_arg(self) -> String {
        format!("{}k", (self.0 as f64 / 1000.0).round() as u64)
    }
}

impl Add for Bitrate {
    type Output = Bitrate;

    fn add(self, rhs: Bitrate) -> Bitrate {
        Bitrate(self.0 + rhs.0)
    }
}

impl Sub for Bitrate {
    type Output = Bitrate;

    fn sub(self, rhs: Bitrate) -> Bitrate {
        Bitrate(self.0.saturating_sub(rhs.0))
    }
}

/// An output resolution. Zero in either dimension means "same as source".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn has_value(self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Reduced aspect ratio, e.g. 1920x1080 -> (16, 9). None when unset.
    pub fn aspect_ratio(self) -> Option<(u32, u32)> {
        if !self.has_value() {
            return None;
        }
        let d = gcd(self.width, self.height);
        Some((self.width / d, self.height / d))
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Serde adapter mapping `std::time::Duration` to fractional seconds on the
/// wire, matching the sidecar's camelCase JSON payloads.
pub mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a finite non-negative number"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Like [`secs`] but for `Option<Duration>`.
pub mod secs_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        match secs {
            None => Ok(None),
            Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(Duration::from_secs_f64(s))),
            Some(_) => Err(serde::de::Error::custom(
                "duration must be a finite non-negative number",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kbps_rounds_to_whole_bps() {
        assert_eq!(Bitrate::from_kbps(128.0).bps(), 128_000);
        assert_eq!(Bitrate::from_kbps(0.0015).bps(), 2);
        assert_eq!(Bitrate::from_kbps(0.0014).bps(), 1);
    }

    #[test]
    fn bitrate_arithmetic_on_bps() {
        let a = Bitrate::from_kbps(4000.0);
        let b = Bitrate::from_kbps(128.0);
        assert_eq!((a + b).bps(), 4_128_000);
        assert_eq!((a - b).bps(), 3_872_000);
        assert_eq!(a, Bitrate::from_bps(4_000_000));
    }

    #[test]
    fn ffmpeg_arg_uses_k_suffix() {
        assert_eq!(Bitrate::from_kbps(4000.0).as_ffmpeg_arg(), "4000k");
        assert_eq!(Bitrate::from_bps(192_000).as_ffmpeg_arg(), "192k");
    }

    #[test]
    fn resolution_has_value_requires_both_dimensions() {
        assert!(Resolution::new(1920, 1080).has_value());
        assert!(!Resolution::new(1920, 0).has_value());
        assert!(!Resolution::new(0, 1080).has_value());
        assert!(!Resolution::default().has_value());
    }

    #[test]
    fn aspect_ratio_is_reduced() {
        assert_eq!(Resolution::new(1920, 1080).aspect_ratio(), Some((16, 9)));
        assert_eq!(Resolution::new(640, 480).aspect_ratio(), Some((4, 3)));
        assert_eq!(Resolution::new(1080, 1080).aspect_ratio(), Some((1, 1)));
        assert_eq!(Resolution::default().aspect_ratio(), None);
    }
}
