//! Common integer and period helpers for isp3a_core.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;
/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Frame period in microseconds for a given frame rate.
/// - Clamps `fps` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 microsecond.
#[inline]
pub fn period_us(fps: u32) -> u64 {
    (MICROS_PER_SEC / u64::from(fps.max(1))).max(1)
}

/// Frame period in milliseconds for a given frame rate, at least 1 ms.
#[inline]
pub fn period_ms(fps: u32) -> u64 {
    (MILLIS_PER_SEC / u64::from(fps.max(1))).max(1)
}

/// `n / d` rounded to nearest (half up); `None` when `d == 0`.
#[inline]
pub fn div_round_nearest_u32(n: u32, d: u32) -> Option<u32> {
    if d == 0 {
        return None;
    }
    let q = (u64::from(n) + u64::from(d / 2)) / u64::from(d);
    Some(u32::try_from(q).unwrap_or(u32::MAX))
}

/// Round a non-negative real to the nearest byte value, saturating at 255.
#[inline]
pub fn round_to_u8(v: f64) -> u8 {
    if v.is_nan() || v <= 0.0 {
        0
    } else if v >= 255.0 {
        u8::MAX
    } else {
        // in (0, 255): rounding cannot leave the u8 range
        (v + 0.5).floor() as u8
    }
}
