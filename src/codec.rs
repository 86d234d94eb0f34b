//! # Time and Duration Codec
//!
//! Conversions between the protobuf well-known `Timestamp` / `Duration` types
//! used on the wire and the `std::time` types used by the query engine.
//!
//! Two flavours exist for timestamps. [`to_system_time`] never fails and is used
//! where the bounds are optional refinements (single trace lookup).
//! [`try_to_system_time`] validates the encoding and is used where the bounds
//! are mandatory query inputs (trace search).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use prost_types::{Duration as WellKnownDuration, Timestamp as WellKnownTimestamp};
use thiserror::Error;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Seconds of 0001-01-01T00:00:00Z.
const MIN_VALID_SECONDS: i64 = -62_135_596_800;
/// Seconds of 10000-01-01T00:00:00Z, exclusive.
const MAX_VALID_SECONDS: i64 = 253_402_300_800;
/// Roughly 10,000 years.
const MAX_DURATION_SECONDS: i64 = 315_576_000_000;

/// A wire time value that has no valid internal equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Seconds fall outside years 0001 to 9999.
    #[error("timestamp seconds {0} out of range [0001-01-01, 10000-01-01)")]
    TimestampOutOfRange(i64),
    /// Timestamp nanos are not normalized to `[0, 1e9)`.
    #[error("timestamp nanos {0} out of range [0, 1e9)")]
    NanosOutOfRange(i32),
    /// Duration longer than about 10,000 years.
    #[error("duration seconds {0} out of range")]
    DurationOutOfRange(i64),
    /// Duration nanos have a magnitude of a full second or more.
    #[error("duration nanos {0} out of range")]
    DurationNanosOutOfRange(i32),
    /// Seconds and nanos point in opposite directions.
    #[error("duration has seconds and nanos of different signs: {seconds}s {nanos}ns")]
    SignMismatch { seconds: i64, nanos: i32 },
    /// Internal durations are unsigned.
    #[error("negative duration: {seconds}s {nanos}ns")]
    NegativeDuration { seconds: i64, nanos: i32 },
    /// OTLP times cannot precede the Unix epoch.
    #[error("timestamp {0}s is before the Unix epoch")]
    BeforeEpoch(i64),
    #[error("time value overflows nanoseconds since the Unix epoch")]
    Overflow,
}

/// Converts a wire timestamp into a `SystemTime`.
///
/// Nanos outside `[0, 1e9)` are carried into the seconds. Instants beyond what
/// the platform can represent saturate at the nearest representable second.
///
/// # Arguments
/// * `timestamp` - Wire timestamp, not necessarily normalized
pub fn to_system_time(timestamp: &WellKnownTimestamp) -> SystemTime {
    let nanos = i64::from(timestamp.nanos);
    let seconds = timestamp
        .seconds
        .saturating_add(nanos.div_euclid(NANOS_PER_SECOND));
    let subsec_nanos = Duration::from_nanos(nanos.rem_euclid(NANOS_PER_SECOND) as u64);

    if seconds >= 0 {
        saturate(seconds as u64, |seconds| {
            UNIX_EPOCH.checked_add(Duration::from_secs(seconds) + subsec_nanos)
        })
    } else {
        saturate(seconds.unsigned_abs(), |seconds| {
            UNIX_EPOCH
                .checked_sub(Duration::from_secs(seconds))
                .and_then(|time| time.checked_add(subsec_nanos))
        })
    }
}

/// Applies `offset` to the epoch, backing off to the largest offset in
/// `[0, seconds]` the platform accepts. `offset(0)` must always succeed.
fn saturate(seconds: u64, offset: impl Fn(u64) -> Option<SystemTime>) -> SystemTime {
    if let Some(time) = offset(seconds) {
        return time;
    }
    let (mut representable, mut overflowing) = (0, seconds);
    while overflowing - representable > 1 {
        let mid = representable + (overflowing - representable) / 2;
        if offset(mid).is_some() {
            representable = mid;
        } else {
            overflowing = mid;
        }
    }
    offset(representable).unwrap_or(UNIX_EPOCH)
}

/// Converts a wire timestamp into a `SystemTime`, rejecting malformed encodings.
pub fn try_to_system_time(timestamp: &WellKnownTimestamp) -> Result<SystemTime, CodecError> {
    if !(MIN_VALID_SECONDS..MAX_VALID_SECONDS).contains(&timestamp.seconds) {
        return Err(CodecError::TimestampOutOfRange(timestamp.seconds));
    }
    if !(0..NANOS_PER_SECOND).contains(&i64::from(timestamp.nanos)) {
        return Err(CodecError::NanosOutOfRange(timestamp.nanos));
    }
    Ok(to_system_time(timestamp))
}

/// Converts a `SystemTime` back into its wire form.
///
/// Nanos are always in `[0, 1e9)`. Instants outside the `i64` seconds range
/// saturate at its ends.
pub fn to_timestamp(time: SystemTime) -> WellKnownTimestamp {
    let since_epoch: i128 = match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_nanos() as i128,
        Err(err) => -(err.duration().as_nanos() as i128),
    };
    let seconds = since_epoch.div_euclid(i128::from(NANOS_PER_SECOND));
    let nanos = since_epoch.rem_euclid(i128::from(NANOS_PER_SECOND)) as i32;

    match i64::try_from(seconds) {
        Ok(seconds) => WellKnownTimestamp { seconds, nanos },
        Err(_) if seconds < 0 => WellKnownTimestamp {
            seconds: i64::MIN,
            nanos: 0,
        },
        Err(_) => WellKnownTimestamp {
            seconds: i64::MAX,
            nanos: (NANOS_PER_SECOND - 1) as i32,
        },
    }
}

/// Converts a wire duration into a `std::time::Duration`.
///
/// Internal durations are unsigned, so negative wire durations are rejected.
pub fn try_to_duration(duration: &WellKnownDuration) -> Result<Duration, CodecError> {
    let WellKnownDuration { seconds, nanos } = *duration;
    if !(-MAX_DURATION_SECONDS..=MAX_DURATION_SECONDS).contains(&seconds) {
        return Err(CodecError::DurationOutOfRange(seconds));
    }
    if i64::from(nanos).abs() >= NANOS_PER_SECOND {
        return Err(CodecError::DurationNanosOutOfRange(nanos));
    }
    if (seconds < 0 && nanos > 0) || (seconds > 0 && nanos < 0) {
        return Err(CodecError::SignMismatch { seconds, nanos });
    }
    if seconds < 0 || nanos < 0 {
        return Err(CodecError::NegativeDuration { seconds, nanos });
    }
    Ok(Duration::new(seconds as u64, nanos as u32))
}

/// Converts a `std::time::Duration` into its wire form.
///
/// # Returns
/// The wire duration, or [`CodecError::DurationOutOfRange`] beyond about 10,000 years
pub fn to_wire_duration(duration: Duration) -> Result<WellKnownDuration, CodecError> {
    let seconds = i64::try_from(duration.as_secs()).map_err(|_| CodecError::Overflow)?;
    if seconds > MAX_DURATION_SECONDS {
        return Err(CodecError::DurationOutOfRange(seconds));
    }
    Ok(WellKnownDuration {
        seconds,
        nanos: duration.subsec_nanos() as i32,
    })
}

/// Nanoseconds since the Unix epoch, the OTLP time encoding.
pub fn to_unix_nanos(timestamp: &WellKnownTimestamp) -> Result<u64, CodecError> {
    try_to_system_time(timestamp)?;
    if timestamp.seconds < 0 {
        return Err(CodecError::BeforeEpoch(timestamp.seconds));
    }
    (timestamp.seconds as u64)
        .checked_mul(NANOS_PER_SECOND as u64)
        .and_then(|nanos| nanos.checked_add(timestamp.nanos as u64))
        .ok_or(CodecError::Overflow)
}
