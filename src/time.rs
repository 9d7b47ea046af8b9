//! Conversions from the time codes used by the various instruments into
//! [`Epoch`]s. All returned epochs are UTC.

use hifitime::{Duration, Epoch, TimeScale};
use thiserror::Error;

/// MJD of 1997-01-01T00:00:00 UTC, the reference of Kronos "t97" days.
const MJD_T97_REF: f64 = 50449.0;

/// Milliseconds from 0000-01-01T00:00:00 to the Unix epoch, on the
/// leap-second-free calendar CDF EPOCH values use.
const CDF_EPOCH_UNIX_MS: f64 = 62_167_219_200_000.0;

/// MJD of 1899-12-30T00:00:00 UTC, the reference of OLE automation (Delphi
/// `TDateTime`) dates.
const MJD_OLE_REF: f64 = 15018.0;

#[derive(Error, Debug, PartialEq)]
pub enum TimeError {
    #[error("Invalid date/time {year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}")]
    InvalidDate {
        year: i32,
        month: i32,
        day: i32,
        hour: i32,
        minute: i32,
        second: i32,
    },

    #[error("Day of year {doy} is not valid for year {year}")]
    InvalidDayOfYear { year: i32, doy: i32 },

    #[error("Millisecond of day {ms} is beyond the end of a day")]
    InvalidMillisecond { ms: u32 },

    #[error("'{ydh}' is not a valid YYYYDDDHH time code")]
    InvalidYdh { ydh: i32 },

    #[error("Time value {value} is not finite")]
    NotFinite { value: f64 },
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Make an epoch from calendar fields as they appear in binary headers (often
/// as `i16`s, hence the generous argument types). `frac_seconds` is added on
/// top of `second`.
pub fn epoch_from_calendar(
    year: i32,
    month: i32,
    day: i32,
    hour: i32,
    minute: i32,
    second: i32,
    frac_seconds: f64,
) -> Result<Epoch, TimeError> {
    let invalid = || TimeError::InvalidDate {
        year,
        month,
        day,
        hour,
        minute,
        second,
    };
    let to_u8 = |v: i32| u8::try_from(v).map_err(|_| invalid());

    let epoch = Epoch::maybe_from_gregorian_utc(
        year,
        to_u8(month)?,
        to_u8(day)?,
        to_u8(hour)?,
        to_u8(minute)?,
        to_u8(second)?,
        0,
    )
    .map_err(|_| invalid())?;
    if !frac_seconds.is_finite() {
        return Err(invalid());
    }
    Ok(epoch + Duration::from_seconds(frac_seconds))
}

/// Make an epoch from a year, a 1-indexed day of year and the milliseconds
/// elapsed in that day.
pub fn epoch_from_doy(year: i32, doy: i32, ms_of_day: u32) -> Result<Epoch, TimeError> {
    let days_in_year = if is_leap_year(year) { 366 } else { 365 };
    if !(1..=days_in_year).contains(&doy) {
        return Err(TimeError::InvalidDayOfYear { year, doy });
    }
    if ms_of_day > 86_400_000 {
        return Err(TimeError::InvalidMillisecond { ms: ms_of_day });
    }

    let jan_1 = epoch_from_calendar(year, 1, 1, 0, 0, 0, 0.0)?;
    // Step in whole UTC days so that leap seconds inside the year don't shift
    // the time of day.
    let midnight = Epoch::from_mjd_utc(jan_1.to_mjd_utc_days().round() + f64::from(doy - 1));
    Ok(midnight + Duration::from_milliseconds(f64::from(ms_of_day)))
}

/// Kronos "t97": decimal days since 1997-01-01T00:00:00 UTC.
pub fn epoch_from_t97(days: f64) -> Epoch {
    Epoch::from_mjd_utc(MJD_T97_REF + days)
}

/// OLE automation date: decimal days since 1899-12-30T00:00:00 UTC.
pub fn epoch_from_ole(days: f64) -> Epoch {
    Epoch::from_mjd_utc(MJD_OLE_REF + days)
}

pub fn epoch_from_unix(seconds: f64) -> Epoch {
    Epoch::from_unix_seconds(seconds)
}

/// CDF_EPOCH: milliseconds since 0000-01-01T00:00:00, ignoring leap seconds.
pub fn epoch_from_cdf_epoch(ms: f64) -> Result<Epoch, TimeError> {
    if !ms.is_finite() {
        return Err(TimeError::NotFinite { value: ms });
    }
    Ok(Epoch::from_unix_milliseconds(ms - CDF_EPOCH_UNIX_MS))
}

/// CDF_EPOCH16: whole seconds since 0000-01-01T00:00:00 plus picoseconds.
pub fn epoch_from_cdf_epoch16(seconds: f64, picoseconds: f64) -> Result<Epoch, TimeError> {
    for value in [seconds, picoseconds] {
        if !value.is_finite() {
            return Err(TimeError::NotFinite { value });
        }
    }
    Ok(Epoch::from_unix_seconds(seconds - CDF_EPOCH_UNIX_MS / 1000.0)
        + Duration::from_nanoseconds(picoseconds / 1000.0))
}

/// CDF_TIME_TT2000: nanoseconds since 2000-01-01T12:00:00 TT, leap seconds
/// included.
pub fn epoch_from_tt2000(ns: i64) -> Epoch {
    Epoch::from_gregorian(2000, 1, 1, 12, 0, 0, 0, TimeScale::TT)
        + Duration::from_truncated_nanoseconds(ns)
}

/// Split a Kronos `YYYYDDDHH` code into (year, day of year, hour).
pub fn decode_ydh(ydh: i32) -> Result<(i32, i32, i32), TimeError> {
    if ydh < 0 {
        return Err(TimeError::InvalidYdh { ydh });
    }
    let year = ydh / 100_000;
    let doy = (ydh / 100) % 1000;
    let hour = ydh % 100;
    let days_in_year = if is_leap_year(year) { 366 } else { 365 };
    if !(1..=days_in_year).contains(&doy) || hour > 23 {
        return Err(TimeError::InvalidYdh { ydh });
    }
    Ok((year, doy, hour))
}

pub fn epoch_from_ydh(ydh: i32) -> Result<Epoch, TimeError> {
    let (year, doy, hour) = decode_ydh(ydh)?;
    // `hour` is at most 23, so this can't overflow a u32.
    epoch_from_doy(year, doy, hour as u32 * 3_600_000)
}
