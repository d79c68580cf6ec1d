//! GPS week alignment.
//!
//! SBET timestamps are seconds into the current GPS week. The week is found
//! from the acquisition date carried by the source table name,
//! `<tag>_<YYYYMMDD>_<...>`; a name that does not follow the convention is
//! rejected instead of producing wrong timestamps.
//!
//! Absolute times are Unix epoch seconds without leap-second correction.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::{ProvisionError, Result};

const SECONDS_PER_DAY: i64 = 86_400;
/// 1970-01-01 counted from 0001-01-01 (chrono's common-era day 1).
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;
/// 1980-01-06T00:00:00Z in days since the Unix epoch.
const GPS_EPOCH_UNIX_DAYS: i64 = 3_657;

/// The GPS week an acquisition falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GpsWeek {
    pub acquisition_date: NaiveDate,
    /// Weeks since the GPS epoch.
    pub week: i64,
    /// Unix timestamp of the Sunday 00:00:00 UTC starting the week.
    pub start: i64,
}

impl GpsWeek {
    /// Week containing `date`.
    pub fn containing(date: NaiveDate) -> Option<Self> {
        let unix_days = i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE;
        let gps_days = unix_days - GPS_EPOCH_UNIX_DAYS;
        if gps_days < 0 {
            return None;
        }
        let week = gps_days.div_euclid(7);
        Some(Self {
            acquisition_date: date,
            week,
            start: (GPS_EPOCH_UNIX_DAYS + week * 7) * SECONDS_PER_DAY,
        })
    }

    /// Week of the acquisition named by a source table.
    pub fn from_table_name(table: &str) -> Result<Self> {
        let date = acquisition_date(table)?;
        Self::containing(date).ok_or_else(|| bad_name(table, "date precedes the GPS epoch"))
    }

    /// Absolute time of a sample `seconds_in_week` into this week.
    pub fn absolute_time(&self, seconds_in_week: f64) -> f64 {
        self.start as f64 + seconds_in_week
    }
}

/// Parse the `<YYYYMMDD>` segment of `<tag>_<YYYYMMDD>_<...>`.
pub fn acquisition_date(table: &str) -> Result<NaiveDate> {
    let parts: Vec<&str> = table.split('_').collect();
    if parts.len() < 3 || parts[0].is_empty() || parts[2..].iter().all(|p| p.is_empty()) {
        return Err(bad_name(table, "expected <tag>_<YYYYMMDD>_<suffix>"));
    }

    let date = parts[1];
    if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad_name(table, "second segment is not a YYYYMMDD date"));
    }

    NaiveDate::parse_from_str(date, "%Y%m%d")
        .map_err(|e| bad_name(table, &format!("invalid date {}: {}", date, e)))
}

fn bad_name(table: &str, reason: &str) -> ProvisionError {
    ProvisionError::BadTableName {
        table: table.to_string(),
        reason: reason.to_string(),
    }
}
