use std::fmt;

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, SecondsFormat, TimeZone,
    Timelike, Utc,
};

use crate::engine::ScheduleError;
use crate::model::{Ms, Span};

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// The single fixed timezone the shop operates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingZone(FixedOffset);

impl OperatingZone {
    pub fn new(offset: FixedOffset) -> Self {
        Self(offset)
    }

    pub fn from_offset_minutes(minutes: i32) -> Result<Self, ScheduleError> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(Self)
            .ok_or(ScheduleError::InvalidOffset(minutes))
    }

    pub fn utc() -> Self {
        Self(Utc.fix())
    }

    pub fn offset(&self) -> FixedOffset {
        self.0
    }

    pub fn local(&self, t: Ms) -> Option<DateTime<FixedOffset>> {
        self.0.timestamp_millis_opt(t).single()
    }

    pub fn date_of(&self, t: Ms) -> Option<NaiveDate> {
        self.local(t).map(|dt| dt.date_naive())
    }

    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> Option<Ms> {
        self.from_naive(date.and_time(time))
    }

    pub fn from_naive(&self, local: NaiveDateTime) -> Option<Ms> {
        self.0
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.timestamp_millis())
    }

    pub fn midnight(&self, date: NaiveDate) -> Option<Ms> {
        date.and_hms_opt(0, 0, 0).and_then(|ndt| self.from_naive(ndt))
    }

    /// `[00:00, next 00:00)` of `date`.
    pub fn day_span(&self, date: NaiveDate) -> Option<Span> {
        let start = self.midnight(date)?;
        Some(Span::new(start, start + DAY_MS))
    }

    /// ISO-8601 with the zone's offset, e.g. `2025-10-20T09:00:00+09:00`.
    pub fn iso8601(&self, t: Ms) -> String {
        match self.local(t) {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, false),
            None => t.to_string(),
        }
    }

    /// Minute-of-hour in local time.
    pub fn minute_of(&self, t: Ms) -> Option<u32> {
        self.local(t).map(|dt| dt.minute())
    }
}

/// Daily opening window, stored as minutes after local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    open: u32,
    close: u32,
}

impl BusinessHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Result<Self, ScheduleError> {
        Self::from_minutes(minute_of_day(open), minute_of_day(close))
    }

    pub fn from_minutes(open: u32, close: u32) -> Result<Self, ScheduleError> {
        if open >= close || close > 24 * 60 {
            return Err(ScheduleError::InvalidBusinessHours { open, close });
        }
        Ok(Self { open, close })
    }

    pub fn open_minute(&self) -> u32 {
        self.open
    }

    pub fn close_minute(&self) -> u32 {
        self.close
    }

    /// Opening window anchored to `date` in `zone`.
    pub fn on(&self, zone: &OperatingZone, date: NaiveDate) -> Option<Span> {
        let midnight = zone.midnight(date)?;
        Some(Span::new(
            midnight + Ms::from(self.open) * MINUTE_MS,
            midnight + Ms::from(self.close) * MINUTE_MS,
        ))
    }
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            open: 9 * 60,
            close: 18 * 60,
        }
    }
}

impl fmt::Display for BusinessHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:02}-{}:{:02}",
            self.open / 60,
            self.open % 60,
            self.close / 60,
            self.close % 60
        )
    }
}

fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Back-to-back windows of `step` inside `within`; a partial trailing window
/// is dropped. Clones iterate independently.
#[derive(Debug, Clone)]
pub struct SlotWindows {
    next: Ms,
    close: Ms,
    step: Ms,
}

impl Iterator for SlotWindows {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        let end = self.next + self.step;
        if end > self.close {
            return None;
        }
        let span = Span::new(self.next, end);
        self.next = end;
        Some(span)
    }
}

pub fn slot_windows(within: Span, duration_minutes: u32) -> Result<SlotWindows, ScheduleError> {
    if duration_minutes == 0 {
        return Err(ScheduleError::InvalidDuration(duration_minutes));
    }
    Ok(SlotWindows {
        next: within.start,
        close: within.end,
        step: Ms::from(duration_minutes) * MINUTE_MS,
    })
}

// ── Boundary parsing ─────────────────────────────────────────────

pub fn parse_date(s: &str) -> Result<NaiveDate, ScheduleError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ScheduleError::InvalidDate(s.to_string()))
}

pub fn parse_time(s: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| ScheduleError::InvalidTime(s.to_string()))
}

/// Accepts RFC 3339 (`2025-10-20T09:00:00+09:00`) or a local
/// `YYYY-MM-DDTHH:MM` / `YYYY-MM-DD HH:MM` read in `zone`.
pub fn parse_datetime(zone: &OperatingZone, s: &str) -> Result<Ms, ScheduleError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|local| zone.from_naive(local))
        .ok_or_else(|| ScheduleError::InvalidTime(s.to_string()))
}
