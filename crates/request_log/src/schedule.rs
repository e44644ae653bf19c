use std::fmt;
use std::time::Duration;

use chrono::offset::LocalResult;
use chrono::{
    DateTime, Datelike, Days, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Names of the settings that affect the schedule. Changes to any other setting are ignored.
pub const SCHEDULE_SETTINGS: &[&str] = &[
    "enabled",
    "cadence_kind",
    "interval",
    "time_of_day",
    "timezone",
    "weekday",
];

/// Longest interval a cadence may use.
pub const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Shortest interval a cadence may use.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CadenceKind {
    Seconds,
    #[default]
    Minutes,
    Hour,
    Daily,
    Weekly,
}

impl CadenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CadenceKind::Seconds => "seconds",
            CadenceKind::Minutes => "minutes",
            CadenceKind::Hour => "hour",
            CadenceKind::Daily => "daily",
            CadenceKind::Weekly => "weekly",
        }
    }
}

impl fmt::Display for CadenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The schedule configuration surface, as read from a settings file.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleSettings {
    pub enabled: bool,
    pub cadence_kind: CadenceKind,
    /// Required for `seconds` and `minutes`; optional for `hour` (every N hours).
    pub interval: Option<u64>,
    /// `HH:MM` or `HH:MM:SS`; required for `daily` and `weekly`.
    pub time_of_day: Option<String>,
    /// IANA zone name such as `Europe/Paris` or `UTC`. Defaults to UTC.
    pub timezone: Option<String>,
    /// Day name for `weekly`; defaults to Monday.
    pub weekday: Option<String>,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cadence_kind: CadenceKind::Minutes,
            interval: Some(1),
            time_of_day: None,
            timezone: None,
            weekday: None,
        }
    }
}

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ScheduleError {
    #[error("`{kind}` cadence requires an `interval`")]
    MissingInterval { kind: CadenceKind },
    #[error("`interval` must be a positive integer")]
    ZeroInterval,
    #[error("`interval` of {interval} {kind} exceeds the maximum of one year")]
    IntervalTooLarge { kind: CadenceKind, interval: u64 },
    #[error("`{kind}` cadence requires `time_of_day`")]
    MissingTimeOfDay { kind: CadenceKind },
    #[error("invalid time_of_day `{0}`, expected HH:MM or HH:MM:SS")]
    InvalidTimeOfDay(String),
    #[error("unknown timezone `{0}`, expected an IANA name such as Europe/Paris")]
    InvalidTimezone(String),
    #[error("invalid weekday `{0}`")]
    InvalidWeekday(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Cadence {
    /// Fire this long after the previous firing finished (or after start).
    Interval(Duration),
    /// Fire at a wall-clock time in `zone`.
    Daily { at: NaiveTime, zone: Tz },
    Weekly {
        weekday: Weekday,
        at: NaiveTime,
        zone: Tz,
    },
}

/// A validated cadence. Build one from settings, or with [`ScheduleSpec::every`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ScheduleSpec {
    pub kind: CadenceKind,
    pub cadence: Cadence,
}

impl ScheduleSpec {
    /// A plain interval cadence. `period` is clamped to `MIN_INTERVAL..=MAX_INTERVAL`.
    pub fn every(period: Duration) -> Self {
        Self {
            kind: CadenceKind::Seconds,
            cadence: Cadence::Interval(period.clamp(MIN_INTERVAL, MAX_INTERVAL)),
        }
    }

    /// Validates settings into a spec. `Ok(None)` means ingestion is disabled.
    pub fn from_settings(settings: &ScheduleSettings) -> Result<Option<Self>, ScheduleError> {
        if !settings.enabled {
            return Ok(None);
        }
        let kind = settings.cadence_kind;
        let cadence = match kind {
            CadenceKind::Seconds => Cadence::Interval(interval(kind, settings.interval, 1)?),
            CadenceKind::Minutes => Cadence::Interval(interval(kind, settings.interval, 60)?),
            CadenceKind::Hour => {
                Cadence::Interval(interval(kind, Some(settings.interval.unwrap_or(1)), 3600)?)
            }
            CadenceKind::Daily => Cadence::Daily {
                at: time_of_day(kind, settings.time_of_day.as_deref())?,
                zone: parse_zone(settings.timezone.as_deref())?,
            },
            CadenceKind::Weekly => Cadence::Weekly {
                weekday: parse_weekday(settings.weekday.as_deref())?,
                at: time_of_day(kind, settings.time_of_day.as_deref())?,
                zone: parse_zone(settings.timezone.as_deref())?,
            },
        };
        Ok(Some(Self { kind, cadence }))
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cadence {
            Cadence::Interval(period) => write!(f, "every {period:?}"),
            Cadence::Daily { at, zone } => write!(f, "daily at {at} {}", zone.name()),
            Cadence::Weekly { weekday, at, zone } => {
                write!(f, "weekly on {weekday} at {at} {}", zone.name())
            }
        }
    }
}

fn interval(kind: CadenceKind, value: Option<u64>, unit_secs: u64) -> Result<Duration, ScheduleError> {
    let value = value.ok_or(ScheduleError::MissingInterval { kind })?;
    if value == 0 {
        return Err(ScheduleError::ZeroInterval);
    }
    let period = value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .filter(|period| *period <= MAX_INTERVAL)
        .ok_or(ScheduleError::IntervalTooLarge {
            kind,
            interval: value,
        })?;
    Ok(period)
}

fn time_of_day(kind: CadenceKind, raw: Option<&str>) -> Result<NaiveTime, ScheduleError> {
    let raw = raw
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or(ScheduleError::MissingTimeOfDay { kind })?;
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| ScheduleError::InvalidTimeOfDay(raw.to_string()))
}

fn parse_zone(raw: Option<&str>) -> Result<Tz, ScheduleError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(Tz::UTC),
        Some(raw) => raw
            .parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(raw.to_string())),
    }
}

fn parse_weekday(raw: Option<&str>) -> Result<Weekday, ScheduleError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(Weekday::Mon),
        Some(raw) => raw
            .parse::<Weekday>()
            .map_err(|_| ScheduleError::InvalidWeekday(raw.to_string())),
    }
}

/// The first firing instant strictly after `now`.
///
/// Interval cadences fire `now + interval`. Calendar cadences fire at the next date whose
/// wall-clock time in the configured zone matches. A time repeated by a backward transition fires
/// once, at its earlier instant; a time skipped by a forward transition fires just after the
/// transition, shifted by the size of the gap.
pub fn next_fire(spec: &ScheduleSpec, now: DateTime<Utc>) -> DateTime<Utc> {
    match spec.cadence {
        Cadence::Interval(period) => TimeDelta::from_std(period)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
        Cadence::Daily { at, zone } => next_wall_clock(now, zone, at, |_| true),
        Cadence::Weekly { weekday, at, zone } => {
            next_wall_clock(now, zone, at, |day| day == weekday)
        }
    }
}

fn next_wall_clock(
    now: DateTime<Utc>,
    zone: Tz,
    at: NaiveTime,
    on_day: impl Fn(Weekday) -> bool,
) -> DateTime<Utc> {
    let today = now.with_timezone(&zone).date_naive();
    (0..=14)
        .filter_map(|ahead| today.checked_add_days(Days::new(ahead)))
        .filter(|date| on_day(date.weekday()))
        .filter_map(|date| resolve_local(zone, date.and_time(at)))
        .find(|candidate| *candidate > now)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn resolve_local(zone: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(at) => Some(at.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            // Inside a gap: read the wall-clock time with the offset in force before it.
            let before = local.checked_sub_days(Days::new(1))?;
            let offset = zone.offset_from_utc_datetime(&before).fix();
            let shift = TimeDelta::seconds(i64::from(offset.local_minus_utc()));
            Some(Utc.from_utc_datetime(&local.checked_sub_signed(shift)?))
        }
    }
}
