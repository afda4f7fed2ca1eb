//! Recurrence rules for scheduled jobs.
//!
//! Text forms, as accepted by [`Cadence::from_str`] and produced by `Display`:
//!
//! | form                   | meaning                          |
//! |------------------------|----------------------------------|
//! | `interval:30s`         | every 30 seconds (`humantime`)   |
//! | `interval:90`          | every 90 seconds                 |
//! | `daily@02:00`          | every day at 02:00 local time    |
//! | `weekly@friday@10:00`  | every Friday at 10:00 local time |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, TimeDelta, TimeZone, Timelike, Weekday};

use super::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Interval(Duration),
    Daily { at: NaiveTime },
    Weekly { day: Weekday, at: NaiveTime },
}

impl Cadence {
    pub fn daily(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|at| Self::Daily { at })
    }

    pub fn weekly(day: Weekday, hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|at| Self::Weekly { day, at })
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Self::Interval(every) if every.is_zero() => Err(SchedulerError::invalid_cadence(
                self.to_string(),
                "interval must be greater than zero",
            )),
            Self::Interval(every) if TimeDelta::from_std(*every).is_err() => Err(
                SchedulerError::invalid_cadence(self.to_string(), "interval is too long"),
            ),
            _ => Ok(()),
        }
    }

    /// First firing strictly after `after`, in the same time zone.
    ///
    /// Wall-clock times that do not exist on a given day (DST gaps) move to the
    /// next day matching the rule; ambiguous ones fire at their earliest instance.
    /// `None` only when the result falls outside chrono's representable range.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match *self {
            Self::Interval(every) => {
                let step = TimeDelta::from_std(every).ok()?;
                after.clone().checked_add_signed(step)
            }
            Self::Daily { at } => next_wall_clock(after, at, None),
            Self::Weekly { day, at } => next_wall_clock(after, at, Some(day)),
        }
    }
}

fn next_wall_clock<Tz: TimeZone>(
    after: &DateTime<Tz>,
    at: NaiveTime,
    day: Option<Weekday>,
) -> Option<DateTime<Tz>> {
    let zone = after.timezone();
    let mut date = after.date_naive();

    // Two weeks covers a weekly rule whose first candidate lands in a DST gap.
    for _ in 0..15 {
        if day.is_none_or(|d| date.weekday() == d) {
            let candidate = zone.from_local_datetime(&date.and_time(at)).earliest();
            if let Some(candidate) = candidate.filter(|c| c > after) {
                return Some(candidate);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval(every) => write!(f, "interval:{}", humantime::format_duration(*every)),
            Self::Daily { at } => write!(f, "daily@{}", clock(at)),
            Self::Weekly { day, at } => {
                write!(f, "weekly@{}@{}", day.to_string().to_lowercase(), clock(at))
            }
        }
    }
}

fn clock(at: &NaiveTime) -> String {
    if at.second() == 0 {
        at.format("%H:%M").to_string()
    } else {
        at.format("%H:%M:%S").to_string()
    }
}

impl FromStr for Cadence {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        let invalid = |reason: &str| SchedulerError::invalid_cadence(spec, reason);

        let cadence = if let Some(every) = spec.strip_prefix("interval:") {
            Self::Interval(parse_interval(every).ok_or_else(|| invalid("unreadable duration"))?)
        } else if let Some(at) = spec.strip_prefix("daily@") {
            Self::Daily {
                at: parse_clock(at).ok_or_else(|| invalid("expected HH:MM"))?,
            }
        } else if let Some(rest) = spec.strip_prefix("weekly@") {
            let (day, at) = rest
                .split_once('@')
                .ok_or_else(|| invalid("expected weekly@<day>@HH:MM"))?;
            Self::Weekly {
                day: day.trim().parse().map_err(|_| invalid("unknown weekday"))?,
                at: parse_clock(at).ok_or_else(|| invalid("expected HH:MM"))?,
            }
        } else {
            return Err(invalid("expected interval:, daily@ or weekly@"));
        };

        cadence.validate()?;
        Ok(cadence)
    }
}

fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    match s.parse::<u64>() {
        Ok(seconds) => Some(Duration::from_secs(seconds)),
        Err(_) => humantime::parse_duration(s).ok(),
    }
}

fn parse_clock(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
