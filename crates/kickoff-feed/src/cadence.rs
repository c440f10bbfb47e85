//! Fetch cadence parsed from a schedule string.
//!
//! Supported forms:
//! - `@every <duration>` with Go-style durations (`30s`, `1m`, `1h30m`, `500ms`, `1.5h`)
//! - `@hourly`, fired at the top of each local hour
//! - `@daily` / `@midnight`, fired at local midnight

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Timelike};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::error::CadenceError;

const SECS_PER_HOUR: u64 = 3_600;
const SECS_PER_DAY: u64 = 86_400;

/// Longest accepted `@every` period, about 292 years.
pub const MAX_PERIOD: Duration = Duration::from_nanos(i64::MAX as u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cadence {
    Every(Duration),
    Hourly,
    Daily,
}

impl FromStr for Cadence {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CadenceError::Empty);
        }
        if let Some(rest) = s.strip_prefix("@every ") {
            let period = parse_duration(rest.trim())?;
            return Ok(Self::Every(period));
        }
        match s {
            "@hourly" => Ok(Self::Hourly),
            "@daily" | "@midnight" => Ok(Self::Daily),
            other => Err(CadenceError::Unsupported(other.to_owned())),
        }
    }
}

impl Cadence {
    /// Time from `now` until the next fire.
    ///
    /// Wall-clock cadences count plain seconds from the last boundary, so a
    /// DST shift moves the fire by the size of the shift.
    pub fn next_delay<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        let into_period = |period_secs: u64, elapsed_secs: u64| {
            Duration::from_secs(period_secs)
                .saturating_sub(Duration::from_secs(elapsed_secs))
                .saturating_sub(Duration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000)))
        };
        match self {
            Self::Every(period) => *period,
            Self::Hourly => {
                let elapsed = u64::from(now.minute()) * 60 + u64::from(now.second());
                into_period(SECS_PER_HOUR, elapsed)
            }
            Self::Daily => into_period(SECS_PER_DAY, u64::from(now.num_seconds_from_midnight())),
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Every(period) => write!(f, "@every {period:?}"),
            Self::Hourly => f.write_str("@hourly"),
            Self::Daily => f.write_str("@daily"),
        }
    }
}

/// Parse a Go-style duration: one or more `<number><unit>` pairs.
fn parse_duration(s: &str) -> Result<Duration, CadenceError> {
    let invalid = || CadenceError::InvalidDuration(s.to_owned());
    let too_long = || CadenceError::TooLong(s.to_owned());
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let value: f64 = number.parse().map_err(|_| invalid())?;
        let unit_millis = match unit {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => return Err(invalid()),
        };
        let part = Duration::try_from_secs_f64(value * unit_millis / 1_000.0)
            .map_err(|_| too_long())?;
        total = total.checked_add(part).ok_or_else(too_long)?;
        rest = tail;
    }

    if total.is_zero() {
        return Err(CadenceError::ZeroInterval);
    }
    if total > MAX_PERIOD {
        return Err(too_long());
    }
    Ok(total)
}

/// Waits for successive fires of a [`Cadence`].
///
/// The first `tick` completes one full period after creation; the startup
/// fetch happens separately. Fires missed while the caller was busy are
/// skipped, not replayed.
pub struct Ticker {
    cadence: Cadence,
    interval: Option<Interval>,
}

impl Ticker {
    pub fn new(cadence: Cadence) -> Self {
        let interval = match cadence {
            Cadence::Every(period) => {
                let period = period.min(MAX_PERIOD);
                let now = Instant::now();
                let start = now.checked_add(period).unwrap_or(now);
                let mut interval = tokio::time::interval_at(start, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                Some(interval)
            }
            Cadence::Hourly | Cadence::Daily => None,
        };
        Self { cadence, interval }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub async fn tick(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                let _ = interval.tick().await;
            }
            None => tokio::time::sleep(self.cadence.next_delay(&Local::now())).await,
        }
    }
}
