//! Trigger policies: when a job becomes due, relative to its persisted state.

use std::{fmt, str::FromStr, time::Duration};

use {
    chrono::{DateTime, TimeDelta, Utc},
    chrono_tz::Tz,
    cron::Schedule,
};

use crate::{Error, Result, types::TriggerCountMode};

/// The closed set of trigger policies a job can carry.
#[derive(Debug, Clone)]
pub enum Trigger {
    Cron(CronTrigger),
    Interval(IntervalTrigger),
}

impl Trigger {
    /// Cron trigger evaluated in UTC.
    pub fn cron(expression: &str, mode: TriggerCountMode) -> Result<Self> {
        CronTrigger::new(expression, mode).map(Self::Cron)
    }

    /// Fixed-interval trigger.
    pub fn interval(every: Duration, mode: TriggerCountMode) -> Result<Self> {
        IntervalTrigger::new(every, mode).map(Self::Interval)
    }

    #[must_use]
    pub fn mode(&self) -> TriggerCountMode {
        match self {
            Self::Cron(c) => c.mode,
            Self::Interval(i) => i.mode,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cron(c) => match c.timezone {
                Some(tz) => write!(f, "cron '{}' ({tz})", c.expression),
                None => write!(f, "cron '{}'", c.expression),
            },
            Self::Interval(i) => write!(f, "every {:?}", i.every),
        }
    }
}

// ── Cron ────────────────────────────────────────────────────────────────────

/// A cron expression, optionally evaluated in a named timezone.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: String,
    schedule: Schedule,
    timezone: Option<Tz>,
    mode: TriggerCountMode,
}

impl CronTrigger {
    /// Parse a 5-field (`min hour dom month dow`) or 6/7-field expression.
    pub fn new(expression: &str, mode: TriggerCountMode) -> Result<Self> {
        Ok(Self {
            expression: expression.to_string(),
            schedule: parse_schedule(expression)?,
            timezone: None,
            mode,
        })
    }

    /// Evaluate the expression in an IANA timezone such as `Europe/Paris`.
    pub fn with_timezone(mut self, timezone: &str) -> Result<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| Error::unknown_timezone(timezone))?;
        self.timezone = Some(tz);
        Ok(self)
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[must_use]
    pub fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    #[must_use]
    pub fn mode(&self) -> TriggerCountMode {
        self.mode
    }

    /// First occurrence strictly after `after`; `None` once the expression is
    /// exhausted (e.g. a year field in the past).
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.timezone {
            Some(tz) => self
                .schedule
                .after(&after.with_timezone(&tz))
                .next()
                .map(|dt| dt.with_timezone(&Utc)),
            None => self.schedule.after(&after).next(),
        }
    }
}

fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression).or_else(|first| {
        // The `cron` crate wants seconds and an optional year around the
        // classic five fields.
        let padded = if expression.split_whitespace().count() == 5 {
            Schedule::from_str(&format!("0 {expression} *"))
        } else {
            Err(first)
        };
        padded.map_err(|source| Error::InvalidCronExpression {
            expression: expression.to_string(),
            source,
        })
    })
}

// ── Interval ────────────────────────────────────────────────────────────────

/// A fixed, non-zero period.
#[derive(Debug, Clone)]
pub struct IntervalTrigger {
    every: Duration,
    delta: TimeDelta,
    mode: TriggerCountMode,
}

impl IntervalTrigger {
    pub fn new(every: Duration, mode: TriggerCountMode) -> Result<Self> {
        if every.is_zero() {
            return Err(Error::invalid_interval("interval must be > 0"));
        }
        let delta = TimeDelta::from_std(every)
            .map_err(|_| Error::invalid_interval(format!("interval too large: {every:?}")))?;
        Ok(Self { every, delta, mode })
    }

    /// Parse a human-friendly interval such as `"30s"`, `"10m"`, `"2h"`, `"1d"`.
    pub fn parse(input: &str, mode: TriggerCountMode) -> Result<Self> {
        Self::new(parse_interval(input)?, mode)
    }

    #[must_use]
    pub fn every(&self) -> Duration {
        self.every
    }

    #[must_use]
    pub fn mode(&self) -> TriggerCountMode {
        self.mode
    }

    /// `baseline + interval`, or `None` past the end of representable time.
    #[must_use]
    pub fn next_after(&self, baseline: DateTime<Utc>) -> Option<DateTime<Utc>> {
        baseline.checked_add_signed(self.delta)
    }
}

fn parse_interval(input: &str) -> Result<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| c.is_alphabetic())
        .ok_or_else(|| Error::invalid_interval(format!("missing unit suffix (s/m/h/d): {input:?}")))?;
    let (digits, suffix) = input.split_at(split);

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| Error::invalid_interval(format!("invalid number: {digits:?}")))?;

    let unit_secs = match suffix {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => {
            return Err(Error::invalid_interval(format!(
                "unknown suffix {suffix:?} (expected s/m/h/d)"
            )));
        },
    };

    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::invalid_interval(format!("interval too large: {input:?}")))
}
