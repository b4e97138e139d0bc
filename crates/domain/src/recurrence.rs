//! Recurrence specs for scheduled rules.
//!
//! Two forms are accepted:
//! - `@every <duration>` with a humantime duration (`@every 10s`, `@every 1h30m`)
//! - a cron expression with a leading seconds field (`0 */5 * * * *`) or one
//!   of the `@hourly` / `@daily` / `@weekly` / `@monthly` / `@yearly` shorthands

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::time::Timestamp;

const EVERY: &str = "@every";

/// Errors raised while parsing a recurrence spec.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("schedule must not be empty")]
    Empty,

    #[error("invalid interval in schedule {spec:?}")]
    Interval {
        spec: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("interval in schedule {0:?} must be greater than zero")]
    ZeroInterval(String),

    #[error("invalid cron expression {spec:?}")]
    Cron {
        spec: String,
        #[source]
        source: cron::error::Error,
    },
}

#[derive(Debug, Clone)]
enum Kind {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

/// A parsed recurrence spec.
#[derive(Debug, Clone)]
pub struct Recurrence {
    spec: String,
    kind: Kind,
}

impl Recurrence {
    /// Fixed interval between fires, if this is an `@every` spec.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        match &self.kind {
            Kind::Every(interval) => Some(*interval),
            Kind::Cron(_) => None,
        }
    }

    /// The next fire time strictly after `after`.
    ///
    /// Returns `None` when a cron schedule has no further occurrences.
    #[must_use]
    pub fn next_after(&self, after: Timestamp) -> Option<Timestamp> {
        match &self.kind {
            Kind::Every(interval) => chrono::Duration::from_std(*interval)
                .ok()
                .and_then(|step| after.checked_add_signed(step)),
            Kind::Cron(schedule) => schedule.after(&after).next(),
        }
    }

    /// The spec text this recurrence was parsed from.
    #[must_use]
    pub fn spec(&self) -> &str {
        &self.spec
    }
}

impl FromStr for Recurrence {
    type Err = ScheduleError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let kind = if let Some(interval) = spec.strip_prefix(EVERY) {
            let interval =
                humantime::parse_duration(interval.trim()).map_err(|source| {
                    ScheduleError::Interval {
                        spec: spec.to_string(),
                        source,
                    }
                })?;
            if interval.is_zero() {
                return Err(ScheduleError::ZeroInterval(spec.to_string()));
            }
            Kind::Every(interval)
        } else {
            let schedule = cron::Schedule::from_str(spec).map_err(|source| ScheduleError::Cron {
                spec: spec.to_string(),
                source,
            })?;
            Kind::Cron(Box::new(schedule))
        };

        Ok(Self {
            spec: spec.to_string(),
            kind,
        })
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}
