use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};

use crate::error::CronError;

/// A job's duty cycle: a pure "next activation" oracle.
pub trait Schedule: Send + Sync {
    /// The next activation strictly after `after`, or `None` if the
    /// schedule never fires again.
    fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Parse a cron rhythm into a [`CronSchedule`].
///
/// The dialect is the `cron` crate's: 6 or 7 fields
/// (sec min hour day-of-month month day-of-week [year]), with `?`, ranges,
/// steps, month/day names, and `@hourly`-style descriptors.
pub fn parse(rhythm: &str) -> Result<CronSchedule, CronError> {
    let inner = cron::Schedule::from_str(rhythm).map_err(|source| CronError::InvalidRhythm {
        rhythm: rhythm.to_string(),
        source,
    })?;
    Ok(CronSchedule { inner })
}

/// A cron-expression schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    inner: cron::Schedule,
}

impl Schedule for CronSchedule {
    fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).next()
    }
}

/// A constant-delay schedule: activates every `period`, on whole seconds.
///
/// Periods are truncated to whole seconds, with a minimum of one second;
/// sub-second precision would make cohort members disagree on the firing
/// instant encoded in the lock key.
#[derive(Debug, Clone, Copy)]
pub struct Every {
    period: chrono::Duration,
}

impl Every {
    pub fn new(period: Duration) -> Self {
        let secs = period.as_secs().max(1);
        Self {
            period: chrono::Duration::seconds(secs as i64),
        }
    }
}

impl Schedule for Every {
    fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Some(after.trunc_subsecs(0) + self.period)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parse_accepts_every_second_rhythm() {
        assert!(parse("* * * * * ?").is_ok());
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = parse("not-a-rhythm").unwrap_err();
        assert!(matches!(err, CronError::InvalidRhythm { .. }));
        assert!(err.to_string().contains("not-a-rhythm"));
    }

    #[test]
    fn cron_next_is_strictly_after() {
        let schedule = parse("* * * * * ?").unwrap();
        let t = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        let next = schedule.next(t).unwrap();
        assert!(next > t);
        assert_eq!(next, t + chrono::Duration::seconds(1));
    }

    #[test]
    fn unsatisfiable_rhythm_never_fires() {
        // February 30th does not exist in any year.
        let schedule = parse("0 0 0 30 Feb ?").unwrap();
        assert_eq!(schedule.next(Utc::now()), None);
    }

    #[test]
    fn every_clamps_to_one_second() {
        let schedule = Every::new(Duration::from_millis(5));
        let t = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        assert_eq!(schedule.next(t).unwrap(), t + chrono::Duration::seconds(1));
    }

    #[test]
    fn every_truncates_to_whole_seconds() {
        let schedule = Every::new(Duration::from_nanos(5_000_000_005));
        let t = Utc
            .with_ymd_and_hms(2024, 7, 1, 12, 0, 0)
            .unwrap()
            .trunc_subsecs(0)
            + chrono::Duration::milliseconds(250);
        let next = schedule.next(t).unwrap();
        assert_eq!(next.timestamp_subsec_nanos(), 0);
        assert_eq!(next, t.trunc_subsecs(0) + chrono::Duration::seconds(5));
    }
}
