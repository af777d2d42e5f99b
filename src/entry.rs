use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::job::Job;
use crate::schedule::Schedule;

/// The scheduler's unit of work: a schedule, its job, and the firing times.
#[derive(Clone)]
pub struct Entry {
    /// The schedule on which the job runs.
    pub schedule: Arc<dyn Schedule>,
    /// The job to run.
    pub job: Job,
    /// The next firing instant. `None` before the scheduler starts, or when
    /// the schedule is unsatisfiable.
    pub next: Option<DateTime<Utc>>,
    /// The last firing instant. `None` if the job has never fired.
    pub prev: Option<DateTime<Utc>>,
}

impl Entry {
    pub(crate) fn new(schedule: Arc<dyn Schedule>, job: Job) -> Self {
        Self {
            schedule,
            job,
            next: None,
            prev: None,
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("job", &self.job.name)
            .field("next", &self.next)
            .field("prev", &self.prev)
            .finish()
    }
}

/// Ordering for the entry list: by next firing time, with unscheduled
/// (`None`) entries at the end. Ties keep their insertion order under a
/// stable sort.
pub(crate) fn cmp_next(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(&b),
    }
}
