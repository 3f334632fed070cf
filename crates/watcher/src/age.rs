//! Age-based admission of events.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::Event;
use kevex_core::clock::Clock;

/// Outcome of [`AgeFilter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Too old, and stamped at or before the watcher booted: initial list
    /// backlog, dropped silently.
    DiscardBacklog { age: Duration },
    /// Too old, but stamped after boot.
    DiscardLive { age: Duration, time_used: DateTime<Utc> },
}

impl Admission {
    pub fn is_discarded(&self) -> bool {
        !matches!(self, Admission::Admit)
    }
}

/// Age of `event` and the timestamp it was measured from.
///
/// The later of `creationTimestamp` and `lastTimestamp` is used: aggregation
/// can leave `lastTimestamp` behind the creation time. `eventTime` is not
/// consulted. A missing timestamp counts as the earliest representable instant.
pub fn event_age(event: &Event, clock: &dyn Clock) -> (Duration, DateTime<Utc>) {
    let creation = event.metadata.creation_timestamp.as_ref().map_or(DateTime::<Utc>::MIN_UTC, |t| t.0);
    let last = event.last_timestamp.as_ref().map_or(DateTime::<Utc>::MIN_UTC, |t| t.0);
    let time_used = if creation > last { creation } else { last };
    (clock.since(time_used), time_used)
}

/// Discards events older than `max_age`. An event whose age equals `max_age`
/// is admitted.
pub struct AgeFilter {
    max_age: Duration,
    boot_time: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl AgeFilter {
    /// Boot time is taken from `clock` now. Ages beyond chrono's range
    /// saturate, which disables filtering.
    pub fn new(max_age: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        let max_age = Duration::from_std(max_age).unwrap_or(Duration::MAX);
        let boot_time = clock.now();
        Self { max_age, boot_time, clock }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn boot_time(&self) -> DateTime<Utc> {
        self.boot_time
    }

    pub fn set_boot_time(&mut self, t: DateTime<Utc>) {
        self.boot_time = t;
    }

    pub fn check(&self, event: &Event) -> Admission {
        let (age, time_used) = event_age(event, self.clock.as_ref());
        if age <= self.max_age {
            Admission::Admit
        } else if time_used > self.boot_time {
            Admission::DiscardLive { age, time_used }
        } else {
            Admission::DiscardBacklog { age }
        }
    }
}
