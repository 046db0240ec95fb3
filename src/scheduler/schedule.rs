//! Due-time value used to plan one-shot tasks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A point in time at which a planned task becomes due.
///
/// Ordering and equality compare the due-time only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule {
    when: DateTime<Utc>,
}

impl Schedule {
    /// A schedule due at `when`.
    #[must_use]
    pub fn at(when: DateTime<Utc>) -> Self {
        Self { when }
    }

    /// A schedule due immediately (fires on the next poll tick).
    #[must_use]
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// A schedule due `delay` from now.
    #[must_use]
    pub fn after(delay: Duration) -> Self {
        Self::at(Utc::now() + delay)
    }

    /// The due-time.
    #[must_use]
    pub fn when(&self) -> DateTime<Utc> {
        self.when
    }

    /// Whether the schedule lies strictly before `now`.
    #[must_use]
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.when < now
    }
}

impl From<DateTime<Utc>> for Schedule {
    fn from(when: DateTime<Utc>) -> Self {
        Self::at(when)
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.when.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}
