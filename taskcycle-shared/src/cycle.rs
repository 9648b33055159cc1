//! Reset cycle calendar arithmetic
//!
//! Decides whether a task's reset cycle has rolled over since its last reset.
//! Everything here is a pure function of its inputs: callers pass `now`
//! explicitly so a whole batch is evaluated against one instant.
//!
//! # Boundaries
//!
//! All boundaries are calendar based and computed in UTC:
//!
//! ```text
//! daily    00:00 every day
//! weekly   00:00 Monday (ISO week)
//! monthly  00:00 on the 1st
//! yearly   00:00 on January 1st
//! ```
//!
//! A task last reset at 23:59 is eligible again at 00:01 the next day even
//! though less than 24 hours have passed.
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use taskcycle_shared::cycle::{is_eligible_for_reset, ResetCycle};
//!
//! let last = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 0).unwrap();
//! let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 1, 0).unwrap();
//!
//! assert!(is_eligible_for_reset(ResetCycle::Daily, Some(last), now));
//! ```

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Cadence at which a task's progress is zeroed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetCycle {
    /// Resets at every UTC midnight
    Daily,

    /// Resets at the start of every ISO week (Monday)
    Weekly,

    /// Resets on the 1st of every month
    Monthly,

    /// Resets on January 1st
    Yearly,
}

/// Returned when stored cycle text is not one of the known kinds
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown reset cycle: {0:?}")]
pub struct UnknownResetCycle(pub String);

impl ResetCycle {
    /// Every known cycle kind
    pub const ALL: [ResetCycle; 4] = [
        ResetCycle::Daily,
        ResetCycle::Weekly,
        ResetCycle::Monthly,
        ResetCycle::Yearly,
    ];

    /// Converts the cycle to its stored text form
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetCycle::Daily => "daily",
            ResetCycle::Weekly => "weekly",
            ResetCycle::Monthly => "monthly",
            ResetCycle::Yearly => "yearly",
        }
    }
}

impl fmt::Display for ResetCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResetCycle {
    type Err = UnknownResetCycle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(ResetCycle::Daily),
            "weekly" => Ok(ResetCycle::Weekly),
            "monthly" => Ok(ResetCycle::Monthly),
            "yearly" => Ok(ResetCycle::Yearly),
            _ => Err(UnknownResetCycle(s.to_string())),
        }
    }
}

/// Returns the boundary that opened the cycle containing `at`
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use taskcycle_shared::cycle::{period_start, ResetCycle};
///
/// // 2024-01-31 is a Wednesday
/// let at = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
///
/// assert_eq!(
///     period_start(ResetCycle::Weekly, at),
///     Utc.with_ymd_and_hms(2024, 1, 29, 0, 0, 0).unwrap()
/// );
/// assert_eq!(
///     period_start(ResetCycle::Monthly, at),
///     Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
/// );
/// ```
pub fn period_start(cycle: ResetCycle, at: DateTime<Utc>) -> DateTime<Utc> {
    let date = at.date_naive();

    let start = match cycle {
        ResetCycle::Daily => date,
        ResetCycle::Weekly => date - Days::new(u64::from(date.weekday().num_days_from_monday())),
        ResetCycle::Monthly => date - Days::new(u64::from(date.day0())),
        ResetCycle::Yearly => date - Days::new(u64::from(date.ordinal0())),
    };

    midnight_utc(start)
}

/// Returns the first boundary strictly after `at`
///
/// `None` only when the next boundary is outside chrono's representable range.
pub fn next_boundary(cycle: ResetCycle, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let start = period_start(cycle, at).date_naive();

    let next = match cycle {
        ResetCycle::Daily => start.checked_add_days(Days::new(1)),
        ResetCycle::Weekly => start.checked_add_days(Days::new(7)),
        ResetCycle::Monthly => start.checked_add_months(Months::new(1)),
        ResetCycle::Yearly => start.checked_add_months(Months::new(12)),
    }?;

    Some(midnight_utc(next))
}

/// Decides whether a task must be reset at `now`
///
/// A task that was never reset is always eligible. Otherwise it is eligible
/// once a boundary lies between its last reset and `now`. A `now` earlier
/// than the last reset is never eligible, so `last_reset_at` cannot move
/// backwards.
pub fn is_eligible_for_reset(
    cycle: ResetCycle,
    last_reset_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match last_reset_at {
        None => true,
        Some(last) => last < period_start(cycle, now),
    }
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}
