//! Deciding how long a freshly fetched value may be trusted.
//!
//! Every fetch-through cache carries a [`FreshnessPolicy`]. After each successful fetch the
//! policy looks at the previous entry, the new value and the query, and returns a [`Decision`]:
//! the instant the new entry counts as observed, whether it goes to the durable store, and
//! whether listeners hear about it.
//!
//! An entry is then served without refreshing as long as `now - observed_at` stays within the
//! policy's [`window`](FreshnessPolicy::window). Moving `observed_at` is how a policy asks for
//! an early or a late re-check.

use std::time::Duration;

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeDelta, TimeZone, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::CacheEntry;
use crate::types::{LatestRelease, StatsPayload};

/// What to do with a freshly fetched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Write the value to the durable store, not only to memory.
    pub persist: bool,
    /// Tell the change listeners.
    pub notify: bool,
    /// The `observed_at` of the new entry.
    pub effective_at: DateTime<Utc>,
}

/// Decides per fetched value how long it stays fresh.
pub trait FreshnessPolicy: Send + Sync + 'static {
    /// The cached value.
    type Value: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Whatever the policy needs to know about the query that produced the value.
    type Query: Send + 'static;

    /// How long after its `observed_at` an entry is served without a refresh.
    fn window(&self) -> Duration;

    fn decide(
        &self,
        now: DateTime<Utc>,
        old: Option<&CacheEntry<Self::Value>>,
        new: &Self::Value,
        query: &Self::Query,
    ) -> Decision;

    /// Whether `entry` may still be served at `now`.
    fn is_fresh(&self, now: DateTime<Utc>, entry: &CacheEntry<Self::Value>) -> bool {
        match (now - entry.observed_at).to_std() {
            Ok(age) => age <= self.window(),
            // observed in the future
            Err(_) => true,
        }
    }
}

/// Listeners only hear about real transitions of an entry that is kept durably.
fn notify_on_change<T: PartialEq>(persist: bool, old: Option<&CacheEntry<T>>, new: &T) -> bool {
    persist && old.is_some_and(|old| &old.value != new)
}

/// Midnight (UTC) of `day` in the month of `now`.
///
/// Days past the 28th are clamped so every month has the point.
pub fn day_of_current_month(now: DateTime<Utc>, day: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), day.clamp(1, 28))
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now)
}

/// Midnight (UTC) of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now)
}

/// Describes whether a statistics query used the default window.
///
/// The default start is the project's configured start period, the default month count is the
/// distance from that start to the current month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub default_start: bool,
    pub default_months: bool,
}

impl QueryWindow {
    pub const DEFAULT: Self = Self {
        default_start: true,
        default_months: true,
    };
}

/// The policy for monthly download statistics.
///
/// Upstream counters for the running month keep being amended for a few days after it ended.
/// A value is therefore considered settled from a configured day of the month on, and counts as
/// observed at midnight of that day.
///
/// A timeline whose most recent month is still `0` is taken as "not populated yet". Such a
/// value counts as observed one day after the previous entry, or one month before the default
/// point if there was none, which makes it due again soon. If the query asked for a
/// non-default start *and* a non-default month count, a provisional value is only kept in
/// memory.
///
/// An artifact that genuinely had no downloads in the last month is indistinguishable from a
/// provisional one, and keeps being re-checked until the month rolls over.
#[derive(Debug, Clone)]
pub struct MonthlyStatsPolicy {
    window: Duration,
    stabilization_day: u32,
}

impl MonthlyStatsPolicy {
    pub fn new(window: Duration, stabilization_day: u32) -> Self {
        Self {
            window,
            stabilization_day,
        }
    }
}

impl FreshnessPolicy for MonthlyStatsPolicy {
    type Value = StatsPayload;
    type Query = QueryWindow;

    fn window(&self) -> Duration {
        self.window
    }

    fn decide(
        &self,
        now: DateTime<Utc>,
        old: Option<&CacheEntry<StatsPayload>>,
        new: &StatsPayload,
        query: &QueryWindow,
    ) -> Decision {
        let settled_at = day_of_current_month(now, self.stabilization_day);

        let (effective_at, persist) = if new.trailing_value() == Some(0) {
            let effective_at = match old {
                Some(old) => old.observed_at + TimeDelta::days(1),
                None => settled_at
                    .checked_sub_months(Months::new(1))
                    .unwrap_or(settled_at),
            };
            let persist = query.default_start || query.default_months;
            (effective_at, persist)
        } else {
            (settled_at, true)
        };

        Decision {
            persist,
            notify: notify_on_change(persist, old, new),
            effective_at,
        }
    }
}

/// The policy for values that are re-checked at most once per day, like star counts.
///
/// A value counts as observed at the start of the day it was fetched on.
#[derive(Debug, Clone)]
pub struct DailyPolicy<T> {
    window: Duration,
    _value: std::marker::PhantomData<fn() -> T>,
}

impl<T> DailyPolicy<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            _value: Default::default(),
        }
    }
}

impl<T> FreshnessPolicy for DailyPolicy<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Value = T;
    type Query = ();

    fn window(&self) -> Duration {
        self.window
    }

    fn decide(
        &self,
        now: DateTime<Utc>,
        old: Option<&CacheEntry<T>>,
        new: &T,
        _query: &(),
    ) -> Decision {
        Decision {
            persist: true,
            notify: notify_on_change(true, old, new),
            effective_at: start_of_day(now),
        }
    }
}

/// The policy for latest releases: observed when fetched, trusted for a short, fixed window.
#[derive(Debug, Clone)]
pub struct RecentPolicy {
    window: Duration,
}

impl RecentPolicy {
    /// The window used for latest releases.
    pub const LATEST_RELEASE_WINDOW: Duration = Duration::from_secs(10 * 60);

    pub fn new(window: Duration) -> Self {
        Self { window }
    }
}

impl Default for RecentPolicy {
    fn default() -> Self {
        Self::new(Self::LATEST_RELEASE_WINDOW)
    }
}

impl FreshnessPolicy for RecentPolicy {
    type Value = LatestRelease;
    type Query = ();

    fn window(&self) -> Duration {
        self.window
    }

    fn decide(
        &self,
        now: DateTime<Utc>,
        old: Option<&CacheEntry<LatestRelease>>,
        new: &LatestRelease,
        _query: &(),
    ) -> Decision {
        Decision {
            persist: true,
            notify: notify_on_change(true, old, new),
            effective_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, month, day, hour, 0, 0).unwrap()
    }

    fn stats(timeline: &[i64]) -> StatsPayload {
        StatsPayload {
            group_id: "org.burningwave".into(),
            artifact_id: "core".into(),
            total: timeline.iter().sum(),
            timeline: timeline.to_vec(),
        }
    }

    fn policy() -> MonthlyStatsPolicy {
        MonthlyStatsPolicy::new(30 * DAY, 5)
    }

    #[test]
    fn test_settled_value_uses_stabilization_day() {
        let now = at(6, 17, 13);
        let old = CacheEntry::new(stats(&[3, 4]), at(5, 5, 0));

        let decision = policy().decide(now, Some(&old), &stats(&[3, 4]), &QueryWindow::DEFAULT);

        assert_eq!(
            decision,
            Decision {
                persist: true,
                notify: false,
                effective_at: at(6, 5, 0),
            }
        );
    }

    #[test]
    fn test_settled_value_is_not_refetched_next_day() {
        let policy = policy();
        let now = at(6, 17, 13);
        let decision = policy.decide(now, None, &stats(&[3, 4]), &QueryWindow::DEFAULT);
        let entry = CacheEntry::new(stats(&[3, 4]), decision.effective_at);

        assert!(policy.is_fresh(now + TimeDelta::days(1), &entry));
    }

    #[test]
    fn test_provisional_with_previous_entry() {
        let now = at(6, 2, 8);
        let old = CacheEntry::new(stats(&[3, 0]), at(6, 1, 0));

        let decision = policy().decide(now, Some(&old), &stats(&[3, 0]), &QueryWindow::DEFAULT);

        assert!(decision.persist);
        assert!(!decision.notify);
        assert_eq!(decision.effective_at, at(6, 2, 0));
    }

    #[test]
    fn test_provisional_without_previous_entry() {
        let now = at(6, 2, 8);

        let decision = policy().decide(now, None, &stats(&[3, 0]), &QueryWindow::DEFAULT);

        assert!(decision.persist);
        assert!(!decision.notify);
        assert_eq!(decision.effective_at, at(5, 5, 0));
    }

    #[test]
    fn test_provisional_custom_window_stays_in_memory() {
        let custom = QueryWindow {
            default_start: false,
            default_months: false,
        };
        let old = CacheEntry::new(stats(&[1, 0]), at(6, 1, 0));

        let decision = policy().decide(at(6, 2, 8), Some(&old), &stats(&[2, 0]), &custom);

        assert!(!decision.persist);
        // nothing is announced for values that are not kept
        assert!(!decision.notify);
    }

    #[test]
    fn test_provisional_half_custom_window_is_persisted() {
        let custom_start = QueryWindow {
            default_start: false,
            default_months: true,
        };
        let custom_months = QueryWindow {
            default_start: true,
            default_months: false,
        };

        let policy = policy();
        let now = at(6, 2, 8);
        assert!(policy.decide(now, None, &stats(&[0]), &custom_start).persist);
        assert!(policy.decide(now, None, &stats(&[0]), &custom_months).persist);
    }

    #[test]
    fn test_notify_on_change_only() {
        let policy = policy();
        let now = at(6, 17, 13);
        let old = CacheEntry::new(stats(&[3, 4]), at(5, 5, 0));

        assert!(policy.decide(now, Some(&old), &stats(&[3, 5]), &QueryWindow::DEFAULT).notify);
        assert!(!policy.decide(now, Some(&old), &stats(&[3, 4]), &QueryWindow::DEFAULT).notify);
        assert!(!policy.decide(now, None, &stats(&[3, 5]), &QueryWindow::DEFAULT).notify);
    }

    #[test]
    fn test_genuine_zero_month_is_treated_as_provisional() {
        // Known quirk: a real month without downloads cannot be told apart from a month the
        // upstream did not populate yet, so it keeps being re-checked.
        let policy = policy();
        let now = at(6, 20, 12);
        let old = CacheEntry::new(stats(&[7, 9, 0]), at(6, 19, 0));

        let decision = policy.decide(now, Some(&old), &stats(&[7, 9, 0]), &QueryWindow::DEFAULT);

        assert_eq!(decision.effective_at, at(6, 20, 0));
        assert_ne!(decision.effective_at, at(6, 5, 0));
    }

    #[test]
    fn test_empty_timeline_is_settled() {
        let decision = policy().decide(at(6, 17, 13), None, &stats(&[]), &QueryWindow::DEFAULT);
        assert_eq!(decision.effective_at, at(6, 5, 0));
    }

    #[test]
    fn test_is_fresh() {
        let policy = MonthlyStatsPolicy::new(DAY, 5);
        let entry = CacheEntry::new(stats(&[1]), at(6, 5, 0));

        assert!(policy.is_fresh(at(6, 5, 12), &entry));
        assert!(policy.is_fresh(at(6, 6, 0), &entry));
        assert!(!policy.is_fresh(at(6, 6, 1), &entry));
        // stabilization point still ahead
        assert!(policy.is_fresh(at(6, 1, 0), &entry));
    }

    #[test]
    fn test_daily_policy() {
        let policy = DailyPolicy::<u64>::new(DAY);
        let old = CacheEntry::new(10, at(6, 1, 0));

        let decision = policy.decide(at(6, 3, 15), Some(&old), &11, &());
        assert_eq!(
            decision,
            Decision {
                persist: true,
                notify: true,
                effective_at: at(6, 3, 0),
            }
        );
    }

    #[test]
    fn test_recent_policy() {
        let policy = RecentPolicy::default();
        let now = at(6, 3, 15);
        let old = CacheEntry::new(LatestRelease(Some("1.0.0".into())), at(6, 3, 14));

        let decision = policy.decide(now, Some(&old), &LatestRelease(Some("1.0.0".into())), &());
        assert_eq!(decision.effective_at, now);
        assert!(decision.persist);
        assert!(!decision.notify);

        let entry = CacheEntry::new(LatestRelease(None), now);
        assert!(policy.is_fresh(now + TimeDelta::minutes(10), &entry));
        assert!(!policy.is_fresh(now + TimeDelta::minutes(11), &entry));
    }

    #[test]
    fn test_day_of_month_is_clamped() {
        assert_eq!(day_of_current_month(at(2, 10, 3), 31), at(2, 28, 0));
        assert_eq!(day_of_current_month(at(2, 10, 3), 0), at(2, 1, 0));
    }
}
