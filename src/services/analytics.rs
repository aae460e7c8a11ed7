//! Periodic rollups over the refresh history.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::models::{FreshnessAnalyticsRow, PeriodType};
use crate::store::StateStore;

/// Computes aggregate refresh statistics for fixed time windows.
pub struct AnalyticsAggregator {
    store: Arc<StateStore>,
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Aggregate the history rows in `[start, end)` into one analytics
    /// row, keyed by the period. Re-running the same window replaces the
    /// previous row, so rollups are safe to repeat.
    pub fn rollup(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period_type: PeriodType,
    ) -> FreshnessAnalyticsRow {
        let attempts = self.store.history_in_window(start, end);

        let attempted = attempts.len() as u64;
        let succeeded = attempts.iter().filter(|a| a.success).count() as u64;
        let failed = attempted - succeeded;
        let changes_detected = attempts.iter().filter(|a| a.changed).count() as u64;

        let mut durations: Vec<u64> = attempts.iter().map(|a| a.duration_ms).collect();
        durations.sort_unstable();

        let avg_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u64>() as f64 / durations.len() as f64
        };
        let median_duration_ms = median(&durations);

        let row = FreshnessAnalyticsRow {
            period_start: start,
            period_end: end,
            period_type,
            attempted,
            succeeded,
            failed,
            changes_detected,
            avg_duration_ms,
            median_duration_ms,
            computed_at: Utc::now(),
        };

        log::debug!(
            "Rollup {period_type:?} {start}..{end}: {attempted} attempts, {succeeded} ok, {changes_detected} changed"
        );
        self.store.upsert_analytics(row.clone());
        row
    }

    /// Roll up the most recently completed whole period of the given type,
    /// aligned to the hour/day/week boundary.
    pub fn rollup_previous(&self, period_type: PeriodType, now: DateTime<Utc>) -> FreshnessAnalyticsRow {
        let (start, end) = previous_period(period_type, now);
        self.rollup(start, end, period_type)
    }

    /// Most recent computed rows of the given period type, newest first.
    pub fn latest(&self, period_type: PeriodType, limit: usize) -> Vec<FreshnessAnalyticsRow> {
        self.store.analytics_rows(period_type, limit)
    }
}

/// Median of pre-sorted values; mean of the middle pair for even counts.
fn median(sorted: &[u64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2] as f64,
        n => (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0,
    }
}

/// The boundaries of the last fully elapsed period before `now`.
fn previous_period(period_type: PeriodType, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let span = match period_type {
        PeriodType::Hourly => Duration::hours(1),
        PeriodType::Daily => Duration::days(1),
        PeriodType::Weekly => Duration::weeks(1),
    };
    let span_secs = span.num_seconds();
    let aligned = now.timestamp() - now.timestamp().rem_euclid(span_secs);
    let end = DateTime::from_timestamp(aligned, 0).unwrap_or(now);
    (end - span, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetectionMethod, RefreshHistoryEntry};

    fn make_attempt(
        item_id: &str,
        success: bool,
        changed: bool,
        duration_ms: u64,
        recorded_at: DateTime<Utc>,
    ) -> RefreshHistoryEntry {
        RefreshHistoryEntry {
            entry_id: 1,
            item_id: item_id.to_string(),
            success,
            changed,
            change_score: if changed { 40.0 } else { 0.0 },
            detection_method: changed.then_some(DetectionMethod::ContentHash),
            duration_ms,
            error: (!success).then(|| "timeout".to_string()),
            recorded_at,
        }
    }

    #[test]
    fn test_rollup_counts_and_durations() {
        let store = Arc::new(StateStore::new());
        let start = Utc::now() - Duration::hours(1);
        let t = start + Duration::minutes(5);

        store.append_history(make_attempt("a", true, true, 100, t));
        store.append_history(make_attempt("b", true, false, 200, t));
        store.append_history(make_attempt("c", false, false, 300, t));
        store.append_history(make_attempt("d", true, true, 400, t));
        // Outside the window: ignored
        store.append_history(make_attempt("e", false, false, 999, start - Duration::hours(2)));

        let agg = AnalyticsAggregator::new(store);
        let row = agg.rollup(start, start + Duration::hours(1), PeriodType::Hourly);

        assert_eq!(row.attempted, 4);
        assert_eq!(row.succeeded, 3);
        assert_eq!(row.failed, 1);
        assert_eq!(row.changes_detected, 2);
        assert!((row.avg_duration_ms - 250.0).abs() < f64::EPSILON);
        assert!((row.median_duration_ms - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rollup_odd_count_median_and_empty_window() {
        let store = Arc::new(StateStore::new());
        let start = Utc::now() - Duration::hours(1);
        let t = start + Duration::minutes(1);

        store.append_history(make_attempt("a", true, false, 10, t));
        store.append_history(make_attempt("b", true, false, 50, t));
        store.append_history(make_attempt("c", true, false, 90, t));

        let agg = AnalyticsAggregator::new(store);
        let row = agg.rollup(start, start + Duration::hours(1), PeriodType::Hourly);
        assert!((row.median_duration_ms - 50.0).abs() < f64::EPSILON);

        let empty = agg.rollup(
            start - Duration::days(7),
            start - Duration::days(6),
            PeriodType::Daily,
        );
        assert_eq!(empty.attempted, 0);
        assert_eq!(empty.avg_duration_ms, 0.0);
        assert_eq!(empty.median_duration_ms, 0.0);
    }

    #[test]
    fn test_rollup_is_idempotent_per_period() {
        let store = Arc::new(StateStore::new());
        let start = Utc::now() - Duration::hours(1);
        store.append_history(make_attempt("a", true, false, 10, start + Duration::minutes(1)));

        let agg = AnalyticsAggregator::new(Arc::clone(&store));
        let end = start + Duration::hours(1);
        agg.rollup(start, end, PeriodType::Hourly);
        agg.rollup(start, end, PeriodType::Hourly);
        agg.rollup(start, end, PeriodType::Hourly);

        assert_eq!(store.analytics_rows(PeriodType::Hourly, 10).len(), 1);
    }

    #[test]
    fn test_latest_orders_newest_first_and_filters_type() {
        let store = Arc::new(StateStore::new());
        let agg = AnalyticsAggregator::new(Arc::clone(&store));
        let base = Utc::now() - Duration::days(1);

        for i in 0..3 {
            let start = base + Duration::hours(i);
            agg.rollup(start, start + Duration::hours(1), PeriodType::Hourly);
        }
        agg.rollup(base, base + Duration::days(1), PeriodType::Daily);

        let rows = agg.latest(PeriodType::Hourly, 2);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].period_start > rows[1].period_start);
        assert!(rows.iter().all(|r| r.period_type == PeriodType::Hourly));
    }

    #[test]
    fn test_previous_period_alignment() {
        let now = DateTime::parse_from_rfc3339("2025-03-10T14:37:21Z")
            .unwrap()
            .with_timezone(&Utc);
        let (start, end) = previous_period(PeriodType::Hourly, now);
        assert_eq!(end.to_rfc3339(), "2025-03-10T14:00:00+00:00");
        assert_eq!(start.to_rfc3339(), "2025-03-10T13:00:00+00:00");

        let (dstart, dend) = previous_period(PeriodType::Daily, now);
        assert_eq!(dend.to_rfc3339(), "2025-03-10T00:00:00+00:00");
        assert_eq!(dstart.to_rfc3339(), "2025-03-09T00:00:00+00:00");
    }
}
