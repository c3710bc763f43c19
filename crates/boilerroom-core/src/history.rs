//! Rolling boiler history and analytics.
//!
//! The boiler status estimator is the only writer. It records the status and
//! both boiler temperatures under the same timestamp on every classified
//! tick; analytics queries read concurrently under the same lock, so they
//! always see one consistent prune boundary.
//!
//! # Interval reconstruction
//!
//! Status samples are walked in time order and consecutive samples with the
//! same status are merged into one run. A run lasts from its first sample to
//! the first sample of the next run; the trailing run is closed at the time
//! of the query. Only `Works` and `Idle` runs count; `Init` and `Error` runs
//! just separate them.
//!
//! | Metric | Window | Formula |
//! |--------|--------|---------|
//! | Duty cycle | 3 h / 24 h | work / (work + idle) * 100, 0 when both are 0 |
//! | Mean delta | 3 h | mean of supply - return over `Works` samples |
//! | Power | 3 h | 1.163 * flow * mean delta * duty / 100 |
//! | Ignitions/hour | 24 h | work runs / hours since the oldest sample |

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use boilerroom_types::{BoilerStatus, IntervalKind, TemperatureKind, WorkIdleInterval};

use crate::error::{Error, Result};
use crate::util::{read, write};

/// Specific heat of water in kWh per m³ and kelvin.
pub const WATER_HEAT_CAPACITY: f64 = 1.163;

/// History retention and power estimation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// How long samples are kept.
    pub retention_hours: u32,
    /// Window of the power estimate.
    pub power_window_hours: u32,
    /// Circulation flow through the boiler in m³/h.
    pub flow_m3h: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            power_window_hours: 3,
            flow_m3h: 1.2,
        }
    }
}

impl HistoryConfig {
    /// Check the settings.
    pub fn validate(&self) -> Result<()> {
        if self.retention_hours == 0 {
            return Err(Error::invalid_config("history retention must be > 0"));
        }
        if self.power_window_hours == 0 || self.power_window_hours > self.retention_hours {
            return Err(Error::invalid_config(
                "power window must be > 0 and within the retention",
            ));
        }
        if !self.flow_m3h.is_finite() || self.flow_m3h < 0.0 {
            return Err(Error::invalid_config("flow must be a non-negative number"));
        }
        Ok(())
    }

    fn retention(&self) -> Duration {
        Duration::hours(i64::from(self.retention_hours))
    }

    fn power_window(&self) -> Duration {
        Duration::hours(i64::from(self.power_window_hours))
    }
}

/// Result of [`History::estimate_recent_power`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerEstimate {
    /// Minutes worked in the window.
    pub work_minutes: f64,
    /// Minutes idle in the window.
    pub idle_minutes: f64,
    /// Share of working time in percent.
    pub duty_cycle_percent: f64,
    /// Mean supply minus return while working.
    pub mean_delta: Option<f64>,
    /// Estimated average thermal output.
    pub power_kw: f64,
}

#[derive(Debug, Default)]
struct Series {
    status: BTreeMap<OffsetDateTime, BoilerStatus>,
    supply: BTreeMap<OffsetDateTime, f64>,
    ret: BTreeMap<OffsetDateTime, f64>,
}

impl Series {
    fn prune(&mut self, cutoff: OffsetDateTime) {
        self.status = self.status.split_off(&cutoff);
        self.supply = self.supply.split_off(&cutoff);
        self.ret = self.ret.split_off(&cutoff);
    }

    fn temperatures(&mut self, kind: TemperatureKind) -> &mut BTreeMap<OffsetDateTime, f64> {
        match kind {
            TemperatureKind::Supply => &mut self.supply,
            TemperatureKind::Return => &mut self.ret,
        }
    }
}

/// Rolling time series of boiler status and temperatures.
#[derive(Debug, Default)]
pub struct History {
    config: HistoryConfig,
    series: RwLock<Series>,
}

impl History {
    /// Create an empty history.
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            series: RwLock::new(Series::default()),
        }
    }

    /// Record a status sample and prune old entries.
    pub fn record_status(&self, status: BoilerStatus, ts: OffsetDateTime) {
        let mut series = write(&self.series);
        series.status.insert(ts, status);
        series.prune(ts - self.config.retention());
    }

    /// Record a temperature sample and prune old entries.
    pub fn record_temperature(&self, kind: TemperatureKind, value: f64, ts: OffsetDateTime) {
        let mut series = write(&self.series);
        series.temperatures(kind).insert(ts, value);
        series.prune(ts - self.config.retention());
    }

    /// Number of status samples currently retained.
    pub fn status_len(&self) -> usize {
        read(&self.series).status.len()
    }

    /// Oldest retained status sample.
    pub fn oldest(&self) -> Option<OffsetDateTime> {
        read(&self.series).status.keys().next().copied()
    }

    /// Status samples at or after `since`.
    pub fn status_since(&self, since: OffsetDateTime) -> Vec<(OffsetDateTime, BoilerStatus)> {
        read(&self.series)
            .status
            .range(since..)
            .map(|(ts, status)| (*ts, *status))
            .collect()
    }

    /// Work/idle runs of the samples at or after `since`, the last one closed at `now`.
    pub fn intervals(&self, since: OffsetDateTime, now: OffsetDateTime) -> Vec<WorkIdleInterval> {
        reconstruct_intervals(&self.status_since(since), now)
    }

    /// Duty cycle and average thermal power over the power window.
    pub fn estimate_recent_power(&self, now: OffsetDateTime) -> PowerEstimate {
        let since = now - self.config.power_window();
        let series = read(&self.series);

        let samples: Vec<_> = series
            .status
            .range(since..)
            .map(|(ts, status)| (*ts, *status))
            .collect();
        let intervals = reconstruct_intervals(&samples, now);
        let (work_minutes, idle_minutes) = totals(&intervals);
        let duty_cycle_percent = duty_cycle(work_minutes, idle_minutes);

        let deltas: Vec<f64> = samples
            .iter()
            .filter(|(_, status)| *status == BoilerStatus::Works)
            .filter_map(|(ts, _)| Some(series.supply.get(ts)? - series.ret.get(ts)?))
            .collect();
        let mean_delta = if deltas.is_empty() {
            None
        } else {
            Some(deltas.iter().sum::<f64>() / deltas.len() as f64)
        };

        let power_kw = match mean_delta {
            Some(delta) if work_minutes > 0.0 => {
                WATER_HEAT_CAPACITY * self.config.flow_m3h * delta * duty_cycle_percent / 100.0
            }
            _ => 0.0,
        };

        PowerEstimate {
            work_minutes,
            idle_minutes,
            duty_cycle_percent,
            mean_delta,
            power_kw,
        }
    }

    /// One-paragraph summary of the retention window.
    pub fn format_last_day_summary(&self, now: OffsetDateTime) -> String {
        let since = now - self.config.retention();
        let samples = self.status_since(since);
        let Some((oldest, _)) = samples.first().copied() else {
            return "No boiler history recorded yet.".to_string();
        };

        let intervals = reconstruct_intervals(&samples, now);
        let (work, idle) = totals(&intervals);
        let ignitions = intervals
            .iter()
            .filter(|i| i.kind == IntervalKind::Work)
            .count();
        let hours = (now - oldest).as_seconds_f64() / 3600.0;

        let frequency = if hours < 1.0 {
            format!("{} ignitions in the last {:.0} min", ignitions, hours * 60.0)
        } else {
            format!(
                "{:.1} ignitions per hour over {:.1} h",
                ignitions as f64 / hours,
                hours
            )
        };

        format!(
            "Boiler duty cycle: {:.1}% ({:.0} min working, {:.0} min idle)\nCycling: {}",
            duty_cycle(work, idle),
            work,
            idle,
            frequency
        )
    }
}

/// Merge time-ordered samples into work/idle runs.
pub fn reconstruct_intervals(
    samples: &[(OffsetDateTime, BoilerStatus)],
    now: OffsetDateTime,
) -> Vec<WorkIdleInterval> {
    let mut runs: Vec<(OffsetDateTime, BoilerStatus)> = Vec::new();
    for &(ts, status) in samples {
        match runs.last() {
            Some(&(_, current)) if current == status => {}
            _ => runs.push((ts, status)),
        }
    }

    let mut intervals = Vec::with_capacity(runs.len());
    for (i, &(start, status)) in runs.iter().enumerate() {
        let end = runs.get(i + 1).map_or(now, |&(next, _)| next);
        let kind = match status {
            BoilerStatus::Works => IntervalKind::Work,
            BoilerStatus::Idle => IntervalKind::Idle,
            BoilerStatus::Init | BoilerStatus::Error => continue,
        };
        let duration_minutes = ((end - start).as_seconds_f64() / 60.0).max(0.0);
        intervals.push(WorkIdleInterval {
            duration_minutes,
            kind,
        });
    }
    intervals
}

fn totals(intervals: &[WorkIdleInterval]) -> (f64, f64) {
    intervals.iter().fold((0.0, 0.0), |(work, idle), i| match i.kind {
        IntervalKind::Work => (work + i.duration_minutes, idle),
        IntervalKind::Idle => (work, idle + i.duration_minutes),
    })
}

fn duty_cycle(work: f64, idle: f64) -> f64 {
    let total = work + idle;
    if total <= 0.0 { 0.0 } else { work * 100.0 / total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-01-15 06:00 UTC);

    fn at(minutes: i64) -> OffsetDateTime {
        T0 + Duration::minutes(minutes)
    }

    fn record(history: &History, minutes: i64, status: BoilerStatus, supply: f64, ret: f64) {
        let ts = at(minutes);
        history.record_status(status, ts);
        history.record_temperature(TemperatureKind::Supply, supply, ts);
        history.record_temperature(TemperatureKind::Return, ret, ts);
    }

    // --- Interval reconstruction ---

    #[test]
    fn test_consecutive_equal_statuses_merge() {
        let samples = vec![
            (at(0), BoilerStatus::Works),
            (at(5), BoilerStatus::Works),
            (at(10), BoilerStatus::Idle),
            (at(12), BoilerStatus::Idle),
        ];
        let intervals = reconstruct_intervals(&samples, at(20));
        assert_eq!(
            intervals,
            vec![
                WorkIdleInterval {
                    duration_minutes: 10.0,
                    kind: IntervalKind::Work
                },
                WorkIdleInterval {
                    duration_minutes: 10.0,
                    kind: IntervalKind::Idle
                },
            ]
        );
    }

    #[test]
    fn test_init_and_error_runs_only_separate() {
        let samples = vec![
            (at(0), BoilerStatus::Init),
            (at(1), BoilerStatus::Works),
            (at(4), BoilerStatus::Error),
            (at(6), BoilerStatus::Works),
        ];
        let intervals = reconstruct_intervals(&samples, at(10));
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].duration_minutes, 3.0);
        assert_eq!(intervals[1].duration_minutes, 4.0);
    }

    #[test]
    fn test_trailing_run_never_negative() {
        let samples = vec![(at(10), BoilerStatus::Works)];
        let intervals = reconstruct_intervals(&samples, at(5));
        assert_eq!(intervals[0].duration_minutes, 0.0);
    }

    // --- Power estimate ---

    #[test]
    fn test_duty_cycle_exact_for_alternating_series() {
        let history = History::new(HistoryConfig::default());
        record(&history, 0, BoilerStatus::Works, 60.0, 50.0);
        record(&history, 30, BoilerStatus::Idle, 55.0, 50.0);
        record(&history, 50, BoilerStatus::Works, 62.0, 50.0);
        record(&history, 80, BoilerStatus::Idle, 50.0, 48.0);

        let estimate = history.estimate_recent_power(at(100));
        assert_eq!(estimate.work_minutes, 60.0);
        assert_eq!(estimate.idle_minutes, 40.0);
        assert_eq!(estimate.duty_cycle_percent, 60.0);
        assert_eq!(estimate.mean_delta, Some(11.0));

        let expected = WATER_HEAT_CAPACITY * 1.2 * 11.0 * 60.0 / 100.0;
        assert!((estimate.power_kw - expected).abs() < 1e-9);
    }

    #[test]
    fn test_no_samples_gives_zero_not_nan() {
        let history = History::new(HistoryConfig::default());
        let estimate = history.estimate_recent_power(at(0));
        assert_eq!(estimate.duty_cycle_percent, 0.0);
        assert_eq!(estimate.power_kw, 0.0);
        assert_eq!(estimate.mean_delta, None);
    }

    #[test]
    fn test_samples_outside_power_window_ignored() {
        let history = History::new(HistoryConfig::default());
        record(&history, 0, BoilerStatus::Works, 60.0, 50.0);
        let estimate = history.estimate_recent_power(at(4 * 60));
        assert_eq!(estimate.duty_cycle_percent, 0.0);
        assert_eq!(estimate.power_kw, 0.0);
    }

    #[test]
    fn test_idle_only_has_no_power() {
        let history = History::new(HistoryConfig::default());
        record(&history, 0, BoilerStatus::Idle, 40.0, 38.0);
        let estimate = history.estimate_recent_power(at(30));
        assert_eq!(estimate.idle_minutes, 30.0);
        assert_eq!(estimate.duty_cycle_percent, 0.0);
        assert_eq!(estimate.power_kw, 0.0);
    }

    // --- Retention ---

    #[test]
    fn test_entries_older_than_retention_pruned_on_insert() {
        let history = History::new(HistoryConfig::default());
        record(&history, 0, BoilerStatus::Works, 60.0, 50.0);
        record(&history, 60, BoilerStatus::Idle, 50.0, 45.0);
        assert_eq!(history.status_len(), 2);

        record(&history, 25 * 60, BoilerStatus::Works, 60.0, 50.0);
        assert_eq!(history.status_len(), 2);
        assert_eq!(history.oldest(), Some(at(60)));
    }

    // --- Summary ---

    #[test]
    fn test_summary_empty() {
        let history = History::new(HistoryConfig::default());
        assert_eq!(
            history.format_last_day_summary(at(0)),
            "No boiler history recorded yet."
        );
    }

    #[test]
    fn test_summary_under_an_hour_reports_raw_count() {
        let history = History::new(HistoryConfig::default());
        record(&history, 0, BoilerStatus::Works, 60.0, 50.0);
        record(&history, 10, BoilerStatus::Idle, 50.0, 45.0);
        record(&history, 20, BoilerStatus::Works, 60.0, 50.0);

        let summary = history.format_last_day_summary(at(30));
        assert!(summary.contains("2 ignitions in the last 30 min"), "{}", summary);
        assert!(summary.contains("66.7%"), "{}", summary);
    }

    #[test]
    fn test_summary_ignitions_per_hour() {
        let history = History::new(HistoryConfig::default());
        for hour in 0..4 {
            record(&history, hour * 60, BoilerStatus::Works, 60.0, 50.0);
            record(&history, hour * 60 + 15, BoilerStatus::Idle, 50.0, 45.0);
        }
        let summary = history.format_last_day_summary(at(4 * 60));
        assert!(summary.contains("1.0 ignitions per hour over 4.0 h"), "{}", summary);
        assert!(summary.contains("25.0%"), "{}", summary);
    }

    #[test]
    fn test_config_validation() {
        assert!(HistoryConfig::default().validate().is_ok());
        let config = HistoryConfig {
            power_window_hours: 48,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
