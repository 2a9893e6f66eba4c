use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use core_types::MetricSample;

use crate::livetime::{LivetimeSnapshot, LivetimeState};

#[derive(Default)]
struct MltMetricsInner {
    candidates_received: AtomicU64,
    decisions_sent: AtomicU64,
    decisions_inhibited: AtomicU64,
    decisions_paused: AtomicU64,
    decisions_total: AtomicU64,
    send_failures: AtomicU64,
}

/// Per-run dispatch counters; monotonic within a run and zeroed at run start.
#[derive(Clone, Default)]
pub struct MltMetrics {
    inner: Arc<MltMetricsInner>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MltMetricsSnapshot {
    pub candidates_received: u64,
    pub decisions_sent: u64,
    pub decisions_inhibited: u64,
    pub decisions_paused: u64,
    pub decisions_total: u64,
    pub send_failures: u64,
    /// Live while a run is active, frozen at stop afterwards; `None` before the first run.
    pub livetime: Option<LivetimeSnapshot>,
    /// Dead plus paused time recorded when the last run stopped.
    pub final_deadtime: Option<Duration>,
}

impl MltMetricsSnapshot {
    pub fn to_samples(&self) -> Vec<MetricSample> {
        let mut samples = vec![
            MetricSample::gauge("tc_received_count", self.candidates_received as f64),
            MetricSample::gauge("td_sent_count", self.decisions_sent as f64),
            MetricSample::gauge("td_inhibited_count", self.decisions_inhibited as f64),
            MetricSample::gauge("td_paused_count", self.decisions_paused as f64),
            MetricSample::gauge("td_total_count", self.decisions_total as f64),
            MetricSample::gauge("td_send_failure_count", self.send_failures as f64),
        ];
        let livetime = self.livetime.unwrap_or_default();
        for state in LivetimeState::ALL {
            samples.push(
                MetricSample::gauge("lc_time_ms", livetime.get(state).as_millis() as f64)
                    .with_label("state", state.as_str()),
            );
        }
        if let Some(deadtime) = self.final_deadtime {
            samples.push(MetricSample::gauge(
                "lc_deadtime_ms",
                deadtime.as_millis() as f64,
            ));
        }
        samples
    }
}

impl MltMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        let inner = &self.inner;
        for counter in [
            &inner.candidates_received,
            &inner.decisions_sent,
            &inner.decisions_inhibited,
            &inner.decisions_paused,
            &inner.decisions_total,
            &inner.send_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn inc_received(&self) {
        self.inner.candidates_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sent(&self) {
        self.inner.decisions_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_inhibited(&self) {
        self.inner.decisions_inhibited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_paused(&self) {
        self.inner.decisions_paused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_total(&self) {
        self.inner.decisions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_failures(&self) {
        self.inner.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        livetime: Option<LivetimeSnapshot>,
        final_deadtime: Option<Duration>,
    ) -> MltMetricsSnapshot {
        let inner = &self.inner;
        MltMetricsSnapshot {
            candidates_received: inner.candidates_received.load(Ordering::Relaxed),
            decisions_sent: inner.decisions_sent.load(Ordering::Relaxed),
            decisions_inhibited: inner.decisions_inhibited.load(Ordering::Relaxed),
            decisions_paused: inner.decisions_paused.load(Ordering::Relaxed),
            decisions_total: inner.decisions_total.load(Ordering::Relaxed),
            send_failures: inner.send_failures.load(Ordering::Relaxed),
            livetime,
            final_deadtime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_every_counter() {
        let metrics = MltMetrics::new();
        metrics.inc_received();
        metrics.inc_sent();
        metrics.inc_send_failures();
        metrics.inc_total();
        metrics.reset();
        assert_eq!(metrics.snapshot(None, None), MltMetricsSnapshot::default());
    }

    #[test]
    fn samples_cover_counters_and_livetime() {
        let metrics = MltMetrics::new();
        metrics.inc_received();
        metrics.inc_paused();
        metrics.inc_total();
        let livetime = LivetimeSnapshot {
            live: Duration::from_millis(30),
            paused: Duration::from_millis(20),
            dead: Duration::from_millis(5),
            elapsed: Duration::from_millis(55),
        };
        let snapshot = metrics.snapshot(Some(livetime), Some(livetime.deadtime()));
        let samples = snapshot.to_samples();

        let value = |metric: &str, state: Option<&str>| {
            samples
                .iter()
                .find(|s| {
                    s.metric == metric
                        && state.is_none_or(|state| {
                            s.labels.iter().any(|(k, v)| k == "state" && v == state)
                        })
                })
                .map(|s| s.value)
        };
        assert_eq!(value("tc_received_count", None), Some(1.0));
        assert_eq!(value("td_paused_count", None), Some(1.0));
        assert_eq!(value("td_sent_count", None), Some(0.0));
        assert_eq!(value("lc_time_ms", Some("live")), Some(30.0));
        assert_eq!(value("lc_time_ms", Some("dead")), Some(5.0));
        assert_eq!(value("lc_deadtime_ms", None), Some(25.0));
    }
}
