// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Turns timing-system signals into timing trigger candidates.

pub mod offsets;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use core_types::{
    MetricSample, RunNumber, ServiceMetricsReporter, TimeStampedData, TimingCandidateMakerConfig,
    TriggerCandidate,
};
use engine_api::{
    Command, Engine, EngineError, EngineHealth, EngineResult, HealthStatus, LifecycleState,
};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;
use trigger_io::{ConnectionHub, IoError, MessageReceiver, MessageSender, ReceiveError};

pub use offsets::SignalOffsetTable;

pub const QUEUE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MakerError {
    #[error("no timing signal offsets configured")]
    NoSignals,
    #[error("no offsets configured for signal type {signal_type}")]
    UnknownSignalType { signal_type: u32 },
}

impl From<MakerError> for EngineError {
    fn from(value: MakerError) -> Self {
        EngineError::Configuration(value.to_string())
    }
}

pub struct TimingCandidateMaker {
    inner: Arc<MakerInner>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MakerMetricsSnapshot {
    pub data_received: u64,
    pub candidates_sent: u64,
    pub send_retries: u64,
    pub conversion_failures: u64,
    pub dropped: u64,
}

impl TimingCandidateMaker {
    /// Resolves both queues on `hub`; the maker is unusable without them.
    pub fn new(
        label: impl Into<String>,
        hub: &ConnectionHub,
        input: &str,
        output: &str,
    ) -> EngineResult<Self> {
        let input = hub
            .receiver::<TimeStampedData>(input)
            .map_err(connection_error)?;
        let output = hub
            .sender::<TriggerCandidate>(output)
            .map_err(connection_error)?;
        Ok(Self::with_endpoints(label, input, output))
    }

    pub fn with_endpoints(
        label: impl Into<String>,
        input: Arc<dyn MessageReceiver<TimeStampedData>>,
        output: Arc<dyn MessageSender<TriggerCandidate>>,
    ) -> Self {
        Self {
            inner: Arc::new(MakerInner {
                label: label.into(),
                input,
                output,
                control: Mutex::new(Control::default()),
                running: AtomicBool::new(false),
                counters: Counters::default(),
                health: Mutex::new(EngineHealth::default()),
            }),
        }
    }

    pub fn configure(&self, config: &TimingCandidateMakerConfig) -> EngineResult<()> {
        let mut control = self.inner.control.lock();
        let next = control.lifecycle.transition(Command::Configure)?;
        let table = SignalOffsetTable::from_config(config)?;
        info!(
            "[{}] configured with {} timing signal types",
            self.inner.label,
            table.len()
        );
        control.offsets = Some(Arc::new(table));
        control.lifecycle = next;
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn metrics_snapshot(&self) -> MakerMetricsSnapshot {
        self.inner.counters.snapshot()
    }
}

impl Engine for TimingCandidateMaker {
    fn start(&self, run_number: RunNumber) -> EngineResult<()> {
        MakerInner::start(&self.inner, run_number)
    }

    fn stop(&self) -> EngineResult<()> {
        self.inner.stop()
    }

    fn scrap(&self) -> EngineResult<()> {
        let mut control = self.inner.control.lock();
        control.lifecycle = control.lifecycle.transition(Command::Scrap)?;
        control.offsets = None;
        Ok(())
    }

    fn lifecycle(&self) -> LifecycleState {
        self.inner.control.lock().lifecycle
    }

    fn health(&self) -> EngineHealth {
        self.inner.health.lock().clone()
    }
}

impl ServiceMetricsReporter for TimingCandidateMaker {
    fn service_name(&self) -> &str {
        &self.inner.label
    }

    fn collect_metrics(&self) -> Vec<MetricSample> {
        let snapshot = self.metrics_snapshot();
        vec![
            MetricSample::gauge("data_received_count", snapshot.data_received as f64),
            MetricSample::gauge("tc_sent_count", snapshot.candidates_sent as f64),
            MetricSample::gauge("tc_send_retry_count", snapshot.send_retries as f64),
            MetricSample::gauge(
                "conversion_failure_count",
                snapshot.conversion_failures as f64,
            ),
            MetricSample::gauge("tc_dropped_count", snapshot.dropped as f64),
        ]
    }
}

impl Drop for TimingCandidateMaker {
    fn drop(&mut self) {
        let running = self.inner.control.lock().lifecycle.is_running();
        if running {
            if let Err(err) = self.inner.stop() {
                error!("[{}] stop on drop failed: {}", self.inner.label, err);
            }
        }
    }
}

#[derive(Default)]
struct Control {
    lifecycle: LifecycleState,
    offsets: Option<Arc<SignalOffsetTable>>,
    worker: Option<thread::JoinHandle<()>>,
}

#[derive(Default)]
struct Counters {
    data_received: AtomicU64,
    candidates_sent: AtomicU64,
    send_retries: AtomicU64,
    conversion_failures: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.data_received,
            &self.candidates_sent,
            &self.send_retries,
            &self.conversion_failures,
            &self.dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> MakerMetricsSnapshot {
        MakerMetricsSnapshot {
            data_received: self.data_received.load(Ordering::Relaxed),
            candidates_sent: self.candidates_sent.load(Ordering::Relaxed),
            send_retries: self.send_retries.load(Ordering::Relaxed),
            conversion_failures: self.conversion_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct MakerInner {
    label: String,
    input: Arc<dyn MessageReceiver<TimeStampedData>>,
    output: Arc<dyn MessageSender<TriggerCandidate>>,
    control: Mutex<Control>,
    running: AtomicBool,
    counters: Counters,
    health: Mutex<EngineHealth>,
}

impl MakerInner {
    fn start(this: &Arc<Self>, run_number: RunNumber) -> EngineResult<()> {
        let mut control = this.control.lock();
        let next = control.lifecycle.transition(Command::Start)?;
        let Some(offsets) = control.offsets.clone() else {
            return Err(EngineError::Configuration(
                "maker has no signal offsets".to_string(),
            ));
        };
        this.set_health(HealthStatus::Starting, None);
        this.counters.reset();
        this.running.store(true, Ordering::Release);

        let runner = Arc::clone(this);
        let handle = thread::Builder::new()
            .name(format!("{}-tcm", this.label))
            .spawn(move || runner.run(offsets))
            .map_err(|err| {
                this.running.store(false, Ordering::Release);
                this.set_health(HealthStatus::Failed, Some(err.to_string()));
                EngineError::Failure {
                    source: Box::new(err),
                }
            })?;
        control.worker = Some(handle);
        control.lifecycle = next;
        info!("[{}] run {} started", this.label, run_number);
        Ok(())
    }

    fn stop(&self) -> EngineResult<()> {
        let mut control = self.control.lock();
        let next = control.lifecycle.transition(Command::Stop)?;
        self.running.store(false, Ordering::Release);
        if let Some(handle) = control.worker.take() {
            if let Err(err) = handle.join() {
                error!("[{}] worker join error: {:?}", self.label, err);
            }
        }
        control.lifecycle = next;
        self.set_health(HealthStatus::Stopped, None);
        let summary = self.counters.snapshot();
        info!(
            "[{}] stopped: received {}, sent {}, retries {}, conversion failures {}, dropped {}",
            self.label,
            summary.data_received,
            summary.candidates_sent,
            summary.send_retries,
            summary.conversion_failures,
            summary.dropped
        );
        Ok(())
    }

    fn run(self: Arc<Self>, offsets: Arc<SignalOffsetTable>) {
        self.set_health(HealthStatus::Ready, None);
        while self.running.load(Ordering::Acquire) {
            let data = match self.input.try_receive(QUEUE_TIMEOUT) {
                Ok(data) => data,
                Err(ReceiveError::Timeout(_)) => continue,
                Err(ReceiveError::Disconnected(name)) => {
                    self.set_health(
                        HealthStatus::Degraded,
                        Some(format!("input {name} disconnected")),
                    );
                    thread::sleep(QUEUE_TIMEOUT);
                    continue;
                }
            };
            self.counters.data_received.fetch_add(1, Ordering::Relaxed);
            match offsets.convert(&data) {
                Ok(candidate) => self.forward(candidate),
                Err(err) => {
                    self.counters
                        .conversion_failures
                        .fetch_add(1, Ordering::Relaxed);
                    error!(
                        "[{}] skipping timing data at {}: {}",
                        self.label, data.time_stamp, err
                    );
                }
            }
        }
        debug!("[{}] worker exiting", self.label);
    }

    /// Pushes until delivered; gives up only once stop is requested or the output is gone.
    fn forward(&self, candidate: TriggerCandidate) {
        let time_candidate = candidate.time_candidate;
        let mut pending = candidate;
        loop {
            let err = match self.output.send(pending, QUEUE_TIMEOUT) {
                Ok(()) => {
                    self.counters.candidates_sent.fetch_add(1, Ordering::Relaxed);
                    debug!("[{}] sent timing candidate at {}", self.label, time_candidate);
                    return;
                }
                Err(err) => err,
            };
            if err.is_timeout() && self.running.load(Ordering::Acquire) {
                self.counters.send_retries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "[{}] push to output queue \"{}\" timed out after {:?}, retrying",
                    self.label,
                    self.output.name(),
                    QUEUE_TIMEOUT
                );
                pending = err.into_item();
                continue;
            }
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            error!(
                "[{}] dropping timing candidate at {}: {}",
                self.label, time_candidate, err
            );
            if !err.is_timeout() {
                self.set_health(HealthStatus::Degraded, Some(err.to_string()));
            }
            return;
        }
    }

    fn set_health(&self, status: HealthStatus, detail: Option<String>) {
        let mut guard = self.health.lock();
        guard.status = status;
        guard.detail = detail;
    }
}

fn connection_error(err: IoError) -> EngineError {
    EngineError::Connection {
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::SignalOffsets;
    use std::time::Instant;
    use trigger_io::{QueueReceiver, QueueSender, bounded};

    struct Harness {
        data: QueueSender<TimeStampedData>,
        candidates: QueueReceiver<TriggerCandidate>,
        backlog: QueueSender<TriggerCandidate>,
        maker: TimingCandidateMaker,
    }

    fn harness(output_capacity: usize) -> Harness {
        let (data, input) = bounded::<TimeStampedData>("timing_data", 16);
        let (backlog, candidates) =
            bounded::<TriggerCandidate>("trigger_candidates", output_capacity);
        let maker = TimingCandidateMaker::with_endpoints(
            "tcm",
            Arc::new(input),
            Arc::new(backlog.clone()),
        );
        maker
            .configure(&TimingCandidateMakerConfig {
                signals: vec![SignalOffsets {
                    signal_type: 1,
                    time_before: 100,
                    time_after: 200,
                }],
            })
            .unwrap();
        Harness {
            data,
            candidates,
            backlog,
            maker,
        }
    }

    fn timing(time_stamp: u64, signal_type: u32) -> TimeStampedData {
        TimeStampedData {
            time_stamp,
            signal_type,
            counter: 0,
        }
    }

    fn wait_for(maker: &TimingCandidateMaker, predicate: impl Fn(&MakerMetricsSnapshot) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate(&maker.metrics_snapshot()) {
            assert!(Instant::now() < deadline, "timed out at {:?}", maker.metrics_snapshot());
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn forwards_converted_candidates() {
        let h = harness(8);
        h.maker.start(1).unwrap();
        h.data.send(timing(5_000, 1), QUEUE_TIMEOUT).unwrap();
        let candidate = h.candidates.try_receive(Duration::from_secs(1)).unwrap();
        assert_eq!(candidate.time_start, 4_900);
        assert_eq!(candidate.time_end, 5_200);
        wait_for(&h.maker, |s| s.candidates_sent == 1);
        h.maker.stop().unwrap();
        assert_eq!(h.maker.health().status, HealthStatus::Stopped);
    }

    #[test]
    fn unknown_signal_types_are_counted_and_skipped() {
        let h = harness(8);
        h.maker.start(1).unwrap();
        h.data.send(timing(10, 4), QUEUE_TIMEOUT).unwrap();
        h.data.send(timing(1_000, 1), QUEUE_TIMEOUT).unwrap();
        wait_for(&h.maker, |s| s.candidates_sent == 1);
        let snapshot = h.maker.metrics_snapshot();
        assert_eq!(snapshot.data_received, 2);
        assert_eq!(snapshot.conversion_failures, 1);
        assert_eq!(
            h.candidates.try_receive(Duration::from_secs(1)).unwrap().time_candidate,
            1_000
        );
        h.maker.stop().unwrap();
    }

    #[test]
    fn full_output_is_retried_until_delivered() {
        let h = harness(1);
        h.backlog
            .send(TriggerCandidate::default(), QUEUE_TIMEOUT)
            .unwrap();
        h.maker.start(1).unwrap();
        h.data.send(timing(700, 1), QUEUE_TIMEOUT).unwrap();
        wait_for(&h.maker, |s| s.send_retries >= 1);

        assert_eq!(h.candidates.drain().len(), 1);
        wait_for(&h.maker, |s| s.candidates_sent == 1);
        assert_eq!(
            h.candidates.try_receive(Duration::from_secs(1)).unwrap().time_candidate,
            700
        );
        assert_eq!(h.maker.metrics_snapshot().dropped, 0);
        h.maker.stop().unwrap();
    }

    #[test]
    fn stop_abandons_a_blocked_push() {
        let h = harness(1);
        h.backlog
            .send(TriggerCandidate::default(), QUEUE_TIMEOUT)
            .unwrap();
        h.maker.start(1).unwrap();
        h.data.send(timing(700, 1), QUEUE_TIMEOUT).unwrap();
        wait_for(&h.maker, |s| s.send_retries >= 1);
        h.maker.stop().unwrap();
        let snapshot = h.maker.metrics_snapshot();
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.candidates_sent, 0);
    }

    #[test]
    fn lifecycle_is_enforced() {
        let h = harness(8);
        assert!(matches!(
            h.maker.enable_triggers(),
            Err(EngineError::UnsupportedCommand { .. })
        ));
        assert!(matches!(h.maker.stop(), Err(EngineError::NotRunning)));
        h.maker.start(1).unwrap();
        assert!(matches!(
            h.maker.configure(&TimingCandidateMakerConfig::default()),
            Err(EngineError::InvalidCommand { .. })
        ));
        h.maker.stop().unwrap();
        h.maker.scrap().unwrap();
        assert_eq!(h.maker.lifecycle(), LifecycleState::Unconfigured);
        assert!(matches!(
            h.maker.start(2),
            Err(EngineError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn missing_offsets_fail_configuration() {
        let h = harness(8);
        h.maker.scrap().unwrap();
        let err = h
            .maker
            .configure(&TimingCandidateMakerConfig::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(msg) if msg.contains("no timing signal")));
        assert_eq!(h.maker.lifecycle(), LifecycleState::Unconfigured);
    }

    #[test]
    fn unknown_connections_are_fatal() {
        let hub = ConnectionHub::new();
        hub.register_queue::<TimeStampedData>("timing_data", 4).unwrap();
        assert!(matches!(
            TimingCandidateMaker::new("tcm", &hub, "timing_data", "trigger_candidates"),
            Err(EngineError::Connection { .. })
        ));
    }
}
