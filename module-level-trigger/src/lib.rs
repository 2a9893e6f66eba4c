// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Module level trigger: admits trigger candidates and dispatches trigger decisions.
//!
//! One dispatch thread pulls candidates, gates them on the paused and downstream-busy flags
//! and pushes decisions downstream. Busy messages from the decision consumer arrive on the
//! inhibit signal's own dispatcher thread and only touch atomics and the livetime counter.

pub mod livetime;
pub mod metrics;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use core_types::{
    CandidateType, ComponentRequest, LinkId, MetricSample, ModuleLevelTriggerConfig,
    ReadoutType, RunNumber, ServiceMetricsReporter, SystemType, TriggerCandidate,
    TriggerDecision, TriggerInhibit, TriggerNumber, TriggerType,
};
use engine_api::{
    Command, Engine, EngineError, EngineHealth, EngineResult, HealthStatus, LifecycleState,
};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use trigger_io::{ConnectionHub, MessageReceiver, MessageSender, ReceiveError, SignalSource};

pub use livetime::{LivetimeCounter, LivetimeSnapshot, LivetimeState};
pub use metrics::{MltMetrics, MltMetricsSnapshot};

/// Trigger type used when candidate types are not passed through.
pub const DEFAULT_TRIGGER_TYPE: TriggerType = 1;
pub const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);
pub const SEND_TIMEOUT: Duration = Duration::from_millis(1);
const DISPATCH_THREAD_NAME: &str = "mlt-trig-dec";

pub struct ModuleLevelTrigger {
    inner: Arc<MltInner>,
}

impl ModuleLevelTrigger {
    /// Resolves the candidate input on `hub`; the module is unusable without it.
    pub fn new(
        label: impl Into<String>,
        hub: Arc<ConnectionHub>,
        candidate_source: &str,
    ) -> EngineResult<Self> {
        let candidates = hub
            .receiver::<TriggerCandidate>(candidate_source)
            .map_err(connection_error)?;
        Ok(Self::with_source(label, hub, candidates))
    }

    pub fn with_source(
        label: impl Into<String>,
        hub: Arc<ConnectionHub>,
        candidates: Arc<dyn MessageReceiver<TriggerCandidate>>,
    ) -> Self {
        Self {
            inner: MltInner::new(label.into(), hub, candidates),
        }
    }

    /// Validates `config` and resolves its connections. On error the previous configuration
    /// and lifecycle state are left untouched.
    pub fn configure(&self, config: &ModuleLevelTriggerConfig) -> EngineResult<()> {
        self.inner.configure(config)
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn metrics_snapshot(&self) -> MltMetricsSnapshot {
        self.inner.metrics_snapshot()
    }

    pub fn run_number(&self) -> RunNumber {
        self.inner.run_number.load(Ordering::Acquire)
    }

    /// Links of the current configuration; empty while unconfigured.
    pub fn links(&self) -> Vec<LinkId> {
        self.inner
            .control
            .lock()
            .settings
            .as_ref()
            .map(|settings| settings.links.clone())
            .unwrap_or_default()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    pub fn downstream_busy(&self) -> bool {
        self.inner.downstream_busy.load(Ordering::Acquire)
    }

    /// Current livetime state while a run is active.
    pub fn livetime_state(&self) -> Option<LivetimeState> {
        match &*self.inner.livetime.lock() {
            LivetimeSlot::Active(counter) => Some(counter.state()),
            LivetimeSlot::Idle | LivetimeSlot::Frozen(_) => None,
        }
    }
}

impl Engine for ModuleLevelTrigger {
    fn start(&self, run_number: RunNumber) -> EngineResult<()> {
        MltInner::start(&self.inner, run_number)
    }

    fn stop(&self) -> EngineResult<()> {
        self.inner.stop()
    }

    fn scrap(&self) -> EngineResult<()> {
        self.inner.scrap()
    }

    fn enable_triggers(&self) -> EngineResult<()> {
        self.inner.set_paused(false)
    }

    fn disable_triggers(&self) -> EngineResult<()> {
        self.inner.set_paused(true)
    }

    fn lifecycle(&self) -> LifecycleState {
        self.inner.control.lock().lifecycle
    }

    fn health(&self) -> EngineHealth {
        self.inner.health.lock().clone()
    }
}

impl ServiceMetricsReporter for ModuleLevelTrigger {
    fn service_name(&self) -> &str {
        &self.inner.label
    }

    fn collect_metrics(&self) -> Vec<MetricSample> {
        self.metrics_snapshot().to_samples()
    }
}

impl Drop for ModuleLevelTrigger {
    fn drop(&mut self) {
        let running = self.inner.control.lock().lifecycle.is_running();
        if running {
            if let Err(err) = self.inner.stop() {
                error!("[{}] stop on drop failed: {}", self.inner.label, err);
            }
        }
    }
}

/// Trigger type carried by the decision for `candidate`.
///
/// With passthrough enabled, timing candidates forward the low byte of their detector id
/// and every other candidate type lands in the high byte.
pub fn trigger_type_for(candidate: &TriggerCandidate, passthrough: bool) -> TriggerType {
    if !passthrough {
        return DEFAULT_TRIGGER_TYPE;
    }
    match candidate.candidate_type {
        CandidateType::Timing => candidate.detector_id & 0xff,
        other => (other.code() & 0xff) << 8,
    }
}

/// Decision requesting the candidate's window from every link.
pub fn create_decision(
    candidate: &TriggerCandidate,
    trigger_number: TriggerNumber,
    run_number: RunNumber,
    links: &[LinkId],
    passthrough: bool,
) -> TriggerDecision {
    TriggerDecision {
        trigger_number,
        run_number,
        trigger_timestamp: candidate.time_candidate,
        readout_type: ReadoutType::Localized,
        trigger_type: trigger_type_for(candidate, passthrough),
        components: links
            .iter()
            .map(|link_id| ComponentRequest {
                link_id: *link_id,
                window_begin: candidate.time_start,
                window_end: candidate.time_end,
            })
            .collect(),
    }
}

/// Resolved form of [`ModuleLevelTriggerConfig`].
struct DispatchSettings {
    links: Vec<LinkId>,
    decisions: Arc<dyn MessageSender<TriggerDecision>>,
    inhibits: Arc<dyn SignalSource<TriggerInhibit>>,
    passthrough: bool,
}

#[derive(Default)]
struct Control {
    lifecycle: LifecycleState,
    settings: Option<Arc<DispatchSettings>>,
    run: Option<RunBundle>,
}

struct RunBundle {
    handle: thread::JoinHandle<()>,
    inhibits: Arc<dyn SignalSource<TriggerInhibit>>,
}

enum LivetimeSlot {
    Idle,
    Active(Arc<LivetimeCounter>),
    Frozen(LivetimeSnapshot),
}

struct MltInner {
    label: String,
    hub: Arc<ConnectionHub>,
    candidates: Arc<dyn MessageReceiver<TriggerCandidate>>,
    /// Serializes run-control commands; never taken by the dispatch thread.
    control: Mutex<Control>,
    running: AtomicBool,
    paused: AtomicBool,
    downstream_busy: Arc<AtomicBool>,
    run_number: AtomicU32,
    last_trigger_number: AtomicU64,
    livetime: Mutex<LivetimeSlot>,
    metrics: MltMetrics,
    health: Mutex<EngineHealth>,
}

impl MltInner {
    fn new(
        label: String,
        hub: Arc<ConnectionHub>,
        candidates: Arc<dyn MessageReceiver<TriggerCandidate>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            label,
            hub,
            candidates,
            control: Mutex::new(Control::default()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(true),
            downstream_busy: Arc::new(AtomicBool::new(false)),
            run_number: AtomicU32::new(0),
            last_trigger_number: AtomicU64::new(0),
            livetime: Mutex::new(LivetimeSlot::Idle),
            metrics: MltMetrics::new(),
            health: Mutex::new(EngineHealth::new(HealthStatus::Stopped, None)),
        })
    }

    fn configure(&self, config: &ModuleLevelTriggerConfig) -> EngineResult<()> {
        let mut control = self.control.lock();
        let next = control.lifecycle.transition(Command::Configure)?;
        let links = config
            .links
            .iter()
            .map(|link| {
                link.system
                    .parse::<SystemType>()
                    .map(|system| LinkId::new(system, link.region, link.element))
                    .map_err(|err| EngineError::Configuration(err.to_string()))
            })
            .collect::<EngineResult<Vec<_>>>()?;
        let decisions = self
            .hub
            .sender::<TriggerDecision>(&config.dfo_connection)
            .map_err(connection_error)?;
        let inhibits = self
            .hub
            .signal::<TriggerInhibit>(&config.dfo_busy_connection)
            .map_err(connection_error)?;

        info!(
            "[{}] configured with {} links, decisions to {}, busy from {}, passthrough {}",
            self.label,
            links.len(),
            config.dfo_connection,
            config.dfo_busy_connection,
            config.hsi_trigger_type_passthrough
        );
        control.settings = Some(Arc::new(DispatchSettings {
            links,
            decisions,
            inhibits,
            passthrough: config.hsi_trigger_type_passthrough,
        }));
        control.lifecycle = next;
        Ok(())
    }

    fn start(this: &Arc<Self>, run_number: RunNumber) -> EngineResult<()> {
        let mut control = this.control.lock();
        let next = control.lifecycle.transition(Command::Start)?;
        let Some(settings) = control.settings.clone() else {
            return Err(EngineError::Configuration(
                "module has no configuration".to_string(),
            ));
        };
        this.set_health(HealthStatus::Starting, None);

        this.metrics.reset();
        this.last_trigger_number.store(0, Ordering::Release);
        this.run_number.store(run_number, Ordering::Release);
        this.paused.store(true, Ordering::Release);
        this.downstream_busy.store(false, Ordering::Release);
        let livetime = Arc::new(LivetimeCounter::new(LivetimeState::Paused));
        *this.livetime.lock() = LivetimeSlot::Active(Arc::clone(&livetime));

        let handler = InhibitHandler {
            label: this.label.clone(),
            run_number,
            downstream_busy: Arc::clone(&this.downstream_busy),
            livetime,
        };
        if let Err(err) = settings
            .inhibits
            .subscribe(Box::new(move |inhibit: TriggerInhibit| handler.handle(inhibit)))
        {
            this.abort_start(&err.to_string());
            return Err(connection_error(err));
        }

        this.running.store(true, Ordering::Release);
        let runner = Arc::clone(this);
        let dispatch_settings = Arc::clone(&settings);
        let handle = match thread::Builder::new()
            .name(DISPATCH_THREAD_NAME.to_string())
            .spawn(move || runner.run(dispatch_settings))
        {
            Ok(handle) => handle,
            Err(err) => {
                this.running.store(false, Ordering::Release);
                settings.inhibits.unsubscribe();
                this.abort_start(&err.to_string());
                return Err(EngineError::Failure {
                    source: Box::new(err),
                });
            }
        };

        control.run = Some(RunBundle {
            handle,
            inhibits: Arc::clone(&settings.inhibits),
        });
        control.lifecycle = next;
        info!(
            "[{}] run {} started with {} links, triggers paused",
            this.label,
            run_number,
            settings.links.len()
        );
        Ok(())
    }

    fn abort_start(&self, reason: &str) {
        *self.livetime.lock() = LivetimeSlot::Idle;
        self.set_health(HealthStatus::Failed, Some(reason.to_string()));
        error!("[{}] failed to start run: {}", self.label, reason);
    }

    fn stop(&self) -> EngineResult<()> {
        let mut control = self.control.lock();
        let next = control.lifecycle.transition(Command::Stop)?;
        let Some(run) = control.run.take() else {
            return Err(EngineError::NotRunning);
        };

        self.running.store(false, Ordering::Release);
        if let Err(err) = run.handle.join() {
            error!("[{}] dispatch thread join error: {:?}", self.label, err);
        }
        run.inhibits.unsubscribe();

        let final_livetime = {
            let mut slot = self.livetime.lock();
            let snapshot = match &*slot {
                LivetimeSlot::Active(counter) => counter.snapshot(),
                LivetimeSlot::Frozen(snapshot) => *snapshot,
                LivetimeSlot::Idle => LivetimeSnapshot::default(),
            };
            *slot = LivetimeSlot::Frozen(snapshot);
            snapshot
        };
        control.lifecycle = next;
        self.set_health(HealthStatus::Stopped, None);

        let summary = self.metrics.snapshot(None, None);
        info!(
            "[{}] run {} stopped: received {}, sent {}, paused {}, inhibited {}, send failures {}, total {}",
            self.label,
            self.run_number.load(Ordering::Acquire),
            summary.candidates_received,
            summary.decisions_sent,
            summary.decisions_paused,
            summary.decisions_inhibited,
            summary.send_failures,
            summary.decisions_total
        );
        info!(
            "[{}] livetime {:?}, paused {:?}, dead {:?}, deadtime {:?}",
            self.label,
            final_livetime.live,
            final_livetime.paused,
            final_livetime.dead,
            final_livetime.deadtime()
        );
        Ok(())
    }

    fn scrap(&self) -> EngineResult<()> {
        let mut control = self.control.lock();
        let next = control.lifecycle.transition(Command::Scrap)?;
        control.settings = None;
        control.lifecycle = next;
        info!("[{}] configuration scrapped", self.label);
        Ok(())
    }

    fn set_paused(&self, paused: bool) -> EngineResult<()> {
        let command = if paused {
            Command::DisableTriggers
        } else {
            Command::EnableTriggers
        };
        let mut control = self.control.lock();
        let next = control.lifecycle.transition(command)?;
        self.paused.store(paused, Ordering::Release);
        if let LivetimeSlot::Active(counter) = &*self.livetime.lock() {
            counter.set_state(if paused {
                LivetimeState::Paused
            } else {
                LivetimeState::Live
            });
        }
        control.lifecycle = next;
        if paused {
            info!("[{}] triggers paused", self.label);
        } else {
            info!("[{}] triggers resumed", self.label);
        }
        Ok(())
    }

    fn metrics_snapshot(&self) -> MltMetricsSnapshot {
        let (livetime, final_deadtime) = match &*self.livetime.lock() {
            LivetimeSlot::Idle => (None, None),
            LivetimeSlot::Active(counter) => (Some(counter.snapshot()), None),
            LivetimeSlot::Frozen(snapshot) => (Some(*snapshot), Some(snapshot.deadtime())),
        };
        self.metrics.snapshot(livetime, final_deadtime)
    }

    fn run(self: Arc<Self>, settings: Arc<DispatchSettings>) {
        self.set_health(HealthStatus::Ready, None);
        debug!("[{}] dispatch loop running", self.label);
        loop {
            match self.candidates.try_receive(RECEIVE_TIMEOUT) {
                Ok(candidate) => self.process(&settings, candidate),
                Err(ReceiveError::Timeout(_)) => {
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(ReceiveError::Disconnected(name)) => {
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                    self.set_health(
                        HealthStatus::Degraded,
                        Some(format!("candidate input {name} disconnected")),
                    );
                    thread::sleep(RECEIVE_TIMEOUT);
                }
            }
        }
        debug!("[{}] dispatch loop exiting", self.label);
    }

    fn process(&self, settings: &DispatchSettings, candidate: TriggerCandidate) {
        self.metrics.inc_received();
        if self.paused.load(Ordering::Acquire) {
            self.metrics.inc_paused();
        } else if self.downstream_busy.load(Ordering::Acquire) {
            self.metrics.inc_inhibited();
            warn!(
                "[{}] downstream busy, inhibiting candidate at {}",
                self.label, candidate.time_candidate
            );
        } else {
            self.dispatch(settings, &candidate);
        }
        self.metrics.inc_total();
    }

    fn dispatch(&self, settings: &DispatchSettings, candidate: &TriggerCandidate) {
        let trigger_number = self.last_trigger_number.load(Ordering::Acquire) + 1;
        let decision = create_decision(
            candidate,
            trigger_number,
            self.run_number.load(Ordering::Acquire),
            &settings.links,
            settings.passthrough,
        );
        let trigger_type = decision.trigger_type;
        match settings.decisions.send(decision, SEND_TIMEOUT) {
            Ok(()) => {
                self.last_trigger_number
                    .store(trigger_number, Ordering::Release);
                self.clear_degraded();
                self.metrics.inc_sent();
                debug!(
                    "[{}] sent trigger decision {} (type {}) for {}..{}",
                    self.label,
                    trigger_number,
                    trigger_type,
                    candidate.time_start,
                    candidate.time_end
                );
            }
            Err(err) => {
                self.metrics.inc_send_failures();
                warn!(
                    "[{}] dropping trigger decision for candidate at {}: {}",
                    self.label, candidate.time_candidate, err
                );
                self.set_health(HealthStatus::Degraded, Some(err.to_string()));
            }
        }
    }

    fn set_health(&self, status: HealthStatus, detail: Option<String>) {
        let mut guard = self.health.lock();
        guard.status = status;
        guard.detail = detail;
    }

    fn clear_degraded(&self) {
        let mut guard = self.health.lock();
        if guard.status == HealthStatus::Degraded {
            guard.status = HealthStatus::Ready;
            guard.detail = None;
        }
    }
}

/// Busy-signal handler for one run; runs on the signal's dispatcher thread.
struct InhibitHandler {
    label: String,
    run_number: RunNumber,
    downstream_busy: Arc<AtomicBool>,
    livetime: Arc<LivetimeCounter>,
}

impl InhibitHandler {
    fn handle(&self, inhibit: TriggerInhibit) {
        if inhibit.run_number != self.run_number {
            debug!(
                "[{}] ignoring busy message for run {} during run {}",
                self.label, inhibit.run_number, self.run_number
            );
            return;
        }
        debug!(
            "[{}] downstream busy = {} for run {}",
            self.label, inhibit.busy, inhibit.run_number
        );
        self.downstream_busy.store(inhibit.busy, Ordering::Release);
        self.livetime.set_state(LivetimeState::Dead);
    }
}

fn connection_error(err: trigger_io::IoError) -> EngineError {
    EngineError::Connection {
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(candidate_type: CandidateType, detector_id: u16) -> TriggerCandidate {
        TriggerCandidate {
            time_start: 1_000,
            time_end: 1_500,
            time_candidate: 1_200,
            detector_id,
            candidate_type,
            ..Default::default()
        }
    }

    #[test]
    fn default_trigger_type_without_passthrough() {
        let tc = candidate(CandidateType::Timing, 0x1234);
        assert_eq!(trigger_type_for(&tc, false), DEFAULT_TRIGGER_TYPE);
        let tc = candidate(CandidateType::Supernova, 0);
        assert_eq!(trigger_type_for(&tc, false), DEFAULT_TRIGGER_TYPE);
    }

    #[test]
    fn timing_candidates_forward_detector_low_byte() {
        let tc = candidate(CandidateType::Timing, 0x1234);
        assert_eq!(trigger_type_for(&tc, true), 0x34);
    }

    #[test]
    fn other_candidates_shift_type_into_high_byte() {
        let tc = candidate(CandidateType::Supernova, 0x1234);
        assert_eq!(trigger_type_for(&tc, true), 3 << 8);
        let tc = candidate(CandidateType::Ctb, 0);
        assert_eq!(trigger_type_for(&tc, true), 0x0800);
    }

    #[test]
    fn decision_requests_candidate_window_from_every_link() {
        let links = [
            LinkId::new(SystemType::Tpc, 0, 1),
            LinkId::new(SystemType::Pds, 1, 4),
        ];
        let tc = candidate(CandidateType::Timing, 2);
        let decision = create_decision(&tc, 5, 7, &links, true);
        assert_eq!(decision.trigger_number, 5);
        assert_eq!(decision.run_number, 7);
        assert_eq!(decision.trigger_timestamp, 1_200);
        assert_eq!(decision.readout_type, ReadoutType::Localized);
        assert_eq!(decision.trigger_type, 2);
        assert_eq!(decision.components.len(), 2);
        for (component, link) in decision.components.iter().zip(links) {
            assert_eq!(component.link_id, link);
            assert_eq!(component.window_begin, 1_000);
            assert_eq!(component.window_end, 1_500);
        }
    }

    #[test]
    fn decision_without_links_has_no_components() {
        let decision = create_decision(&candidate(CandidateType::Random, 0), 1, 1, &[], false);
        assert!(decision.components.is_empty());
    }

    #[test]
    fn inhibit_handler_ignores_other_runs() {
        let busy = Arc::new(AtomicBool::new(false));
        let livetime = Arc::new(LivetimeCounter::new(LivetimeState::Live));
        let handler = InhibitHandler {
            label: "mlt".to_string(),
            run_number: 7,
            downstream_busy: Arc::clone(&busy),
            livetime: Arc::clone(&livetime),
        };
        handler.handle(TriggerInhibit {
            run_number: 6,
            busy: true,
        });
        assert!(!busy.load(Ordering::Acquire));
        assert_eq!(livetime.state(), LivetimeState::Live);

        handler.handle(TriggerInhibit {
            run_number: 7,
            busy: true,
        });
        assert!(busy.load(Ordering::Acquire));
        assert_eq!(livetime.state(), LivetimeState::Dead);

        handler.handle(TriggerInhibit {
            run_number: 7,
            busy: false,
        });
        assert!(!busy.load(Ordering::Acquire));
        assert_eq!(livetime.state(), LivetimeState::Dead);
    }
}
