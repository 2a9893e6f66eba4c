use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use core_types::{ServiceMetricsReporter, TimeStampedData, TriggerDecision, render_samples};
use log::{debug, info, warn};
use trigger_io::{MessageReceiver, MessageSender, QueueReceiver, QueueSender, ReceiveError};

const POLL: Duration = Duration::from_millis(100);
/// Detector clock ticks per second.
const CLOCK_HZ: u128 = 62_500_000;

/// Background thread that runs until [`shutdown`](Self::shutdown) or drop.
pub struct Worker {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(&stop_clone))?;
        Ok(Self {
            name: name.to_string(),
            stop,
            handle: Some(handle),
        })
    }

    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("[{}] worker panicked", self.name);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join();
    }
}

/// Emits one timing signal of `signal_type` every `interval`.
pub fn spawn_pulser(
    output: QueueSender<TimeStampedData>,
    signal_type: u32,
    interval: Duration,
) -> io::Result<Worker> {
    Worker::spawn("pulser", move |stop| {
        let mut counter = 0u32;
        info!(
            "[pulser] emitting signal type {} every {:?}",
            signal_type, interval
        );
        while !stop.load(Ordering::Relaxed) {
            let data = TimeStampedData {
                time_stamp: clock_ticks(),
                signal_type,
                counter,
            };
            counter = counter.wrapping_add(1);
            if let Err(err) = output.send(data, POLL) {
                warn!("[pulser] {}", err);
            }
            sleep_with_stop(stop, interval);
        }
    })
}

/// Stands in for the data-flow orchestrator: logs and counts every decision it receives.
pub fn spawn_decision_consumer(input: QueueReceiver<TriggerDecision>) -> io::Result<Worker> {
    Worker::spawn("decision-sink", move |stop| {
        let mut consumed = 0u64;
        loop {
            match input.try_receive(POLL) {
                Ok(decision) => {
                    consumed += 1;
                    info!(
                        "[decision-sink] trigger {} run {} type {:#06x} at {} ({} components)",
                        decision.trigger_number,
                        decision.run_number,
                        decision.trigger_type,
                        decision.trigger_timestamp,
                        decision.components.len()
                    );
                }
                Err(ReceiveError::Timeout(_)) => {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                }
                Err(ReceiveError::Disconnected(_)) => break,
            }
        }
        debug!("[decision-sink] consumed {} decisions", consumed);
    })
}

pub fn spawn_status_logger(
    reporters: Vec<Arc<dyn ServiceMetricsReporter>>,
    interval: Duration,
) -> io::Result<Worker> {
    Worker::spawn("status", move |stop| {
        loop {
            sleep_with_stop(stop, interval);
            if stop.load(Ordering::Relaxed) {
                break;
            }
            for reporter in &reporters {
                let samples = reporter.collect_metrics();
                info!(
                    "[status]\n{}",
                    render_samples(reporter.service_name(), &samples).trim_end()
                );
            }
        }
    })
}

fn clock_ticks() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_epoch.as_nanos() * CLOCK_HZ / 1_000_000_000) as u64
}

fn sleep_with_stop(stop: &AtomicBool, interval: Duration) {
    let mut remaining = interval;
    const STEP: Duration = Duration::from_millis(100);
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let sleep_for = remaining.min(STEP);
        thread::sleep(sleep_for);
        remaining = remaining.saturating_sub(sleep_for);
    }
}
