use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LivetimeState {
    Live,
    Paused,
    Dead,
}

impl LivetimeState {
    pub const ALL: [LivetimeState; 3] = [
        LivetimeState::Live,
        LivetimeState::Paused,
        LivetimeState::Dead,
    ];

    fn index(self) -> usize {
        match self {
            LivetimeState::Live => 0,
            LivetimeState::Paused => 1,
            LivetimeState::Dead => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LivetimeState::Live => "live",
            LivetimeState::Paused => "paused",
            LivetimeState::Dead => "dead",
        }
    }
}

/// Accumulated time per state, all read at the same instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LivetimeSnapshot {
    pub live: Duration,
    pub paused: Duration,
    pub dead: Duration,
    /// Time since the counter was created; equals `live + paused + dead`.
    pub elapsed: Duration,
}

impl LivetimeSnapshot {
    pub fn get(&self, state: LivetimeState) -> Duration {
        match state {
            LivetimeState::Live => self.live,
            LivetimeState::Paused => self.paused,
            LivetimeState::Dead => self.dead,
        }
    }

    /// Time during which decisions could not be issued.
    pub fn deadtime(&self) -> Duration {
        self.dead + self.paused
    }
}

/// Tracks cumulative wall-clock time spent Live, Paused and Dead.
///
/// Transitions and reads take a short internal lock, so the counter can be driven from the
/// inhibit handler and run-control commands while monitoring reads it from elsewhere.
pub struct LivetimeCounter {
    inner: Mutex<CounterInner>,
}

struct CounterInner {
    state: LivetimeState,
    created: Instant,
    last_change: Instant,
    accumulated: [Duration; 3],
}

impl CounterInner {
    fn flush(&mut self, now: Instant) {
        let now = now.max(self.last_change);
        self.accumulated[self.state.index()] += now - self.last_change;
        self.last_change = now;
    }

    fn time_in(&self, state: LivetimeState, now: Instant) -> Duration {
        let mut total = self.accumulated[state.index()];
        if state == self.state {
            total += now.saturating_duration_since(self.last_change);
        }
        total
    }
}

impl LivetimeCounter {
    pub fn new(state: LivetimeState) -> Self {
        Self::new_at(state, Instant::now())
    }

    pub(crate) fn new_at(state: LivetimeState, now: Instant) -> Self {
        Self {
            inner: Mutex::new(CounterInner {
                state,
                created: now,
                last_change: now,
                accumulated: [Duration::ZERO; 3],
            }),
        }
    }

    pub fn state(&self) -> LivetimeState {
        self.inner.lock().state
    }

    /// Closes the interval spent in the current state and switches to `state`. Setting the
    /// current state again only flushes the open interval.
    pub fn set_state(&self, state: LivetimeState) {
        self.set_state_at(state, Instant::now());
    }

    pub(crate) fn set_state_at(&self, state: LivetimeState, now: Instant) {
        let mut inner = self.inner.lock();
        inner.flush(now);
        inner.state = state;
    }

    /// Time spent in `state` so far, including the open interval if it is current.
    pub fn get_time(&self, state: LivetimeState) -> Duration {
        self.inner.lock().time_in(state, Instant::now())
    }

    pub fn snapshot(&self) -> LivetimeSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub(crate) fn snapshot_at(&self, now: Instant) -> LivetimeSnapshot {
        let inner = self.inner.lock();
        let now = now.max(inner.last_change);
        LivetimeSnapshot {
            live: inner.time_in(LivetimeState::Live, now),
            paused: inner.time_in(LivetimeState::Paused, now),
            dead: inner.time_in(LivetimeState::Dead, now),
            elapsed: now - inner.created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn accumulates_time_per_state() {
        let t0 = Instant::now();
        let counter = LivetimeCounter::new_at(LivetimeState::Paused, t0);
        counter.set_state_at(LivetimeState::Live, t0 + 10 * MS);
        counter.set_state_at(LivetimeState::Dead, t0 + 25 * MS);
        counter.set_state_at(LivetimeState::Live, t0 + 30 * MS);

        let snapshot = counter.snapshot_at(t0 + 40 * MS);
        assert_eq!(snapshot.paused, 10 * MS);
        assert_eq!(snapshot.live, 25 * MS);
        assert_eq!(snapshot.dead, 5 * MS);
        assert_eq!(snapshot.elapsed, 40 * MS);
        assert_eq!(snapshot.deadtime(), 15 * MS);
    }

    #[test]
    fn same_state_transition_does_not_double_count() {
        let t0 = Instant::now();
        let counter = LivetimeCounter::new_at(LivetimeState::Live, t0);
        counter.set_state_at(LivetimeState::Live, t0 + 10 * MS);
        counter.set_state_at(LivetimeState::Live, t0 + 20 * MS);
        let snapshot = counter.snapshot_at(t0 + 20 * MS);
        assert_eq!(snapshot.live, 20 * MS);
        assert_eq!(snapshot.paused + snapshot.dead, Duration::ZERO);
    }

    #[test]
    fn open_interval_counts_only_for_current_state() {
        let t0 = Instant::now();
        let counter = LivetimeCounter::new_at(LivetimeState::Paused, t0);
        counter.set_state_at(LivetimeState::Dead, t0 + 5 * MS);
        let snapshot = counter.snapshot_at(t0 + 50 * MS);
        assert_eq!(snapshot.paused, 5 * MS);
        assert_eq!(snapshot.dead, 45 * MS);
        assert_eq!(snapshot.live, Duration::ZERO);
        assert_eq!(snapshot.get(LivetimeState::Dead), 45 * MS);
    }

    #[test]
    fn sum_of_states_equals_elapsed_under_concurrency() {
        let counter = Arc::new(LivetimeCounter::new(LivetimeState::Paused));
        let writer = {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for i in 0..2_000 {
                    counter.set_state(LivetimeState::ALL[i % 3]);
                }
            })
        };
        for _ in 0..500 {
            let snapshot = counter.snapshot();
            assert_eq!(
                snapshot.live + snapshot.paused + snapshot.dead,
                snapshot.elapsed
            );
        }
        writer.join().unwrap();
        let snapshot = counter.snapshot();
        assert_eq!(snapshot.live + snapshot.paused + snapshot.dead, snapshot.elapsed);
    }

    #[test]
    fn get_time_includes_running_interval() {
        let counter = LivetimeCounter::new(LivetimeState::Live);
        thread::sleep(5 * MS);
        assert!(counter.get_time(LivetimeState::Live) >= 5 * MS);
        assert_eq!(counter.get_time(LivetimeState::Dead), Duration::ZERO);
        assert_eq!(counter.state(), LivetimeState::Live);
    }
}
