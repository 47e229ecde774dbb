//! Idle-session reclamation.
//!
//! A session with no local interest and no active confirmed peer is
//! GC-eligible. Eligible sessions sit in the scheduler's set; every tick bumps
//! their idle counter and sessions that reach the threshold are torn down by
//! the swarm. The periodic timer only runs while the set is non-empty.

use crate::capability::TopicId;
use crate::session::WakeupSession;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

/// Periodic timer driving [`crate::WakeupSwarm::gc_tick`].
///
/// `start` is called when the first session becomes eligible, `stop` when the
/// last one leaves. The timer must call `gc_tick` once per period until
/// stopped and never run two ticks at once.
pub trait GcTimer: Send {
    fn start(&mut self, period: Duration);
    fn stop(&mut self);
}

/// Manual timer: the owner calls `gc_tick` itself.
impl GcTimer for () {
    fn start(&mut self, _period: Duration) {}
    fn stop(&mut self) {}
}

pub(crate) struct GcScheduler {
    eligible: HashSet<TopicId>,
    interval: Duration,
    threshold: u32,
    timer: Box<dyn GcTimer>,
    running: bool,
}

impl GcScheduler {
    pub(crate) fn new(interval: Duration, threshold: u32, timer: Box<dyn GcTimer>) -> Self {
        Self {
            eligible: HashSet::new(),
            interval,
            threshold,
            timer,
            running: false,
        }
    }

    pub(crate) fn set_timer(&mut self, timer: Box<dyn GcTimer>) {
        if self.running {
            self.timer.stop();
        }
        self.timer = timer;
        if self.running {
            self.timer.start(self.interval);
        }
    }

    pub(crate) fn add(&mut self, id: TopicId) {
        self.eligible.insert(id);
        if !self.running {
            debug!("Starting GC timer ({:?})", self.interval);
            self.running = true;
            self.timer.start(self.interval);
        }
    }

    pub(crate) fn remove(&mut self, id: &TopicId) {
        self.eligible.remove(id);
        if self.eligible.is_empty() && self.running {
            debug!("Stopping GC timer");
            self.running = false;
            self.timer.stop();
        }
    }

    pub(crate) fn contains(&self, id: &TopicId) -> bool {
        self.eligible.contains(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.eligible.len()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    /// Advance every eligible session by one idle tick.
    ///
    /// Returns the sessions that reached the threshold, for teardown.
    pub(crate) fn tick(&mut self, sessions: &mut HashMap<TopicId, WakeupSession>) -> Vec<TopicId> {
        let mut expired = Vec::new();
        for id in &self.eligible {
            if let Some(session) = sessions.get_mut(id) {
                session.idle_ticks += 1;
                if session.idle_ticks >= self.threshold {
                    expired.push(*id);
                }
            }
        }
        expired.sort();
        expired
    }

    /// Stop the timer for good (swarm shutdown).
    pub(crate) fn shutdown(&mut self) {
        if self.running {
            self.running = false;
            self.timer.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::KEY_LEN;
    use std::sync::{Arc, Mutex};

    /// Records start/stop calls.
    #[derive(Clone, Default)]
    struct RecordingTimer(Arc<Mutex<Vec<&'static str>>>);

    impl GcTimer for RecordingTimer {
        fn start(&mut self, _period: Duration) {
            self.0.lock().unwrap().push("start");
        }
        fn stop(&mut self) {
            self.0.lock().unwrap().push("stop");
        }
    }

    fn id(byte: u8) -> TopicId {
        TopicId::from_bytes([byte; KEY_LEN])
    }

    fn scheduler(timer: &RecordingTimer) -> GcScheduler {
        GcScheduler::new(Duration::from_secs(2), 5, Box::new(timer.clone()))
    }

    #[test]
    fn test_timer_follows_set_emptiness() {
        let timer = RecordingTimer::default();
        let mut gc = scheduler(&timer);

        gc.add(id(1));
        gc.add(id(2));
        assert!(gc.is_running());
        gc.remove(&id(1));
        assert!(gc.is_running());
        gc.remove(&id(2));
        assert!(!gc.is_running());

        assert_eq!(*timer.0.lock().unwrap(), vec!["start", "stop"]);
    }

    #[test]
    fn test_remove_unknown_does_not_stop_twice() {
        let timer = RecordingTimer::default();
        let mut gc = scheduler(&timer);

        gc.remove(&id(1));
        gc.add(id(1));
        gc.remove(&id(1));
        gc.remove(&id(1));

        assert_eq!(*timer.0.lock().unwrap(), vec!["start", "stop"]);
    }

    #[test]
    fn test_shutdown_stops_once() {
        let timer = RecordingTimer::default();
        let mut gc = scheduler(&timer);

        gc.add(id(1));
        gc.shutdown();
        gc.shutdown();
        gc.remove(&id(1));

        assert_eq!(*timer.0.lock().unwrap(), vec!["start", "stop"]);
    }

    #[test]
    fn test_swapping_timer_while_running_restarts_it() {
        let first = RecordingTimer::default();
        let second = RecordingTimer::default();
        let mut gc = scheduler(&first);

        gc.add(id(1));
        gc.set_timer(Box::new(second.clone()));

        assert_eq!(*first.0.lock().unwrap(), vec!["start", "stop"]);
        assert_eq!(*second.0.lock().unwrap(), vec!["start"]);
    }
}
