//! Tokio runtime for a wakeup swarm.
//!
//! The swarm lives behind one async mutex so every mutating entry point is
//! serialized. A single background task per swarm drives GC ticks:
//! - the swarm's [`GcTimer`] publishes the requested period on a watch channel
//! - the task runs an interval only while a period is set
//! - each tick calls `gc_tick()` under the lock, so ticks never overlap
//!
//! The task exits once the swarm is dropped.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use wakeup_core::{GcTimer, MemoryTransport, StreamId, Transport, WakeupSwarm};

/// A swarm shared between tasks.
pub type SharedSwarm<T> = Arc<Mutex<WakeupSwarm<T>>>;

/// GC timer that hands start/stop requests to the driver task.
pub struct WatchTimer {
    tx: watch::Sender<Option<Duration>>,
}

impl WatchTimer {
    pub fn new() -> (Self, watch::Receiver<Option<Duration>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl GcTimer for WatchTimer {
    fn start(&mut self, period: Duration) {
        self.tx.send_replace(Some(period));
    }

    fn stop(&mut self) {
        self.tx.send_replace(None);
    }
}

/// Share a swarm and start its GC driver.
pub fn spawn<T>(swarm: WakeupSwarm<T>) -> (SharedSwarm<T>, JoinHandle<()>)
where
    T: Transport + Send + 'static,
{
    let (timer, rx) = WatchTimer::new();
    let swarm = Arc::new(Mutex::new(swarm.with_timer(timer)));
    let handle = tokio::spawn(gc_driver(Arc::downgrade(&swarm), rx));
    (swarm, handle)
}

async fn gc_driver<T>(swarm: Weak<Mutex<WakeupSwarm<T>>>, mut rx: watch::Receiver<Option<Duration>>)
where
    T: Transport + Send + 'static,
{
    loop {
        let period = *rx.borrow_and_update();
        let Some(period) = period else {
            if rx.changed().await.is_err() {
                break;
            }
            continue;
        };

        debug!("GC driver ticking every {:?}", period);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    let Some(strong) = swarm.upgrade() else {
                        return;
                    };
                    let reclaimed = strong.lock().await.gc_tick();
                    if reclaimed > 0 {
                        info!("GC reclaimed {} idle session(s)", reclaimed);
                    }
                }
            }
        }
    }
    debug!("GC driver exiting");
}

/// Pump in-memory nodes until none has a queued event.
///
/// Returns the total number of events handled.
pub async fn pump_until_idle(nodes: &[SharedSwarm<MemoryTransport>]) -> usize {
    let mut total = 0;
    loop {
        let mut handled = 0;
        for node in nodes {
            handled += node.lock().await.pump();
        }
        if handled == 0 {
            return total;
        }
        total += handled;
    }
}

/// Connect two in-memory nodes and register the streams on both.
pub async fn connect(
    a: &SharedSwarm<MemoryTransport>,
    b: &SharedSwarm<MemoryTransport>,
) -> (StreamId, StreamId) {
    let mut a = a.lock().await;
    let mut b = b.lock().await;
    let (sa, sb) = MemoryTransport::connect(a.transport_mut(), b.transport_mut());
    a.add_stream(sa);
    b.add_stream(sb);
    (sa, sb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watch_timer_publishes_period() {
        let (mut timer, mut rx) = WatchTimer::new();
        assert_eq!(*rx.borrow(), None);

        timer.start(Duration::from_millis(250));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(Duration::from_millis(250)));

        timer.stop();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), None);
    }

    #[tokio::test]
    async fn test_dropping_timer_ends_receiver() {
        let (timer, mut rx) = WatchTimer::new();
        drop(timer);
        assert!(rx.changed().await.is_err());
    }
}
