//! Repeating timers with explicit cancellation handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Callback run on every tick. Each call returns the future to await before
/// the next tick is considered.
pub type Tick = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Opaque handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl std::fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Clock/timer capability used by the task controller.
pub trait Scheduler: Send + Sync {
    /// Run `tick` every `period`, first after one full period.
    fn schedule_repeating(&self, period: Duration, tick: Tick) -> TimerHandle;

    /// Stop a timer. Returns false if it was already cancelled.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Number of timers currently alive.
    fn live_timers(&self) -> usize;
}

/// `Scheduler` backed by tokio tasks and `tokio::time::interval`.
pub struct TokioScheduler {
    next_id: AtomicU64,
    timers: Mutex<HashMap<TimerHandle, JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            timers: Mutex::new(HashMap::new()),
        })
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<TimerHandle, JoinHandle<()>>> {
        // Nothing panics while holding the lock, poisoning carries no meaning.
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, period: Duration, tick: Tick) -> TimerHandle {
        let period = period.max(Duration::from_millis(1));
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));

        // Hold the map while spawning so a tick that cancels its own timer
        // always finds the entry.
        let mut timers = self.timers();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tick().await;
            }
        });
        timers.insert(handle, join);

        tracing::trace!(timer = %handle, ?period, "Timer scheduled");
        handle
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        match self.timers().remove(&handle) {
            Some(join) => {
                join.abort();
                tracing::trace!(timer = %handle, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    fn live_timers(&self) -> usize {
        let mut timers = self.timers();
        timers.retain(|_, join| !join.is_finished());
        timers.len()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, join) in self.timers().drain() {
            join.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use futures::FutureExt;

    fn counting_tick(counter: &Arc<AtomicUsize>) -> Tick {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_after_each_period() {
        let scheduler = TokioScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.schedule_repeating(Duration::from_secs(2), counting_tick(&count));

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(4200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.live_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_ticks() {
        let scheduler = TokioScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.schedule_repeating(Duration::from_secs(1), counting_tick(&count));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));
        assert_eq!(scheduler.live_timers(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_can_cancel_its_own_timer() {
        let scheduler = TokioScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));

        let tick: Tick = {
            let scheduler = Arc::clone(&scheduler);
            let count = Arc::clone(&count);
            let slot = Arc::clone(&slot);
            Arc::new(move || {
                let scheduler = Arc::clone(&scheduler);
                let count = Arc::clone(&count);
                let slot = Arc::clone(&slot);
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) == 1 {
                        let handle = *slot.lock().unwrap();
                        if let Some(handle) = handle {
                            scheduler.cancel(handle);
                        }
                    }
                }
                .boxed()
            })
        };
        let handle = scheduler.schedule_repeating(Duration::from_millis(500), tick);
        *slot.lock().unwrap() = Some(handle);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.live_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn handles_are_distinct() {
        let scheduler = TokioScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let a = scheduler.schedule_repeating(Duration::from_secs(1), counting_tick(&count));
        let b = scheduler.schedule_repeating(Duration::from_secs(1), counting_tick(&count));
        assert_ne!(a, b);
        assert_eq!(scheduler.live_timers(), 2);

        scheduler.cancel(a);
        assert_eq!(scheduler.live_timers(), 1);
    }
}
