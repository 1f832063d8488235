// Timer Port - drives the periodic admission pass

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// A repeating timer owned by one scheduler
#[async_trait]
pub trait IntervalTimer: Send {
    /// Wait for the next tick. Must be cancel-safe: the scheduler polls it inside `select!`.
    async fn tick(&mut self);
}

/// Creates a timer each time a scheduler starts
pub trait TimerFactory: Send + Sync {
    fn start(&self, period: Duration) -> Box<dyn IntervalTimer>;
}

/// tokio::time based timers (production)
pub struct TokioTimerFactory;

impl TimerFactory for TokioTimerFactory {
    fn start(&self, period: Duration) -> Box<dyn IntervalTimer> {
        // First tick one full period after start, like a plain repeating timer
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Box::new(TokioIntervalTimer { interval })
    }
}

struct TokioIntervalTimer {
    interval: Interval,
}

#[async_trait]
impl IntervalTimer for TokioIntervalTimer {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    /// Timers that tick only when the test calls `fire`
    pub struct ManualTimerFactory {
        ticks: watch::Sender<u64>,
        started: AtomicUsize,
    }

    impl ManualTimerFactory {
        pub fn new() -> Self {
            let (ticks, _) = watch::channel(0);
            Self {
                ticks,
                started: AtomicUsize::new(0),
            }
        }

        /// Tick every live timer once
        pub fn fire(&self) {
            self.ticks.send_modify(|n| *n += 1);
        }

        /// Number of timers created so far (one per scheduler lifetime)
        pub fn timers_started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }
    }

    impl Default for ManualTimerFactory {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TimerFactory for ManualTimerFactory {
        fn start(&self, _period: Duration) -> Box<dyn IntervalTimer> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Box::new(ManualTimer {
                ticks: self.ticks.subscribe(),
            })
        }
    }

    struct ManualTimer {
        ticks: watch::Receiver<u64>,
    }

    #[async_trait]
    impl IntervalTimer for ManualTimer {
        async fn tick(&mut self) {
            if self.ticks.changed().await.is_err() {
                // Factory dropped: never tick again
                std::future::pending::<()>().await;
            }
        }
    }
}
