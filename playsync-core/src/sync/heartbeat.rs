//! Host heartbeat scheduler
//!
//! Runs a single periodic task that reports the host's position. Ticks that
//! are missed (slow runtime, suspended process) are skipped, never bursted.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Owns at most one running heartbeat task
#[derive(Debug, Default)]
pub struct HeartbeatScheduler {
    /// Handle for cancelling the running loop
    cancel: Option<oneshot::Sender<()>>,
}

impl HeartbeatScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `period`. Any previous loop is cancelled first.
    /// The first tick fires one period after start.
    pub fn start<F>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        // Stop any existing loop first
        self.stop();

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.cancel = Some(cancel_tx);

        tokio::spawn(async move {
            info!("Heartbeat loop started ({}ms)", period.as_millis());

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => {
                        debug!("Heartbeat loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => tick(),
                }
            }

            info!("Heartbeat loop ended");
        });
    }

    /// Stop the heartbeat loop if one is running
    pub fn stop(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period() {
        let mut scheduler = HeartbeatScheduler::new();
        let (count, tick) = counter();
        scheduler.start(Duration::from_millis(1000), tick);
        assert!(scheduler.is_running());

        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        for expected in 1..=3 {
            tokio::time::advance(Duration::from_millis(1000)).await;
            settle().await;
            assert_eq!(count.load(Ordering::SeqCst), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_leaves_one_timer() {
        let mut scheduler = HeartbeatScheduler::new();
        let (first, tick) = counter();
        scheduler.start(Duration::from_millis(1000), tick);
        let (second, tick) = counter();
        scheduler.start(Duration::from_millis(1000), tick);
        settle().await;

        tokio::time::advance(Duration::from_millis(3000)).await;
        settle().await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert!(second.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_ticks() {
        let mut scheduler = HeartbeatScheduler::new();
        let (count, tick) = counter();
        scheduler.start(Duration::from_millis(1000), tick);
        settle().await;

        tokio::time::advance(Duration::from_millis(1000)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        scheduler.stop();
        assert!(!scheduler.is_running());
        settle().await;

        tokio::time::advance(Duration::from_millis(5000)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_catch_up_burst() {
        let mut scheduler = HeartbeatScheduler::new();
        let (count, tick) = counter();
        scheduler.start(Duration::from_millis(1000), tick);
        settle().await;

        // One big jump covering several periods yields a single tick
        tokio::time::advance(Duration::from_millis(4500)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
