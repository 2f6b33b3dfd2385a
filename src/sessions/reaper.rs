use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use crate::sessions::broker::SessionBroker;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub remaining_active: usize,
    pub elapsed: Duration,
}

struct Running {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background task that periodically removes expired sessions.
///
/// The reaper holds a clone of the broker; it does not own the table.
pub struct SessionReaper {
    broker: SessionBroker,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl SessionReaper {
    /// Creates a stopped reaper. A zero interval falls back to one hour.
    pub fn new(broker: SessionBroker, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            crate::config::DEFAULT_SWEEP_INTERVAL
        } else {
            interval
        };

        Self {
            broker,
            interval,
            running: Mutex::new(None),
        }
    }

    /// Spawns the sweep loop. Does nothing if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run(self.broker.clone(), self.interval, shutdown.clone()));
        *running = Some(Running { shutdown, handle });

        tracing::info!("✅ Session reaper started (interval: {:?})", self.interval);
    }

    /// Signals the loop to stop and waits for it to exit.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();

        if let Some(Running { shutdown, handle }) = running {
            shutdown.cancel();
            if let Err(e) = handle.await {
                tracing::error!("❌ Session reaper task ended abnormally: {}", e);
            }
            tracing::info!("🛑 Session reaper stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Runs one sweep right away, independent of the schedule.
    pub async fn sweep_now(&self) -> SweepReport {
        sweep(&self.broker).await
    }
}

async fn sweep(broker: &SessionBroker) -> SweepReport {
    let started = Instant::now();
    let removed = broker.sweep().await;
    let remaining_active = broker.stats().await.active;

    SweepReport {
        removed,
        remaining_active,
        elapsed: started.elapsed(),
    }
}

async fn run(broker: SessionBroker, period: Duration, shutdown: CancellationToken) {
    // First sweep happens one full period after start.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = sweep(&broker).await;
                if report.removed > 0 {
                    tracing::info!(
                        "🧹 Removed {} expired session(s) in {:?}",
                        report.removed,
                        report.elapsed
                    );
                }
                if report.remaining_active > 0 {
                    tracing::debug!("📊 {} active session(s)", report.remaining_active);
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

impl Drop for SessionReaper {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            running.shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::sessions::clock::ManualClock;

    fn broker() -> (SessionBroker, ManualClock) {
        let clock = ManualClock::default();
        let broker = SessionBroker::with_clock(Duration::from_secs(60), Arc::new(clock.clone()));
        (broker, clock)
    }

    #[tokio::test]
    async fn sweep_now_reports_removed_and_remaining() {
        let (broker, clock) = broker();
        broker.create("user-1", "old").await.unwrap();
        clock.advance(chrono::Duration::seconds(61));
        broker.create("user-2", "new").await.unwrap();

        let reaper = SessionReaper::new(broker.clone(), Duration::from_secs(3600));
        let report = reaper.sweep_now().await;
        assert_eq!(report.removed, 1);
        assert_eq!(report.remaining_active, 1);
        assert_eq!(broker.count().await, 1);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_allows_restart() {
        let (broker, _) = broker();
        let reaper = SessionReaper::new(broker, Duration::from_secs(3600));

        assert!(!reaper.is_running());
        reaper.start();
        reaper.start();
        assert!(reaper.is_running());

        reaper.stop().await;
        assert!(!reaper.is_running());

        reaper.start();
        assert!(reaper.is_running());
        reaper.stop().await;
        reaper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn loop_sweeps_on_each_tick() {
        let (broker, clock) = broker();
        broker.create("user-1", "secret").await.unwrap();
        clock.advance(chrono::Duration::seconds(120));

        let reaper = SessionReaper::new(broker.clone(), Duration::from_secs(10));
        reaper.start();

        assert_eq!(broker.count().await, 1);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(broker.count().await, 0);

        reaper.stop().await;
    }
}
