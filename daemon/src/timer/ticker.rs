use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

type TickSink = Arc<dyn Fn(u64) -> bool + Send + Sync>;

/// Drives one countdown at a time by posting its generation once per period.
///
/// The ticker never touches timer state; the sink forwards the generation to
/// whoever owns the state machine. Syncing to a different generation aborts
/// the previous task before spawning the next, so two countdowns never
/// overlap.
pub struct CountdownTicker {
    period: Duration,
    sink: TickSink,
    current: Option<(u64, JoinHandle<()>)>,
}

impl CountdownTicker {
    /// `sink` returns false once nobody is listening, which ends the task.
    pub fn new<F>(period: Duration, sink: F) -> Self
    where
        F: Fn(u64) -> bool + Send + Sync + 'static,
    {
        Self {
            period,
            sink: Arc::new(sink),
            current: None,
        }
    }

    /// Make the running task match `active`, the generation of the countdown
    /// that should be ticking (or `None` for no countdown).
    pub fn sync(&mut self, active: Option<u64>) {
        let running = self.current.as_ref().map(|(generation, _)| *generation);
        if running == active {
            return;
        }
        self.cancel();
        if let Some(generation) = active {
            debug!(generation, "Spawning countdown ticker");
            let sink = Arc::clone(&self.sink);
            let period = self.period;
            let handle = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(period).await;
                    if !sink(generation) {
                        break;
                    }
                }
            });
            self.current = Some((generation, handle));
        }
    }

    pub fn cancel(&mut self) {
        if let Some((generation, handle)) = self.current.take() {
            handle.abort();
            debug!(generation, "Countdown ticker cancelled");
        }
    }

    pub fn active_generation(&self) -> Option<u64> {
        self.current.as_ref().map(|(generation, _)| *generation)
    }
}

impl Drop for CountdownTicker {
    fn drop(&mut self) {
        self.cancel();
    }
}
