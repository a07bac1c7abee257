//! Periodic polling of the controller's active error list

use eta_client::{ClientError, EtaClient};
use eta_core::{ActiveError, ErrorEvent, ErrorSummary, ErrorTracker};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_ERROR_POLL_INTERVAL: Duration = Duration::from_secs(120);

/// Feeds the error tracker and broadcasts its transitions
pub struct ErrorMonitor {
    client: EtaClient,
    tracker: Mutex<ErrorTracker>,
    /// Held from request to publish so overlapping polls apply in issue order
    poll_guard: Mutex<()>,
    poll_interval: Duration,
    event_tx: broadcast::Sender<ErrorEvent>,
}

impl ErrorMonitor {
    pub fn new(client: EtaClient, poll_interval: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            client,
            tracker: Mutex::new(ErrorTracker::new()),
            poll_guard: Mutex::new(()),
            poll_interval,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ErrorEvent> {
        self.event_tx.subscribe()
    }

    /// Fetch the error list once and emit detected/cleared events
    pub async fn poll_once(&self) -> Result<Vec<ErrorEvent>, ClientError> {
        let _guard = self.poll_guard.lock().await;
        let errors = self.client.fetch_errors().await?;
        let events = self.tracker.lock().await.update(errors);
        self.publish(&events);
        Ok(events)
    }

    /// Emit "detected" for every active error again
    pub async fn resend_all(&self) -> Vec<ErrorEvent> {
        let events = self.tracker.lock().await.resend_all();
        info!(count = events.len(), "Resending active errors");
        self.publish(&events);
        events
    }

    pub async fn active(&self) -> Vec<ActiveError> {
        self.tracker.lock().await.active().to_vec()
    }

    pub async fn summary(&self) -> ErrorSummary {
        self.tracker.lock().await.summary()
    }

    fn publish(&self, events: &[ErrorEvent]) {
        for event in events {
            debug!(event = event.name(), msg = %event.error().message, "Publishing error event");
            let _ = self.event_tx.send(event.clone());
        }
    }

    /// Poll forever; failed polls keep the previous error set
    pub async fn run(&self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.poll_interval.as_secs(), "Error monitor started");

        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "Error poll failed");
            }
        }
    }
}
