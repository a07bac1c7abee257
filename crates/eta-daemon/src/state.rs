//! Application state management

use anyhow::Result;
use chrono::{DateTime, Utc};
use eta_client::{ClientError, EtaClient, FixtureTransport};
use eta_core::{
    reconcile, AssignmentSet, DomainError, ErrorEvent, ErrorSummary, RecordedResponses,
    RenameConflict, SensorAssignment, SensorId, SensorValue, Tombstone, WriteValue,
};
use eta_discovery::{
    DiscoveryEvent, DiscoveryScanner, EndpointFailure, ErrorMonitor, RefreshMode, ScanError,
    ScanStats,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::store::{AssignmentStore, StoreError};

/// Events forwarded to WebSocket clients
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    Discovery(DiscoveryEvent),
    Error(ErrorEvent),
    AssignmentsChanged(ScanSummary),
}

/// What the last scan did
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub mode: RefreshMode,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Active assignments after the scan
    pub sensors: usize,
    /// Values read by the scan
    pub values: usize,
    pub added: Vec<SensorId>,
    pub orphaned: Vec<SensorId>,
    pub renamed: Vec<RenameConflict>,
    pub updated: Vec<SensorId>,
    pub failures: Vec<EndpointFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ScanStats>,
}

impl ScanSummary {
    fn changed(&self) -> bool {
        !(self.added.is_empty()
            && self.orphaned.is_empty()
            && self.renamed.is_empty()
            && self.updated.is_empty())
    }
}

/// A sensor together with its current value
#[derive(Debug, Clone, Serialize)]
pub struct SensorView {
    #[serde(flatten)]
    pub assignment: SensorAssignment,
    pub value: Option<SensorValue>,
    pub display_unit: Option<String>,
    pub writable: bool,
    pub verified: bool,
}

impl SensorView {
    fn new(assignment: &SensorAssignment, value: Option<SensorValue>) -> Self {
        Self {
            value,
            display_unit: assignment.display_unit().map(str::to_string),
            writable: assignment.is_writable(),
            verified: assignment.is_verified(),
            assignment: assignment.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanView {
    pub id: SensorId,
    #[serde(flatten)]
    pub tombstone: Tombstone,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub host: String,
    pub port: u16,
    pub api_version: String,
    pub api: &'static str,
    pub sensors: usize,
    pub orphaned: usize,
    pub errors: ErrorSummary,
    pub last_scan: Option<ScanSummary>,
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Unknown sensor {0}")]
    NotFound(SensorId),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("Failed to save assignments: {0}")]
    Store(#[from] StoreError),
}

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Discovery scanner bound to the configured controller
    pub scanner: Arc<DiscoveryScanner>,
    /// Active error poller
    pub monitor: Arc<ErrorMonitor>,
    store: AssignmentStore,
    assignments: RwLock<AssignmentSet>,
    values: RwLock<BTreeMap<SensorId, SensorValue>>,
    last_scan: RwLock<Option<ScanSummary>>,
    /// Serializes scans so reconciliation always sees the latest set
    scan_lock: Mutex<()>,
    /// Event broadcast for WebSocket clients
    pub events: broadcast::Sender<DaemonEvent>,
}

impl AppState {
    /// Connect to the controller, or replay recorded responses, and load stored assignments
    pub async fn new(config: Config, replay: Option<RecordedResponses>) -> Result<Arc<Self>> {
        let client_config = config.to_client_config();
        let client = match replay {
            Some(recorded) => {
                info!(responses = recorded.len(), "Replaying recorded responses");
                EtaClient::with_transport(Arc::new(FixtureTransport::new(recorded)), &client_config).await?
            }
            None => EtaClient::connect(&client_config).await?,
        };
        Self::with_client(config, client)
    }

    pub fn with_client(config: Config, client: EtaClient) -> Result<Arc<Self>> {
        let store = AssignmentStore::new(&config.daemon.store_path, &config.device.host);
        let assignments = store.load_or_create()?;

        let monitor = Arc::new(ErrorMonitor::new(client.clone(), config.error_poll_interval()));
        let scanner = Arc::new(DiscoveryScanner::new(client, config.to_scanner_config()));

        let no_errors = ErrorSummary {
            has_active: false,
            count: 0,
            latest_message: None,
        };
        let values = no_errors.sensor_values(&config.device.host).into_iter().collect();

        let (events, _) = broadcast::channel(100);

        let state = Arc::new(Self {
            config,
            scanner,
            monitor,
            store,
            assignments: RwLock::new(assignments),
            values: RwLock::new(values),
            last_scan: RwLock::new(None),
            scan_lock: Mutex::new(()),
            events,
        });

        // Start forwarding scanner events
        let state_clone = state.clone();
        let mut rx = state.scanner.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                let _ = state_clone.events.send(DaemonEvent::Discovery(event));
            }
        });

        // Error events also drive the error sensor values
        let state_clone = state.clone();
        let mut rx = state.monitor.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        state_clone.update_error_values().await;
                        let _ = state_clone.events.send(DaemonEvent::Error(event));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Error event channel lagged");
                        state_clone.update_error_values().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(state)
    }

    /// Subscribe to daemon events
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.events.subscribe()
    }

    pub fn host(&self) -> &str {
        self.scanner.client().host()
    }

    async fn update_error_values(&self) {
        let summary = self.monitor.summary().await;
        let mut values = self.values.write().await;
        values.extend(summary.sensor_values(self.host()));
    }

    /// Run a scan of the given kind
    pub async fn scan(&self, mode: RefreshMode) -> Result<ScanSummary, RefreshError> {
        match mode {
            RefreshMode::Rediscover => self.rediscover().await,
            RefreshMode::Values => Ok(self.refresh_values().await),
        }
    }

    /// Walk the device tree and reconcile the result with known assignments.
    ///
    /// Nothing is committed in memory unless the store accepted the new set.
    pub async fn rediscover(&self) -> Result<ScanSummary, RefreshError> {
        let _guard = self.scan_lock.lock().await;
        let started_at = Utc::now();
        let started = Instant::now();

        let report = self.scanner.discover().await?;
        let result = {
            let current = self.assignments.read().await;
            reconcile(&current, &report.pass)
        };

        if !result.is_noop() || !self.store.path().exists() {
            if let Err(e) = self
                .store
                .save(&result.merged, Some(report.pass.capabilities.reported()))
            {
                warn!(error = %e, path = %self.store.path().display(), "Failed to save assignments");
                return Err(e.into());
            }
        }

        {
            let mut values = self.values.write().await;
            for id in &result.orphaned {
                values.remove(id);
            }
            values.extend(report.values.iter().map(|(id, v)| (id.clone(), v.clone())));
        }
        *self.assignments.write().await = result.merged;
        self.update_error_values().await;

        let summary = ScanSummary {
            mode: RefreshMode::Rediscover,
            started_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
            sensors: self.assignments.read().await.len(),
            values: report.values.len(),
            added: result.added,
            orphaned: result.orphaned,
            renamed: result.renamed,
            updated: result.updated,
            failures: report.failures,
            stats: Some(report.stats),
        };

        info!(
            sensors = summary.sensors,
            added = summary.added.len(),
            orphaned = summary.orphaned.len(),
            renamed = summary.renamed.len(),
            failed = summary.failures.len(),
            "Rediscovery complete"
        );

        if summary.changed() {
            let _ = self.events.send(DaemonEvent::AssignmentsChanged(summary.clone()));
        }
        *self.last_scan.write().await = Some(summary.clone());
        Ok(summary)
    }

    /// Re-read values of the known assignments
    pub async fn refresh_values(&self) -> ScanSummary {
        let _guard = self.scan_lock.lock().await;
        let started_at = Utc::now();
        let started = Instant::now();

        let assignments: Vec<SensorAssignment> =
            self.assignments.read().await.assignments().cloned().collect();
        let refresh = self.scanner.refresh_values(&assignments).await;
        let read = refresh.values.len();
        self.values.write().await.extend(refresh.values);

        let summary = ScanSummary {
            mode: RefreshMode::Values,
            started_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
            sensors: assignments.len(),
            values: read,
            added: Vec::new(),
            orphaned: Vec::new(),
            renamed: Vec::new(),
            updated: Vec::new(),
            failures: refresh.failures,
            stats: None,
        };
        *self.last_scan.write().await = Some(summary.clone());
        summary
    }

    /// Encode, send and read back a write to one sensor.
    ///
    /// Every sensor on the same endpoint gets the re-read value; a failed
    /// re-read leaves the previous values and returns `None`.
    pub async fn write(&self, id: &SensorId, value: &WriteValue) -> Result<Option<SensorValue>, WriteError> {
        let assignment = self
            .assignments
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WriteError::NotFound(id.clone()))?;

        let payload = assignment.encode_write(value)?;
        let client = self.scanner.client();
        client.write_value(&assignment.uri, &payload).await?;

        let raw = match client.fetch_value(&assignment.uri).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(id = %id, uri = %assignment.uri, error = %e, "Re-read after write failed");
                return Ok(None);
            }
        };

        let siblings: Vec<SensorAssignment> = self
            .assignments
            .read()
            .await
            .assignments()
            .filter(|a| a.uri == assignment.uri)
            .cloned()
            .collect();
        let mut values = self.values.write().await;
        for sibling in &siblings {
            if let Some(v) = sibling.interpret(&raw) {
                values.insert(sibling.id.clone(), v);
            }
        }
        Ok(values.get(id).cloned())
    }

    /// All active sensors with their current values
    pub async fn sensors(&self) -> Vec<SensorView> {
        let assignments = self.assignments.read().await;
        let values = self.values.read().await;
        assignments
            .assignments()
            .map(|a| SensorView::new(a, values.get(&a.id).cloned()))
            .collect()
    }

    pub async fn sensor(&self, id: &SensorId) -> Option<SensorView> {
        let assignments = self.assignments.read().await;
        let assignment = assignments.get(id)?;
        let value = self.values.read().await.get(id).cloned();
        Some(SensorView::new(assignment, value))
    }

    pub async fn orphans(&self) -> Vec<OrphanView> {
        self.assignments
            .read()
            .await
            .tombstones
            .iter()
            .map(|(id, tombstone)| OrphanView {
                id: id.clone(),
                tombstone: tombstone.clone(),
            })
            .collect()
    }

    /// Drop an orphaned assignment for good, once the store has the updated set
    pub async fn forget(&self, id: &SensorId) -> Result<Option<Tombstone>, StoreError> {
        let mut assignments = self.assignments.write().await;
        let mut updated = assignments.clone();
        let Some(tombstone) = updated.forget(id) else {
            return Ok(None);
        };

        let version = self.scanner.client().capabilities().reported().to_string();
        if let Err(e) = self.store.save(&updated, Some(&version)) {
            warn!(error = %e, path = %self.store.path().display(), "Failed to save assignments");
            return Err(e);
        }
        *assignments = updated;
        info!(id = %id, "Forgot orphaned sensor");
        Ok(Some(tombstone))
    }

    pub async fn status(&self) -> StatusView {
        let client = self.scanner.client();
        let (sensors, orphaned) = {
            let assignments = self.assignments.read().await;
            (assignments.len(), assignments.tombstones.len())
        };
        StatusView {
            host: client.host().to_string(),
            port: client.port(),
            api_version: client.capabilities().reported().to_string(),
            api: client.capabilities().label(),
            sensors,
            orphaned,
            errors: self.monitor.summary().await,
            last_scan: self.last_scan.read().await.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::path::Path;

    pub const HOST: &str = "192.168.0.25";

    /// A 1.1 boiler with a temperature, an on/off switch and one active error
    pub fn boiler() -> RecordedResponses {
        let mut recorded = RecordedResponses::new();
        recorded.insert("/user/api", r#"<eta version="1.0"><api version="1.1"/></eta>"#);
        recorded.insert(
            "/user/menu",
            r#"<eta version="1.0"><menu uri="/user/menu"><fub uri="/112/10021" name="Kessel"><object uri="/112/10021/0/0/12000" name="Kesseltemperatur"/><object uri="/112/10021/0/0/12080" name="Ein/Aus Taste"/></fub></menu></eta>"#,
        );
        recorded.insert(
            "/user/var/112/10021",
            r#"<eta version="1.0"><value uri="/user/var/112/10021" strValue="" unit="" decPlaces="0" scaleFactor="1" advTextOffset="0">0</value></eta>"#,
        );
        recorded.insert(
            "/user/var/112/10021/0/0/12000",
            r#"<eta version="1.0"><value uri="/user/var/112/10021/0/0/12000" strValue="65" unit="°C" decPlaces="0" scaleFactor="10" advTextOffset="0">652</value></eta>"#,
        );
        recorded.insert(
            "/user/var/112/10021/0/0/12080",
            r#"<eta version="1.0"><value uri="/user/var/112/10021/0/0/12080" strValue="Ein" unit="" decPlaces="0" scaleFactor="1" advTextOffset="1802">1803</value></eta>"#,
        );
        recorded.insert(
            "/user/errors",
            r#"<eta version="1.0"><errors uri="/user/errors"><fub uri="/112/10021" name="Kessel"><error msg="Flue gas sensor Interrupted" priority="Error" time="2026-01-05 11:32:00">Sensor or cable broken</error></fub></errors></eta>"#,
        );
        recorded
    }

    pub fn config(store_dir: &Path) -> Config {
        let mut config = Config::default();
        config.device.host = HOST.to_string();
        config.daemon.store_path = store_dir.join("assignments.json");
        config
    }

    pub async fn state(
        recorded: RecordedResponses,
        store_dir: &Path,
    ) -> (Arc<AppState>, Arc<FixtureTransport>) {
        let config = config(store_dir);
        let transport = Arc::new(FixtureTransport::new(recorded));
        let client = EtaClient::with_transport(transport.clone(), &config.to_client_config())
            .await
            .unwrap();
        (AppState::with_client(config, client).unwrap(), transport)
    }

    pub fn id(uri: &str) -> SensorId {
        SensorId::for_endpoint(HOST, uri)
    }
}
