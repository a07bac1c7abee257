//! Discovery scanner: full passes and value refreshes

use eta_client::{ClientError, EtaClient};
use eta_core::{
    needs_sample, Classifier, DiscoveryPass, EndpointNode, Metadata, PassEntry, RawValue,
    SensorAssignment, SensorId, SensorValue,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::fetcher::{fetch_all, ConcurrencyLimit};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to fetch menu tree: {0}")]
    MenuTree(#[source] ClientError),
}

/// What a periodic scan does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Re-read values of known sensors only
    #[default]
    Values,
    /// Walk the whole tree again and reconcile
    Rediscover,
}

/// Scanner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Parallel requests per batch
    pub concurrency: ConcurrencyLimit,
}

/// Discovery event for real-time updates
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    ScanStarted { mode: RefreshMode },
    ScanCompleted {
        mode: RefreshMode,
        sensors: usize,
        failed: usize,
    },
    /// The pass ended without a result
    ScanFailed { mode: RefreshMode, error: String },
}

/// Which request failed for an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStage {
    Metadata,
    Value,
}

/// An endpoint left out of a pass or refresh
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointFailure {
    pub uri: String,
    pub stage: FetchStage,
    pub error: ClientError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanStats {
    /// Nodes in the menu tree, duplicates included
    pub menu_nodes: usize,
    /// Nodes skipped because their URI was already seen
    pub duplicate_uris: usize,
    /// Invalid URIs dropped in favour of a valid one with the same label path
    pub dropped_duplicates: usize,
    pub metadata_requests: usize,
    pub value_requests: usize,
    pub elapsed_ms: u64,
}

/// Outcome of one full discovery pass
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    pub pass: DiscoveryPass,
    pub failures: Vec<EndpointFailure>,
    /// Values read during the pass, keyed by sensor
    pub values: BTreeMap<SensorId, SensorValue>,
    pub stats: ScanStats,
}

/// Outcome of a value-only refresh
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValueRefresh {
    pub values: BTreeMap<SensorId, SensorValue>,
    pub failures: Vec<EndpointFailure>,
}

/// Drives the client over a device's endpoint tree
pub struct DiscoveryScanner {
    client: EtaClient,
    classifier: Classifier,
    config: ScannerConfig,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryScanner {
    pub fn new(client: EtaClient, config: ScannerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            classifier: Classifier::new(client.host()),
            client,
            config,
            event_tx,
        }
    }

    pub fn client(&self) -> &EtaClient {
        &self.client
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Subscribe to scan events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    /// Walk the tree, fetch what each API generation needs, and classify.
    ///
    /// Only a failing menu request fails the pass; per-endpoint failures are
    /// reported alongside the result. Dropping the future abandons the pass.
    pub async fn discover(&self) -> Result<DiscoveryReport, ScanError> {
        let started = Instant::now();
        let mode = RefreshMode::Rediscover;
        let _ = self.event_tx.send(DiscoveryEvent::ScanStarted { mode });

        let caps = self.client.capabilities().clone();
        let limit = self.config.concurrency;
        info!(host = %self.client.host(), api = caps.label(), limit = %limit, "Starting discovery");

        let tree = match self.client.fetch_menu_tree().await {
            Ok(tree) => tree,
            Err(e) => {
                warn!(error = %e, "Menu tree unavailable");
                let _ = self.event_tx.send(DiscoveryEvent::ScanFailed {
                    mode,
                    error: e.to_string(),
                });
                return Err(ScanError::MenuTree(e));
            }
        };

        let mut stats = ScanStats {
            menu_nodes: tree.len(),
            ..Default::default()
        };
        let nodes = unique_nodes(tree, &mut stats);
        let uris: Vec<String> = nodes.keys().cloned().collect();
        let mut failures = Vec::new();

        // metadata
        let mut metadata: HashMap<String, Metadata> = HashMap::new();
        if caps.supports_metadata() {
            stats.metadata_requests = uris.len();
            let outcome = fetch_all(uris, limit, |uri| {
                let client = self.client.clone();
                let uri = uri.clone();
                async move { client.fetch_metadata(&uri).await }
            })
            .await;
            metadata.extend(outcome.successes);
            failures.extend(outcome.failures.into_iter().map(|(uri, error)| EndpointFailure {
                uri,
                stage: FetchStage::Metadata,
                error,
            }));
        } else {
            metadata.extend(uris.into_iter().map(|uri| (uri, Metadata::NotSupported)));
        }

        // samples
        let wanted: Vec<String> = metadata
            .iter()
            .filter(|(_, m)| needs_sample(m, &caps))
            .map(|(uri, _)| uri.clone())
            .collect();
        stats.value_requests = wanted.len();
        let outcome = fetch_all(wanted, limit, |uri| {
            let client = self.client.clone();
            let uri = uri.clone();
            async move { client.fetch_value(&uri).await }
        })
        .await;
        let mut samples: HashMap<String, RawValue> = outcome.successes.into_iter().collect();
        for (uri, error) in outcome.failures {
            metadata.remove(&uri);
            failures.push(EndpointFailure {
                uri,
                stage: FetchStage::Value,
                error,
            });
        }

        sanitize_duplicates(&nodes, &mut metadata, &mut samples, &mut failures, &mut stats);

        // tree order
        let entries: Vec<PassEntry> = nodes
            .values()
            .filter_map(|node| {
                metadata.remove(&node.uri).map(|m| PassEntry {
                    node: node.clone(),
                    metadata: m,
                    sample: samples.get(&node.uri).cloned(),
                })
            })
            .collect();

        let pass = DiscoveryPass::classify(&self.classifier, caps, entries);
        let values = initial_values(&pass.candidates, &samples);
        failures.sort_by(|a, b| a.uri.cmp(&b.uri));
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            sensors = pass.len(),
            failed = failures.len(),
            duplicates = stats.duplicate_uris,
            elapsed_ms = stats.elapsed_ms,
            "Discovery complete"
        );
        let _ = self.event_tx.send(DiscoveryEvent::ScanCompleted {
            mode,
            sensors: pass.len(),
            failed: failures.len(),
        });

        Ok(DiscoveryReport {
            pass,
            failures,
            values,
            stats,
        })
    }

    /// Re-read the values of known sensors, one request per distinct URI
    pub async fn refresh_values(&self, assignments: &[SensorAssignment]) -> ValueRefresh {
        let mode = RefreshMode::Values;
        let _ = self.event_tx.send(DiscoveryEvent::ScanStarted { mode });

        let mut seen = HashSet::new();
        let uris: Vec<String> = assignments
            .iter()
            .filter(|a| !a.kind.is_error())
            .filter(|a| seen.insert(a.uri.clone()))
            .map(|a| a.uri.clone())
            .collect();

        let outcome = fetch_all(uris, self.config.concurrency, |uri| {
            let client = self.client.clone();
            let uri = uri.clone();
            async move { client.fetch_value(&uri).await }
        })
        .await;

        let samples: HashMap<String, RawValue> = outcome.successes.into_iter().collect();
        let values = initial_values(assignments, &samples);
        let failures: Vec<EndpointFailure> = outcome
            .failures
            .into_iter()
            .map(|(uri, error)| {
                debug!(uri = %uri, error = %error, "Value refresh failed");
                EndpointFailure {
                    uri,
                    stage: FetchStage::Value,
                    error,
                }
            })
            .collect();

        info!(values = values.len(), failed = failures.len(), "Value refresh complete");
        let _ = self.event_tx.send(DiscoveryEvent::ScanCompleted {
            mode,
            sensors: values.len(),
            failed: failures.len(),
        });

        ValueRefresh { values, failures }
    }
}

/// Keep the first node per URI, in tree order
fn unique_nodes(tree: Vec<EndpointNode>, stats: &mut ScanStats) -> indexed::Nodes {
    let mut nodes = indexed::Nodes::default();
    for node in tree {
        if node.uri.is_empty() {
            continue;
        }
        if nodes.contains(&node.uri) {
            debug!(uri = %node.uri, path = %node.display_path(), "Duplicate URI in menu");
            stats.duplicate_uris += 1;
            continue;
        }
        nodes.push(node);
    }
    nodes
}

/// Drop invalid URIs that share a label path with exactly one valid URI.
///
/// A URI is valid when its value was read and is not the placeholder; URIs
/// whose metadata needed no value read count as valid.
fn sanitize_duplicates(
    nodes: &indexed::Nodes,
    metadata: &mut HashMap<String, Metadata>,
    samples: &mut HashMap<String, RawValue>,
    failures: &mut Vec<EndpointFailure>,
    stats: &mut ScanStats,
) {
    let mut by_path: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for node in nodes.values() {
        by_path.entry(node.path_key()).or_default().push(&node.uri);
    }

    for (path, uris) in by_path.into_iter().filter(|(_, uris)| uris.len() > 1) {
        let is_valid = |uri: &str| {
            metadata.contains_key(uri) && samples.get(uri).map_or(true, |s| !s.is_placeholder())
        };
        let valid: Vec<&str> = uris.iter().copied().filter(|u| is_valid(u)).collect();
        if valid.len() != 1 {
            continue;
        }

        for uri in uris.into_iter().filter(|u| *u != valid[0]) {
            debug!(path = %path, uri = %uri, kept = %valid[0], "Dropping invalid duplicate");
            metadata.remove(uri);
            samples.remove(uri);
            failures.retain(|f| f.uri != uri);
            stats.dropped_duplicates += 1;
        }
    }
}

/// Interpret fetched samples for each assignment that has one
fn initial_values(
    assignments: &[SensorAssignment],
    samples: &HashMap<String, RawValue>,
) -> BTreeMap<SensorId, SensorValue> {
    assignments
        .iter()
        .filter_map(|a| {
            let sample = samples.get(&a.uri)?;
            if sample.is_placeholder() {
                return None;
            }
            a.interpret(sample).map(|v| (a.id.clone(), v))
        })
        .collect()
}

mod indexed {
    use eta_core::EndpointNode;
    use std::collections::HashMap;

    /// Nodes in tree order with lookup by URI
    #[derive(Default)]
    pub struct Nodes {
        order: Vec<EndpointNode>,
        index: HashMap<String, usize>,
    }

    impl Nodes {
        pub fn contains(&self, uri: &str) -> bool {
            self.index.contains_key(uri)
        }

        pub fn push(&mut self, node: EndpointNode) {
            self.index.insert(node.uri.clone(), self.order.len());
            self.order.push(node);
        }

        pub fn keys(&self) -> impl Iterator<Item = &String> {
            self.order.iter().map(|n| &n.uri)
        }

        pub fn values(&self) -> impl Iterator<Item = &EndpointNode> {
            self.order.iter()
        }
    }
}
