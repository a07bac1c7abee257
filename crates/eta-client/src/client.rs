//! Version-aware client for one ETA controller

use eta_core::{
    ActiveError, ApiCapabilities, EndpointNode, Metadata, RawValue, VariableInfo, WritePayload,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::transport::{HttpTransport, Transport};
use crate::wire::{self, EtaDocument};

const API_PATH: &str = "/user/api";
const MENU_PATH: &str = "/user/menu";
const ERRORS_PATH: &str = "/user/errors";

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ClientError {
    #[error("Request to {path} timed out after {timeout_ms}ms")]
    Timeout { path: String, timeout_ms: u64 },
    #[error("{operation} is not supported on API {version}")]
    UnsupportedOnVersion { operation: String, version: String },
    #[error("Device rejected write to {uri}: {message}")]
    RejectedByDevice { uri: String, message: String },
    #[error("Malformed response from {path}: {reason}")]
    MalformedResponse { path: String, reason: String },
    #[error("Device reported an error for {path}: {message}")]
    DeviceError { path: String, message: String },
    #[error("HTTP {status} from {path}")]
    Http { path: String, status: u16 },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Version negotiation failed: {0}")]
    VersionNegotiation(String),
}

impl ClientError {
    /// Whether retrying the same request later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Timeout { .. } | ClientError::Transport(_))
    }
}

/// Connection settings for one controller
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub force_legacy_mode: bool,
    /// Upper bound on simultaneously outstanding requests
    pub max_parallel_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.25".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(10),
            force_legacy_mode: false,
            max_parallel_requests: 5,
        }
    }
}

/// Client bound to one controller and its negotiated API generation.
///
/// Cloning is cheap; clones share the transport and the request limiter.
#[derive(Clone)]
pub struct EtaClient {
    transport: Arc<dyn Transport>,
    host: String,
    port: u16,
    capabilities: ApiCapabilities,
    request_timeout: Duration,
    limiter: Arc<Semaphore>,
}

impl EtaClient {
    /// Connect over HTTP and negotiate the API version
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(&config.host, config.port, config.request_timeout)?;
        Self::with_transport(Arc::new(transport), config).await
    }

    /// Negotiate over an arbitrary transport
    pub async fn with_transport(
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let limiter = Arc::new(Semaphore::new(config.max_parallel_requests.max(1)));
        let body = request(&transport, &limiter, config.request_timeout, Request::Get(API_PATH))
            .await
            .map_err(|e| ClientError::VersionNegotiation(e.to_string()))?;
        let doc = wire::parse_document(&body)
            .map_err(|e| ClientError::VersionNegotiation(format!("unreadable {} response: {}", API_PATH, e)))?;
        if let Some(message) = &doc.error {
            return Err(ClientError::VersionNegotiation(format!(
                "device error on {}: {}",
                API_PATH,
                message.trim()
            )));
        }
        let reported = doc
            .api
            .map(|api| api.version)
            .ok_or_else(|| ClientError::VersionNegotiation("response has no <api> element".to_string()))?;

        let capabilities = ApiCapabilities::negotiate(&reported, config.force_legacy_mode)
            .map_err(|e| ClientError::VersionNegotiation(e.to_string()))?;

        info!(
            host = %config.host,
            reported = %reported,
            api = capabilities.label(),
            forced_legacy = config.force_legacy_mode,
            "Negotiated API version"
        );

        Ok(Self {
            transport,
            host: config.host.clone(),
            port: config.port,
            capabilities,
            request_timeout: config.request_timeout,
            limiter,
        })
    }

    pub fn capabilities(&self) -> &ApiCapabilities {
        &self.capabilities
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    async fn get(&self, path: &str) -> Result<EtaDocument, ClientError> {
        let body = request(&self.transport, &self.limiter, self.request_timeout, Request::Get(path)).await?;
        let doc = decode(path, &body)?;
        if let Some(message) = &doc.error {
            return Err(ClientError::DeviceError {
                path: path.to_string(),
                message: message.trim().to_string(),
            });
        }
        Ok(doc)
    }

    /// Fetch and flatten the menu tree
    pub async fn fetch_menu_tree(&self) -> Result<Vec<EndpointNode>, ClientError> {
        let doc = self.get(MENU_PATH).await?;
        let menu = doc.menu.ok_or_else(|| missing(MENU_PATH, "menu"))?;
        let nodes = wire::flatten_menu(&menu);
        debug!(nodes = nodes.len(), "Fetched menu tree");
        Ok(nodes)
    }

    /// Read the current raw value of an endpoint
    pub async fn fetch_value(&self, uri: &str) -> Result<RawValue, ClientError> {
        let path = format!("/user/var{}", uri);
        let doc = self.get(&path).await?;
        let value = doc.value.ok_or_else(|| missing(&path, "value"))?;
        value.into_raw(uri).map_err(|e| malformed(&path, e))
    }

    /// Fetch variable metadata; API 1.2 only
    pub async fn fetch_variable_info(&self, uri: &str) -> Result<VariableInfo, ClientError> {
        if !self.capabilities.supports_metadata() {
            return Err(ClientError::UnsupportedOnVersion {
                operation: "varinfo".to_string(),
                version: self.capabilities.reported().to_string(),
            });
        }
        let path = format!("/user/varinfo{}", uri);
        let doc = self.get(&path).await?;
        let variable = doc
            .var_info
            .and_then(|v| v.variable)
            .ok_or_else(|| missing(&path, "varInfo/variable"))?;
        variable.into_info(uri).map_err(|e| malformed(&path, e))
    }

    /// Metadata for an endpoint, `NotSupported` on API 1.1
    pub async fn fetch_metadata(&self, uri: &str) -> Result<Metadata, ClientError> {
        match self.fetch_variable_info(uri).await {
            Ok(info) => Ok(Metadata::Full(info)),
            Err(ClientError::UnsupportedOnVersion { .. }) => Ok(Metadata::NotSupported),
            Err(e) => Err(e),
        }
    }

    /// Write raw form fields to an endpoint
    pub async fn write_value(&self, uri: &str, payload: &WritePayload) -> Result<(), ClientError> {
        let path = format!("/user/var{}", uri);
        let fields = payload.fields();
        let body = request(
            &self.transport,
            &self.limiter,
            self.request_timeout,
            Request::Post(&path, &fields),
        )
        .await?;
        let doc = decode(&path, &body)?;

        if doc.success.is_some() {
            info!(uri = %uri, fields = ?fields, "Write accepted");
            return Ok(());
        }
        if let Some(message) = doc.error {
            warn!(uri = %uri, message = %message.trim(), "Write rejected");
            return Err(ClientError::RejectedByDevice {
                uri: uri.to_string(),
                message: message.trim().to_string(),
            });
        }
        Err(missing(&path, "success"))
    }

    /// Fetch the controller's active error list
    pub async fn fetch_errors(&self) -> Result<Vec<ActiveError>, ClientError> {
        let doc = self.get(ERRORS_PATH).await?;
        let errors = doc.errors.ok_or_else(|| missing(ERRORS_PATH, "errors"))?;
        Ok(errors.into_errors(&self.host, self.port))
    }
}

enum Request<'a> {
    Get(&'a str),
    Post(&'a str, &'a [(&'static str, String)]),
}

impl Request<'_> {
    fn path(&self) -> &str {
        match self {
            Request::Get(path) | Request::Post(path, _) => path,
        }
    }
}

/// Run one request under the shared limiter and the per-request timeout
async fn request(
    transport: &Arc<dyn Transport>,
    limiter: &Semaphore,
    timeout: Duration,
    request: Request<'_>,
) -> Result<String, ClientError> {
    let _permit = limiter
        .acquire()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    let path = request.path().to_string();
    let fut = async {
        match request {
            Request::Get(path) => transport.get(path).await,
            Request::Post(path, form) => transport.post(path, form).await,
        }
    };

    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout {
            path,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

fn decode(path: &str, body: &str) -> Result<EtaDocument, ClientError> {
    wire::parse_document(body).map_err(|e| malformed(path, e))
}

fn malformed(path: &str, err: wire::WireError) -> ClientError {
    ClientError::MalformedResponse {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

fn missing(path: &str, element: &str) -> ClientError {
    ClientError::MalformedResponse {
        path: path.to_string(),
        reason: format!("missing <{}> element", element),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FixtureTransport;
    use eta_core::RecordedResponses;

    const NS: &str = r#"version="1.0" xmlns="http://www.eta.co.at/rest/v1""#;

    fn recorded(version: &str) -> RecordedResponses {
        let mut r = RecordedResponses::new();
        r.insert(API_PATH, format!(r#"<eta {}><api version="{}"/></eta>"#, NS, version));
        r.insert(
            MENU_PATH,
            format!(
                r#"<eta {}><menu><fub uri="/112/10021" name="Kessel"><object uri="/112/10021/0/0/12000" name="Kesseltemperatur"/></fub></menu></eta>"#,
                NS
            ),
        );
        r.insert(
            "/user/var/112/10021/0/0/12000",
            format!(
                r#"<eta {}><value uri="/user/var/112/10021/0/0/12000" strValue="65" unit="°C" decPlaces="0" scaleFactor="10" advTextOffset="0">652</value></eta>"#,
                NS
            ),
        );
        r.insert(
            "/user/varinfo/112/10021/0/0/12000",
            format!(
                r#"<eta {}><varInfo><variable uri="112/10021/0/0/12000" name="Kesseltemperatur" fullName="Kessel > Kesseltemperatur" unit="°C" decPlaces="0" scaleFactor="10" advTextOffset="0" isWritable="0"><type>DEFAULT</type></variable></varInfo></eta>"#,
                NS
            ),
        );
        r.insert(
            ERRORS_PATH,
            format!(
                r#"<eta {}><errors uri="/user/errors"><fub uri="/112/10021" name="Kessel"><error msg="Flue gas sensor" priority="Error" time="2026-01-05 11:32:00">Check sensor</error></fub></errors></eta>"#,
                NS
            ),
        );
        r
    }

    fn config() -> ClientConfig {
        ClientConfig {
            host: "10.0.0.9".to_string(),
            ..Default::default()
        }
    }

    async fn client(version: &str) -> (EtaClient, Arc<FixtureTransport>) {
        let transport = Arc::new(FixtureTransport::new(recorded(version)));
        let client = EtaClient::with_transport(transport.clone(), &config()).await.unwrap();
        (client, transport)
    }

    #[tokio::test]
    async fn test_negotiation() {
        let (current, _) = client("1.2").await;
        assert!(current.capabilities().supports_metadata());

        let (legacy, _) = client("1.1").await;
        assert!(!legacy.capabilities().supports_metadata());
    }

    #[tokio::test]
    async fn test_force_legacy() {
        let transport = Arc::new(FixtureTransport::new(recorded("1.2")));
        let config = ClientConfig {
            force_legacy_mode: true,
            ..config()
        };
        let client = EtaClient::with_transport(transport, &config).await.unwrap();
        assert!(!client.capabilities().supports_metadata());
        assert_eq!(client.capabilities().reported(), "1.2");
    }

    #[tokio::test]
    async fn test_negotiation_failure() {
        let transport = Arc::new(FixtureTransport::new(RecordedResponses::new()));
        let err = EtaClient::with_transport(transport, &config()).await.err().unwrap();
        assert!(matches!(err, ClientError::VersionNegotiation(_)));
    }

    #[tokio::test]
    async fn test_negotiation_unreadable_reply() {
        let mut r = RecordedResponses::new();
        r.insert(API_PATH, "<html>gateway page</html");
        let transport = Arc::new(FixtureTransport::new(r));
        let err = EtaClient::with_transport(transport, &config()).await.err().unwrap();
        assert!(matches!(err, ClientError::VersionNegotiation(_)), "{err:?}");

        let mut r = RecordedResponses::new();
        r.insert(API_PATH, format!(r#"<eta {}><error>Service unavailable</error></eta>"#, NS));
        let transport = Arc::new(FixtureTransport::new(r));
        let err = EtaClient::with_transport(transport, &config()).await.err().unwrap();
        match err {
            ClientError::VersionNegotiation(message) => assert!(message.contains("Service unavailable")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_menu_and_value() {
        let (client, _) = client("1.2").await;
        let nodes = client.fetch_menu_tree().await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].uri, "/112/10021/0/0/12000");
        assert_eq!(nodes[1].parent.as_deref(), Some("/112/10021"));

        let value = client.fetch_value("/112/10021/0/0/12000").await.unwrap();
        assert_eq!(value.uri, "/112/10021/0/0/12000");
        assert_eq!(value.scaled(), Some(65.2));
    }

    #[tokio::test]
    async fn test_varinfo_on_legacy_makes_no_request() {
        let (client, transport) = client("1.1").await;
        let before = transport.request_count();
        let err = client.fetch_variable_info("/112/10021/0/0/12000").await.unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedOnVersion { .. }));
        assert_eq!(transport.request_count(), before);

        let metadata = client.fetch_metadata("/112/10021/0/0/12000").await.unwrap();
        assert_eq!(metadata, Metadata::NotSupported);
    }

    #[tokio::test]
    async fn test_fetch_metadata() {
        let (client, _) = client("1.2").await;
        let metadata = client.fetch_metadata("/112/10021/0/0/12000").await.unwrap();
        let info = metadata.info().unwrap();
        assert_eq!(info.uri, "/112/10021/0/0/12000");
        assert_eq!(info.scale_factor, 10);
        assert_eq!(info.writable, Some(false));
    }

    #[tokio::test]
    async fn test_write_value() {
        let (client, transport) = client("1.2").await;
        client
            .write_value("/112/10021/0/0/12000", &WritePayload::value(215))
            .await
            .unwrap();
        let writes = transport.writes();
        assert_eq!(writes[0].0, "/user/var/112/10021/0/0/12000");
        assert_eq!(writes[0].1, vec![("value", "215".to_string())]);
    }

    #[tokio::test]
    async fn test_write_rejected() {
        let mut r = recorded("1.2");
        r.insert(
            "POST /user/var/112/10021/0/0/12000",
            format!(r#"<eta {}><error>Value out of range</error></eta>"#, NS),
        );
        let transport = Arc::new(FixtureTransport::new(r));
        let client = EtaClient::with_transport(transport, &config()).await.unwrap();
        let err = client
            .write_value("/112/10021/0/0/12000", &WritePayload::value(9999))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ClientError::RejectedByDevice {
                uri: "/112/10021/0/0/12000".to_string(),
                message: "Value out of range".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        let (client, _) = client("1.2").await;
        let errors = client.fetch_errors().await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Flue gas sensor");
        assert_eq!(errors[0].fub, "Kessel");
        assert_eq!(errors[0].host, "10.0.0.9");
        assert!(errors[0].time.is_some());
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_http_error() {
        let (client, _) = client("1.2").await;
        let err = client.fetch_value("/1/2/3").await.unwrap_err();
        assert!(matches!(err, ClientError::Http { status: 404, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let transport = Arc::new(FixtureTransport::new(recorded("1.2")).with_latency(Duration::from_secs(30)));
        let err = EtaClient::with_transport(transport, &config()).await.err().unwrap();
        match err {
            ClientError::VersionNegotiation(message) => assert!(message.contains("timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
