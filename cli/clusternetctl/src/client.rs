//! HTTP client for the VLAN allocator API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use clusternet_networking::{Segment, VlanId};
use clusternet_reconcile::{AllocationError, AllocationRequest, AllocationResult, AllocatorService};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::CliError;

/// Connection settings for the allocator API.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

/// Allocator service backed by the HTTP API.
#[derive(Debug, Clone)]
pub struct HttpAllocator {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpAllocator {
    /// Create a new client. Fails only on an unusable base URL.
    pub fn new(settings: &ClientSettings) -> Result<Self, CliError> {
        reqwest::Url::parse(&settings.api_url).map_err(|e| CliError::InvalidApiUrl {
            url: settings.api_url.clone(),
            message: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    /// Build a URL for an endpoint.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Fetch a segment listing, bare or wrapped.
    async fn get_segments(
        &self,
        request: RequestBuilder,
    ) -> Result<Vec<SegmentRecord>, AllocationError> {
        let response = send(request).await?;
        let list: SegmentList = handle_response(response).await?;
        Ok(list.into_records())
    }
}

async fn send(request: RequestBuilder) -> Result<Response, AllocationError> {
    request.send().await.map_err(|e| {
        if e.is_timeout() {
            AllocationError::ServiceUnavailable(format!("request timed out: {e}"))
        } else {
            AllocationError::ServiceUnavailable(e.to_string())
        }
    })
}

/// Decode a successful response or map the failure status.
async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, AllocationError> {
    let status = response.status();

    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| AllocationError::InvalidResponse(format!("failed to decode body: {e}")))
    } else {
        Err(status_error(status, error_message(response).await))
    }
}

/// Map a non-success status to an allocation error.
fn status_error(status: StatusCode, message: String) -> AllocationError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AllocationError::AuthenticationFailed,
        s if s.is_server_error() => {
            AllocationError::ServiceUnavailable(format!("HTTP {}: {}", s.as_u16(), message))
        }
        s => AllocationError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

/// Best-effort error text: `detail` or `message` from a JSON body, else the raw body.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if let Ok(parsed) = serde_json::from_str::<ApiErrorResponse>(&body) {
        if let Some(message) = parsed.detail.or(parsed.message) {
            return match message {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
        }
    }

    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    } else {
        body.chars().take(200).collect()
    }
}

/// API error response structure.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

/// VLAN id as sent by the service; some deployments quote it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VlanField {
    Number(i64),
    Text(String),
}

impl VlanField {
    fn value(self) -> Result<i64, AllocationError> {
        match self {
            Self::Number(n) => Ok(n),
            Self::Text(raw) => raw.trim().parse().map_err(|_| {
                AllocationError::InvalidResponse(format!("vlan_id is not a number: {raw:?}"))
            }),
        }
    }
}

/// `POST /allocate-vlan` response.
#[derive(Debug, Deserialize)]
struct AllocateResponse {
    #[serde(default)]
    vlan_id: Option<VlanField>,
    #[serde(default)]
    segment: Option<String>,
    #[serde(default)]
    epg_name: Option<String>,
    #[serde(default)]
    allocated_at: Option<String>,
}

impl AllocateResponse {
    fn into_result(self, cluster_name: &str) -> Result<AllocationResult, AllocationError> {
        let vlan = self
            .vlan_id
            .ok_or_else(|| AllocationError::InvalidResponse("missing vlan_id".to_string()))?
            .value()?;
        let vlan_id = VlanId::new(vlan)
            .map_err(|e| AllocationError::InvalidResponse(e.to_string()))?;

        let segment = self
            .segment
            .ok_or_else(|| AllocationError::InvalidResponse("missing segment".to_string()))?;
        let segment = Segment::from_cidr(&segment)
            .map_err(|e| AllocationError::InvalidResponse(e.to_string()))?;

        let epg_name = self
            .epg_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("EPG_{cluster_name}_{vlan_id}"));

        let allocated_at = self
            .allocated_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        Ok(AllocationResult {
            vlan_id,
            segment,
            epg_name,
            allocated_at,
        })
    }
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            debug!(raw, error = %e, "Unparseable allocated_at");
            None
        }
    }
}

/// One allocated segment as listed by the API.
#[derive(Debug, Deserialize)]
struct SegmentRecord {
    #[serde(default)]
    cluster_name: Option<String>,
    #[serde(default)]
    segment: Option<String>,
    #[serde(default)]
    vrf: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SegmentList {
    Bare(Vec<SegmentRecord>),
    Wrapped { segments: Vec<SegmentRecord> },
}

impl SegmentList {
    fn into_records(self) -> Vec<SegmentRecord> {
        match self {
            Self::Bare(records) | Self::Wrapped { segments: records } => records,
        }
    }
}

impl SegmentRecord {
    /// Owner name and parsed segment, if both are usable.
    fn entry(&self) -> Option<(&str, Segment)> {
        let name = self.cluster_name.as_deref()?;
        let raw = self.segment.as_deref()?;
        match Segment::from_cidr(raw) {
            Ok(segment) => Some((name, segment)),
            Err(e) => {
                warn!(name, segment = raw, error = %e, "Ignoring malformed segment");
                None
            }
        }
    }
}

#[async_trait]
impl AllocatorService for HttpAllocator {
    async fn health_check(&self) -> bool {
        match self.get("/health").send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = response.status().as_u16(), "Allocator health check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, url = %self.base_url, "Allocator service unreachable");
                false
            }
        }
    }

    async fn fetch_allocated_segments(
        &self,
        vrf: &str,
    ) -> Result<BTreeMap<String, Segment>, AllocationError> {
        let records = self
            .get_segments(self.get("/segments").query(&[("allocated", "true")]))
            .await?;

        Ok(records
            .iter()
            .filter(|r| r.vrf.as_deref().is_none_or(|v| v == vrf))
            .filter_map(SegmentRecord::entry)
            .map(|(name, segment)| (name.to_string(), segment))
            .collect())
    }

    async fn allocate_vlan(
        &self,
        request: &AllocationRequest,
    ) -> Result<AllocationResult, AllocationError> {
        let response = send(self.post("/allocate-vlan").json(request)).await?;

        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Err(AllocationError::NoAvailableSegment {
                site: request.site.clone(),
                vrf: request.vrf.clone(),
            });
        }

        let body: AllocateResponse = handle_response(response).await?;
        body.into_result(&request.cluster_name)
    }

    async fn lookup_segment(&self, name: &str) -> Result<Option<Segment>, AllocationError> {
        let records = self
            .get_segments(self.get("/segments/search").query(&[("q", name)]))
            .await?;

        Ok(records
            .iter()
            .filter_map(SegmentRecord::entry)
            .find(|(owner, _)| *owner == name)
            .map(|(_, segment)| segment))
    }
}
