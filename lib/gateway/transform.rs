use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{build_http_client, trim_base_url, GatewayError};

/// Shared request budget for poll calls, so retries from every worker are
/// constrained by the same limit.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

pub fn build_rate_limiter(per_second: NonZeroU32) -> GlobalRateLimiter {
    Arc::new(RateLimiter::direct(Quota::per_second(per_second)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    pub id: String,
    pub product_location: String,
    pub metacard_location: String,
}

/// One metadata artifact produced by a transform job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataArtifact {
    #[serde(rename = "metadataType", alias = "type")]
    pub metadata_type: String,
    pub location: String,
}

/// Interpreted result of one status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResponse {
    InProgress,
    Done(Vec<MetadataArtifact>),
    Failed(Vec<MetadataArtifact>),
    /// The transform service no longer knows the job.
    NotFound,
    Transient(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub media_type: String,
    pub content: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransformStatusBody {
    transformation_status: Option<String>,
    #[serde(default)]
    metadata: Vec<MetadataArtifact>,
}

/// Client for the external transformation service.
pub trait TransformGateway: Send + Sync {
    /// Submits a transform job and returns its status-poll URL.
    fn submit<'a>(&'a self, request: &'a TransformRequest)
        -> BoxFuture<'a, Result<String, GatewayError>>;

    fn poll<'a>(&'a self, status_url: &'a str) -> BoxFuture<'a, PollResponse>;

    /// Discards the transform-side tracking record.
    fn discard<'a>(&'a self, status_url: &'a str) -> BoxFuture<'a, Result<(), GatewayError>>;

    fn fetch_artifact<'a>(
        &'a self,
        location: &'a str,
    ) -> BoxFuture<'a, Result<FetchedArtifact, GatewayError>>;
}

impl<T> TransformGateway for Arc<T>
where
    T: TransformGateway + ?Sized,
{
    fn submit<'a>(
        &'a self,
        request: &'a TransformRequest,
    ) -> BoxFuture<'a, Result<String, GatewayError>> {
        (**self).submit(request)
    }

    fn poll<'a>(&'a self, status_url: &'a str) -> BoxFuture<'a, PollResponse> {
        (**self).poll(status_url)
    }

    fn discard<'a>(&'a self, status_url: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        (**self).discard(status_url)
    }

    fn fetch_artifact<'a>(
        &'a self,
        location: &'a str,
    ) -> BoxFuture<'a, Result<FetchedArtifact, GatewayError>> {
        (**self).fetch_artifact(location)
    }
}

pub struct HttpTransformGateway {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: GlobalRateLimiter,
}

impl HttpTransformGateway {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        rate_limiter: GlobalRateLimiter,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: trim_base_url(base_url)?,
            rate_limiter,
        })
    }

    fn resolve_location(&self, location: &str) -> Result<String, GatewayError> {
        let base = reqwest::Url::parse(&format!("{}/", self.base_url)).map_err(|err| {
            GatewayError::InvalidUrl {
                url: self.base_url.clone(),
                reason: err.to_string(),
            }
        })?;
        base.join(location)
            .map(|url| url.to_string())
            .map_err(|err| GatewayError::InvalidUrl {
                url: location.to_string(),
                reason: err.to_string(),
            })
    }
}

impl TransformGateway for HttpTransformGateway {
    fn submit<'a>(
        &'a self,
        request: &'a TransformRequest,
    ) -> BoxFuture<'a, Result<String, GatewayError>> {
        Box::pin(async move {
            let url = format!("{}/transform", self.base_url);
            let response = self.client.post(&url).json(request).send().await?;

            if !response.status().is_success() {
                return Err(GatewayError::UnexpectedStatus {
                    resource: format!("transform submission for dataset {}", request.id),
                    status: response.status().as_u16(),
                });
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| GatewayError::MissingLocation(request.id.clone()))?;
            self.resolve_location(location)
        })
    }

    fn poll<'a>(&'a self, status_url: &'a str) -> BoxFuture<'a, PollResponse> {
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let response = match self.client.get(status_url).send().await {
                Ok(response) => response,
                Err(err) => {
                    return PollResponse::Transient(format!(
                        "transport error polling {status_url}: {err}"
                    ))
                }
            };

            match response.status() {
                StatusCode::OK => match response.text().await {
                    Ok(body) => interpret_poll_body(&body),
                    Err(err) => PollResponse::Transient(format!(
                        "failed reading poll body from {status_url}: {err}"
                    )),
                },
                StatusCode::NOT_FOUND => PollResponse::NotFound,
                other => PollResponse::Transient(format!(
                    "unexpected status {other} polling {status_url}"
                )),
            }
        })
    }

    fn discard<'a>(&'a self, status_url: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            let response = self.client.delete(status_url).send().await?;
            if !response.status().is_success() {
                return Err(GatewayError::UnexpectedStatus {
                    resource: format!("transform record {status_url}"),
                    status: response.status().as_u16(),
                });
            }
            Ok(())
        })
    }

    fn fetch_artifact<'a>(
        &'a self,
        location: &'a str,
    ) -> BoxFuture<'a, Result<FetchedArtifact, GatewayError>> {
        Box::pin(async move {
            let url = self.resolve_location(location)?;
            let response = self.client.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(GatewayError::UnexpectedStatus {
                    resource: format!("metadata artifact {url}"),
                    status: response.status().as_u16(),
                });
            }

            let media_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            let content = response.bytes().await?;
            debug!(
                event = "metadata_artifact_fetched",
                location = %url,
                bytes = content.len(),
                "fetched metadata artifact"
            );

            Ok(FetchedArtifact {
                media_type,
                content,
            })
        })
    }
}

/// Interprets a `200 OK` poll body. Empty or malformed bodies are transient.
pub(crate) fn interpret_poll_body(body: &str) -> PollResponse {
    if body.trim().is_empty() {
        return PollResponse::Transient("empty poll body".to_string());
    }

    let parsed: TransformStatusBody = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(err) => return PollResponse::Transient(format!("malformed poll body: {err}")),
    };

    match parsed.transformation_status.as_deref() {
        Some("IN_PROGRESS") => PollResponse::InProgress,
        Some("DONE") => PollResponse::Done(parsed.metadata),
        Some("FAILED") => PollResponse::Failed(parsed.metadata),
        Some(other) => PollResponse::Transient(format!("unrecognized transformationStatus {other:?}")),
        None => PollResponse::Transient("poll body carried no transformationStatus".to_string()),
    }
}
