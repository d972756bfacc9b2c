pub mod index;
pub mod transform;

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

pub use index::{HttpIndexGateway, IndexGateway, IndexRequest};
pub use transform::{
    build_rate_limiter, FetchedArtifact, GlobalRateLimiter, HttpTransformGateway,
    MetadataArtifact, PollResponse, TransformGateway, TransformRequest,
};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("unexpected status {status} from {resource}")]
    UnexpectedStatus { resource: String, status: u16 },

    #[error("transform submission response for {0} carried no Location header")]
    MissingLocation(String),

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Normalized result of a reconciliation call (index request, add-metadata,
/// quarantine). Status codes are classified once, here, and matched
/// exhaustively by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// The target vanished downstream; there is nothing left to finalize.
    NotFound,
    /// The request is malformed; repeating it cannot help.
    BadRequest(String),
    Transient(String),
}

impl CallOutcome {
    pub fn from_status(status: StatusCode, resource: &str) -> Self {
        match status {
            s if s.is_success() => Self::Success,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::BAD_REQUEST => {
                Self::BadRequest(format!("{resource} rejected the request as malformed"))
            }
            other => Self::Transient(format!("unexpected status {other} from {resource}")),
        }
    }

    pub fn from_gateway_error(error: &GatewayError) -> Self {
        match error {
            GatewayError::UnexpectedStatus { resource, status } => {
                match StatusCode::from_u16(*status) {
                    Ok(code) => Self::from_status(code, resource),
                    Err(_) => Self::Transient(error.to_string()),
                }
            }
            GatewayError::InvalidUrl { .. } => Self::BadRequest(error.to_string()),
            GatewayError::RequestError(_) | GatewayError::MissingLocation(_) => {
                Self::Transient(error.to_string())
            }
        }
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

pub(crate) fn trim_base_url(raw: &str) -> Result<String, GatewayError> {
    let trimmed = raw.trim().trim_end_matches('/');
    reqwest::Url::parse(trimmed).map_err(|err| GatewayError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    Ok(trimmed.to_string())
}
