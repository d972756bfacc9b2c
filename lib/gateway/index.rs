use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::debug;

use super::{build_http_client, trim_base_url, CallOutcome, GatewayError};

/// Finalize request naming the three stored artifact locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    pub file_location: String,
    pub irm_location: String,
    pub metacard_location: String,
}

pub trait IndexGateway: Send + Sync {
    fn index<'a>(
        &'a self,
        dataset_id: &'a str,
        request: &'a IndexRequest,
    ) -> BoxFuture<'a, CallOutcome>;
}

impl<T> IndexGateway for Arc<T>
where
    T: IndexGateway + ?Sized,
{
    fn index<'a>(
        &'a self,
        dataset_id: &'a str,
        request: &'a IndexRequest,
    ) -> BoxFuture<'a, CallOutcome> {
        (**self).index(dataset_id, request)
    }
}

pub struct HttpIndexGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIndexGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: trim_base_url(base_url)?,
        })
    }
}

impl IndexGateway for HttpIndexGateway {
    fn index<'a>(
        &'a self,
        dataset_id: &'a str,
        request: &'a IndexRequest,
    ) -> BoxFuture<'a, CallOutcome> {
        Box::pin(async move {
            let url = format!("{}/index/{}", self.base_url, dataset_id);
            match self.client.put(&url).json(request).send().await {
                Ok(response) => {
                    let outcome = CallOutcome::from_status(response.status(), "index service");
                    debug!(
                        event = "index_request_completed",
                        dataset_id = %dataset_id,
                        status = response.status().as_u16(),
                        "index service answered"
                    );
                    outcome
                }
                Err(err) => CallOutcome::Transient(format!("index request failed: {err}")),
            }
        })
    }
}
