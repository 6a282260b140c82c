//! Provider API client
//!
//! One client per (service, region). Exposes a single `call` entry point:
//! a named RPC operation with a mapping of parameters, returning the parsed
//! response or a typed error carrying the provider's error code.

use super::http::HttpTransport;
use super::session::Credentials;
use crate::error::ApiError;
use serde_json::Value;
use url::Url;

/// Client for one provider service in one region.
#[derive(Debug, Clone)]
pub struct ApiClient {
    service: String,
    region: String,
    endpoint: String,
    credentials: Credentials,
    transport: HttpTransport,
}

impl ApiClient {
    /// Create a client for `service` in `region`. When `endpoint_override`
    /// is given (tests, private endpoints) it replaces the default
    /// service endpoint.
    pub fn new(
        service: &str,
        region: &str,
        credentials: Credentials,
        endpoint_override: Option<&str>,
    ) -> Result<Self, ApiError> {
        let endpoint = match endpoint_override {
            Some(raw) => {
                let url = Url::parse(raw).map_err(|e| ApiError {
                    service: service.to_string(),
                    operation: String::new(),
                    status: 0,
                    code: "InvalidEndpoint".to_string(),
                    message: format!("invalid endpoint override '{raw}': {e}"),
                })?;
                url.as_str().trim_end_matches('/').to_string()
            }
            None => default_endpoint(service, region),
        };

        Ok(Self {
            service: service.to_string(),
            region: region.to_string(),
            endpoint,
            credentials,
            transport: HttpTransport::new()?,
        })
    }

    /// The service this client talks to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The region this client is bound to.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Invoke one RPC operation, e.g. `DescribeDBClusters`.
    pub async fn call(&self, operation: &str, params: Value) -> Result<Value, ApiError> {
        self.transport
            .call(
                &self.endpoint,
                &self.service,
                operation,
                self.credentials.token(),
                &params,
            )
            .await
    }
}

/// Default service endpoint URL.
fn default_endpoint(service: &str, region: &str) -> String {
    format!("https://{service}.{region}.amazonaws.com/")
        .trim_end_matches('/')
        .to_string()
}
