//! Session factory with per-service client caching
//!
//! Client construction is not free, so the session caches one client per
//! service for its (region, credentials) context and hands out shared
//! handles. Filters and actions ask the session for a client instead of
//! constructing their own.

use super::client::ApiClient;
use crate::error::EngineError;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Opaque provider credentials. Real credential acquisition and request
/// signing live outside the engine; a bearer token stands in here.
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    /// Read the token from `STEWARD_API_TOKEN`.
    pub fn from_env() -> Option<Self> {
        std::env::var("STEWARD_API_TOKEN").ok().map(Self::new)
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

// Keep the token out of debug output.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("token", &"***").finish()
    }
}

/// Manufactures and caches API clients for one (region, credentials)
/// context.
#[derive(Debug)]
pub struct SessionFactory {
    region: String,
    credentials: Credentials,
    endpoint_override: Option<String>,
    clients: Mutex<HashMap<String, Arc<ApiClient>>>,
}

impl SessionFactory {
    pub fn new(region: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            region: region.into(),
            credentials,
            endpoint_override: None,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Route every service at the given base URL instead of the default
    /// per-service endpoints. Used by tests and private deployments.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    /// The region this session is bound to.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Get (or construct and cache) the client for `service`.
    pub fn client(&self, service: &str) -> Result<Arc<ApiClient>, EngineError> {
        let mut clients = self.clients.lock().expect("session cache lock poisoned");
        if let Some(client) = clients.get(service) {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(ApiClient::new(
            service,
            &self.region,
            self.credentials.clone(),
            self.endpoint_override.as_deref(),
        )?);
        clients.insert(service.to_string(), Arc::clone(&client));
        Ok(client)
    }
}
