//! Resource abstraction layer
//!
//! A resource manager unifies "describe resources, filter, act" for one
//! resource type. Managers are manufactured through a process-wide registry
//! so filters can perform cross-type lookups (the account quota filter
//! counts instances through a manufactured `ec2` manager). That dependency
//! graph is explicit and acyclic: `account` depends on `ec2`, nothing else
//! crosses type boundaries.
//!
//! # Module Structure
//!
//! - [`query`] - Generic describe/paginate helper shared by managers
//! - [`account`] - Account singleton and its compliance filters
//! - [`ec2`] - Instances, used for account-level usage counting
//! - [`rdscluster`] - Database clusters and cluster snapshots

use crate::error::EngineError;
use crate::filters::ArcFilter;
use crate::provider::{ApiClient, SessionFactory};
use crate::registry::Registry;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};

pub mod account;
pub mod ec2;
pub mod query;
pub mod rdscluster;

/// One cloud resource: an open mapping of provider-native fields plus a
/// separate namespace for engine-attached annotations.
///
/// Annotations are the side channel filters use to cache expensive lookups
/// (a fetched summary, a sub-resource list) on the record so later filters
/// and reporting reuse them instead of re-issuing API calls. Keeping them
/// in their own map means they can never collide with provider field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    #[serde(flatten)]
    fields: Map<String, Value>,
    #[serde(rename = "steward:annotations", skip_serializing_if = "Map::is_empty")]
    annotations: Map<String, Value>,
}

impl Record {
    /// Record from a provider response item. Non-mapping items yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self::from_fields(fields)),
            _ => None,
        }
    }

    /// Record from an already-built field map (synthesized resources).
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            annotations: Map::new(),
        }
    }

    /// Provider-native fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Look up a provider field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up a provider field as a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Attach engine metadata to this record.
    pub fn annotate(&mut self, key: impl Into<String>, value: Value) {
        self.annotations.insert(key.into(), value);
    }

    /// Read back an annotation.
    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.annotations.get(key)
    }
}

/// Shared execution context for one policy run: region, credentials, and
/// the per-service client cache.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    session: Arc<SessionFactory>,
}

impl PolicyContext {
    pub fn new(session: Arc<SessionFactory>) -> Self {
        Self { session }
    }

    /// Client for `service`, constructed once and cached by the session.
    pub fn client(&self, service: &str) -> Result<Arc<ApiClient>, EngineError> {
        self.session.client(service)
    }

    /// The region this run targets.
    pub fn region(&self) -> &str {
        self.session.region()
    }
}

/// Per-resource-type orchestrator of "fetch, filter, return survivors".
#[async_trait]
pub trait ResourceManager: Send + Sync + std::fmt::Debug {
    /// The registered resource type key, e.g. `rds-cluster`.
    fn type_name(&self) -> &'static str;

    /// Describe/list the resource population, exhausting pagination, and
    /// apply any type-specific enrichment.
    async fn fetch(&self, ctx: &PolicyContext) -> Result<Vec<Record>, EngineError>;

    /// The compiled filter chain for this policy block.
    fn filters(&self) -> &[ArcFilter];

    /// Fetch, then run the filter chain (AND composition) and return the
    /// surviving records.
    async fn resources(&self, ctx: &PolicyContext) -> Result<Vec<Record>, EngineError> {
        let mut records = self.fetch(ctx).await?;
        tracing::debug!("{}: fetched {} resources", self.type_name(), records.len());
        for filter in self.filters() {
            if records.is_empty() {
                break;
            }
            records = filter.process(ctx, records).await?;
        }
        Ok(records)
    }
}

/// Registry entry for one resource type.
pub struct ManagerEntry {
    /// Build a manager instance, compiling the given filter configs
    /// against the type's filter registry.
    pub build: fn(&[Value]) -> Result<Box<dyn ResourceManager>, EngineError>,
    /// The type's filter registry.
    pub filter_registry: fn() -> &'static crate::filters::FilterRegistry,
    /// The type's action registry.
    pub action_registry: fn() -> &'static crate::actions::ActionRegistry,
}

impl std::fmt::Debug for ManagerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerEntry").finish_non_exhaustive()
    }
}

/// The process-wide resource type registry.
pub fn managers() -> &'static Registry<ManagerEntry> {
    static MANAGERS: OnceLock<Registry<ManagerEntry>> = OnceLock::new();
    MANAGERS.get_or_init(|| {
        let mut reg = Registry::new("resources");
        reg.register("account", account::entry())
            .expect("resource registration");
        reg.register("ec2", ec2::entry())
            .expect("resource registration");
        reg.register("rds-cluster", rdscluster::cluster_entry())
            .expect("resource registration");
        reg.register("rds-cluster-snapshot", rdscluster::snapshot_entry())
            .expect("resource registration");
        reg
    })
}

/// Manufacture a manager for `type_key` with the given filter configs.
/// Used by the policy compiler and by filters that need cross-type lookups.
pub fn get_resource_manager(
    type_key: &str,
    filter_configs: &[Value],
) -> Result<Box<dyn ResourceManager>, EngineError> {
    let entry = managers().get(type_key)?;
    (entry.build)(filter_configs)
}
