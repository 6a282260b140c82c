//! Action engine
//!
//! Actions apply side effects to the resources a policy matched. Each
//! variant declares a schema like filters do and is registered per
//! resource type. Fan-out happens through the worker pool handed into
//! `process`; per-unit failures are captured in the outcome instead of
//! aborting the batch, so one bad resource never blocks remediation of
//! the rest.

use crate::error::EngineError;
use crate::executor::WorkerPool;
use crate::registry::Registry;
use crate::resource::{PolicyContext, Record};
use crate::schema::Schema;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

/// Result of one action invocation over a matched resource set.
#[derive(Debug)]
pub struct ActionOutcome {
    /// Records handed to the next action in the chain (usually the input,
    /// possibly annotated).
    pub records: Vec<Record>,
    /// Captured per-unit failures. Completed units' side effects stand.
    pub failures: Vec<EngineError>,
}

impl ActionOutcome {
    /// Whether any unit failed.
    pub fn degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// A side-effecting operation over matched resources.
#[async_trait]
pub trait Action: Send + Sync + std::fmt::Debug {
    /// Preferred fan-out width for this variant. The policy runner sizes
    /// the pool from this unless overridden by configuration.
    fn max_workers(&self) -> usize {
        2
    }

    async fn process(
        &self,
        ctx: &PolicyContext,
        pool: &WorkerPool,
        resources: Vec<Record>,
    ) -> Result<ActionOutcome, EngineError>;
}

/// Builds an action instance from its validated configuration block.
pub type ActionBuilder = Box<dyn Fn(&Value) -> Result<Arc<dyn Action>, EngineError> + Send + Sync>;

/// Registry entry for one action variant.
pub struct ActionEntry {
    pub schema: Schema,
    pub build: ActionBuilder,
}

impl std::fmt::Debug for ActionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEntry")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Per-resource-type action registry.
pub type ActionRegistry = Registry<ActionEntry>;

/// Validate and build one action block. Returns the type key alongside the
/// instance for reporting.
pub fn compile_action(
    registry: &ActionRegistry,
    config: &Value,
) -> Result<(String, Arc<dyn Action>), EngineError> {
    let type_key = config
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Policy("action block is missing 'type'".to_string()))?;
    let entry = registry.get(type_key)?;
    entry.schema.validate(config)?;
    Ok((type_key.to_string(), (entry.build)(config)?))
}

/// Compile an ordered action list.
pub fn compile_actions(
    registry: &ActionRegistry,
    configs: &[Value],
) -> Result<Vec<(String, Arc<dyn Action>)>, EngineError> {
    configs.iter().map(|c| compile_action(registry, c)).collect()
}

/// Deterministic snapshot name: prefix, resource id, UTC timestamp.
pub fn snapshot_identifier(prefix: &str, resource_id: &str) -> String {
    format!(
        "{}-{}-{}",
        prefix,
        resource_id,
        Utc::now().format("%Y-%m-%d-%H-%M")
    )
}

/// Split `items` into fixed-size chunks in reverse order: the last input
/// item leads the first chunk. Bulk deletes iterate newest-first so the
/// oldest items are the last ones touched.
pub fn reverse_chunks<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items.into_iter().rev() {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
