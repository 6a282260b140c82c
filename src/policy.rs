//! Policy loading, compilation, and execution
//!
//! A policy file is YAML: a list of policy blocks, each naming a resource
//! type plus ordered filter and action configurations. Compilation resolves
//! every `type` key against the registries and schema-validates every
//! block, so execution starts only when the whole policy is well-formed.

use crate::actions::{compile_actions, Action};
use crate::error::EngineError;
use crate::executor::WorkerPool;
use crate::resource::{managers, PolicyContext, Record, ResourceManager};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Parsed policy file.
#[derive(Debug, Deserialize)]
pub struct PolicyFile {
    pub policies: Vec<PolicyDef>,
}

/// One policy block as written in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyDef {
    pub name: String,
    pub resource: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub filters: Vec<Value>,
    #[serde(default)]
    pub actions: Vec<Value>,
}

/// Load a policy file from disk.
pub fn load_policy_file(path: &Path) -> Result<PolicyFile, EngineError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Policy(format!("failed to read {}: {e}", path.display())))?;
    parse_policies(&content)
}

/// Parse policy YAML.
pub fn parse_policies(content: &str) -> Result<PolicyFile, EngineError> {
    serde_yaml::from_str(content)
        .map_err(|e| EngineError::Policy(format!("invalid policy file: {e}")))
}

/// A policy block after registry resolution and schema validation.
#[derive(Debug)]
pub struct CompiledPolicy {
    pub name: String,
    pub resource_type: String,
    manager: Box<dyn ResourceManager>,
    actions: Vec<(String, Arc<dyn Action>)>,
}

/// Compile one policy block. Fatal on unknown resource/filter/action types
/// and on any schema violation.
pub fn compile_policy(def: &PolicyDef) -> Result<CompiledPolicy, EngineError> {
    let entry = managers().get(&def.resource)?;
    let manager = (entry.build)(&def.filters)?;
    let actions = compile_actions((entry.action_registry)(), &def.actions)?;
    Ok(CompiledPolicy {
        name: def.name.clone(),
        resource_type: def.resource.clone(),
        manager,
        actions,
    })
}

/// Per-action summary within a policy run.
#[derive(Debug, Serialize)]
pub struct ActionReport {
    pub action: String,
    pub processed: usize,
    pub failed: usize,
}

/// Summary of one executed policy.
#[derive(Debug, Serialize)]
pub struct PolicyReport {
    pub policy: String,
    pub resource_type: String,
    pub matched: usize,
    pub actions: Vec<ActionReport>,
}

impl PolicyReport {
    /// Whether any action batch had unit failures.
    pub fn degraded(&self) -> bool {
        self.actions.iter().any(|a| a.failed > 0)
    }
}

/// Execute one compiled policy: fetch and filter resources, then run the
/// action chain over the survivors. Action unit failures degrade the
/// report; they do not abort the run.
///
/// `max_workers`, when set, overrides every action's preferred fan-out.
pub async fn run_policy(
    ctx: &PolicyContext,
    policy: &CompiledPolicy,
    max_workers: Option<usize>,
) -> Result<(PolicyReport, Vec<Record>), EngineError> {
    tracing::info!(
        "policy {}: evaluating {} resources in {}",
        policy.name,
        policy.resource_type,
        ctx.region()
    );
    let matched = policy.manager.resources(ctx).await?;
    tracing::info!("policy {}: {} resources matched", policy.name, matched.len());

    let mut action_reports = Vec::new();
    let mut current = matched.clone();
    for (name, action) in &policy.actions {
        if current.is_empty() {
            tracing::info!("policy {}: no resources, skipping '{}'", policy.name, name);
            break;
        }
        let pool = WorkerPool::new(max_workers.unwrap_or_else(|| action.max_workers()));
        let submitted = current.len();
        let outcome = action.process(ctx, &pool, current).await?;
        if outcome.degraded() {
            tracing::warn!(
                "policy {}: action '{}' completed with {} unit failures",
                policy.name,
                name,
                outcome.failures.len()
            );
        }
        action_reports.push(ActionReport {
            action: name.clone(),
            processed: submitted,
            failed: outcome.failures.len(),
        });
        // Actions may return (possibly annotated) records for chaining.
        current = outcome.records;
    }

    let report = PolicyReport {
        policy: policy.name.clone(),
        resource_type: policy.resource_type.clone(),
        matched: matched.len(),
        actions: action_reports,
    };
    Ok((report, matched))
}
