//! RDS clusters and cluster snapshots
//!
//! Two resource types share this module the way they share a provider
//! service: `rds-cluster` carries the remediation actions (delete,
//! retention, snapshot) and `rds-cluster-snapshot` carries the age filter
//! and the chunked bulk delete used for snapshot cleanup.

use super::query::{query_all, QuerySpec};
use super::{ManagerEntry, PolicyContext, Record, ResourceManager};
use crate::actions::{
    reverse_chunks, snapshot_identifier, Action, ActionEntry, ActionOutcome, ActionRegistry,
};
use crate::error::EngineError;
use crate::executor::WorkerPool;
use crate::filters::{compile_filters, register_core, ArcFilter, FilterRegistry};
use crate::schema::{FieldSpec, Schema};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};

const CLUSTER_SPEC: QuerySpec = QuerySpec {
    service: "rds",
    op: "DescribeDBClusters",
    items_key: "DBClusters",
    token_key: "Marker",
    id_field: "DBClusterIdentifier",
};

const SNAPSHOT_SPEC: QuerySpec = QuerySpec {
    service: "rds",
    op: "DescribeDBClusterSnapshots",
    items_key: "DBClusterSnapshots",
    token_key: "Marker",
    id_field: "DBClusterSnapshotIdentifier",
};

/// Snapshot cleanup deletes in fixed-size chunks, newest first.
const DELETE_CHUNK_SIZE: usize = 50;

fn cluster_id(record: &Record) -> Result<&str, EngineError> {
    record
        .get_str("DBClusterIdentifier")
        .ok_or_else(|| EngineError::Policy("cluster record has no DBClusterIdentifier".to_string()))
}

// =============================================================================
// rds-cluster
// =============================================================================

/// The `rds-cluster` filter registry.
pub fn cluster_filters() -> &'static FilterRegistry {
    static REG: OnceLock<FilterRegistry> = OnceLock::new();
    REG.get_or_init(|| {
        let mut reg = FilterRegistry::new("rds-cluster.filters");
        register_core(&mut reg);
        reg.register("age", crate::filters::age::entry("ClusterCreateTime"))
            .expect("filter registration");
        reg
    })
}

/// The `rds-cluster` action registry.
pub fn cluster_actions() -> &'static ActionRegistry {
    static REG: OnceLock<ActionRegistry> = OnceLock::new();
    REG.get_or_init(|| {
        let mut reg = ActionRegistry::new("rds-cluster.actions");
        reg.register(
            "delete",
            ActionEntry {
                schema: Schema::new("delete").field("skip-snapshot", FieldSpec::Boolean),
                build: Box::new(|config: &Value| {
                    Ok(Arc::new(DeleteCluster {
                        skip_snapshot: config
                            .get("skip-snapshot")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    }) as Arc<dyn Action>)
                }),
            },
        )
        .expect("action registration");
        reg.register(
            "retention",
            ActionEntry {
                schema: Schema::new("retention")
                    .field("days", FieldSpec::Number)
                    .required("days"),
                build: Box::new(|config: &Value| {
                    let days = config.get("days").and_then(Value::as_i64).ok_or_else(|| {
                        EngineError::invalid("retention", "requires an integer 'days'")
                    })?;
                    Ok(Arc::new(RetentionWindow { days }) as Arc<dyn Action>)
                }),
            },
        )
        .expect("action registration");
        reg.register(
            "snapshot",
            ActionEntry {
                schema: Schema::new("snapshot"),
                build: Box::new(|_config: &Value| Ok(Arc::new(SnapshotCluster) as Arc<dyn Action>)),
            },
        )
        .expect("action registration");
        reg
    })
}

#[derive(Debug)]
struct ClusterManager {
    filters: Vec<ArcFilter>,
}

#[async_trait]
impl ResourceManager for ClusterManager {
    fn type_name(&self) -> &'static str {
        "rds-cluster"
    }

    async fn fetch(&self, ctx: &PolicyContext) -> Result<Vec<Record>, EngineError> {
        query_all(ctx, &CLUSTER_SPEC).await
    }

    fn filters(&self) -> &[ArcFilter] {
        &self.filters
    }
}

/// Registry entry for the `rds-cluster` resource type.
pub fn cluster_entry() -> ManagerEntry {
    ManagerEntry {
        build: |configs| {
            Ok(Box::new(ClusterManager {
                filters: compile_filters(cluster_filters(), configs)?,
            }))
        },
        filter_registry: cluster_filters,
        action_registry: cluster_actions,
    }
}

/// Delete matched clusters, taking a final snapshot unless told to skip.
///
/// Idempotent: a cluster already out of a deletable state is skipped, any
/// other provider error is captured as a unit failure and the loop moves
/// on to the next cluster.
#[derive(Debug)]
struct DeleteCluster {
    skip_snapshot: bool,
}

#[async_trait]
impl Action for DeleteCluster {
    fn max_workers(&self) -> usize {
        1
    }

    async fn process(
        &self,
        ctx: &PolicyContext,
        _pool: &WorkerPool,
        resources: Vec<Record>,
    ) -> Result<ActionOutcome, EngineError> {
        let client = ctx.client("rds")?;
        let mut failures = Vec::new();

        for cluster in &resources {
            let id = match cluster_id(cluster) {
                Ok(id) => id,
                Err(err) => {
                    failures.push(err);
                    continue;
                }
            };
            let mut params = json!({ "DBClusterIdentifier": id });
            if self.skip_snapshot {
                params["SkipFinalSnapshot"] = Value::Bool(true);
            } else {
                params["FinalDBSnapshotIdentifier"] =
                    Value::String(snapshot_identifier("final", id));
            }

            match client.call("DeleteDBCluster", params).await {
                Ok(_) => tracing::info!("deleted RDS cluster: {}", id),
                Err(err) if err.code() == "InvalidDBClusterStateFault" => {
                    tracing::debug!("cluster {} not in a deletable state, skipping", id);
                }
                Err(err) => failures.push(err.into()),
            }
        }

        Ok(ActionOutcome {
            records: resources,
            failures,
        })
    }
}

/// Raise the backup retention window, never lower it.
///
/// A cluster already at or above the requested retention gets no API
/// call. The modify call carries the cluster's existing backup and
/// maintenance windows so they survive the change.
#[derive(Debug)]
struct RetentionWindow {
    days: i64,
}

#[async_trait]
impl Action for RetentionWindow {
    fn max_workers(&self) -> usize {
        2
    }

    async fn process(
        &self,
        ctx: &PolicyContext,
        pool: &WorkerPool,
        resources: Vec<Record>,
    ) -> Result<ActionOutcome, EngineError> {
        let client = ctx.client("rds")?;
        let days = self.days;

        let units: Vec<_> = resources
            .iter()
            .cloned()
            .map(|cluster| {
                let client = Arc::clone(&client);
                async move {
                    let id = cluster_id(&cluster)?.to_string();
                    let current = cluster
                        .get("BackupRetentionPeriod")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    if current >= days {
                        return Ok(());
                    }

                    let mut params = json!({
                        "DBClusterIdentifier": id,
                        "BackupRetentionPeriod": days,
                    });
                    for window in ["PreferredBackupWindow", "PreferredMaintenanceWindow"] {
                        if let Some(value) = cluster.get(window) {
                            params[window] = value.clone();
                        }
                    }
                    client.call("ModifyDBCluster", params).await?;
                    tracing::info!("raised retention on {} to {} days", id, days);
                    Ok(())
                }
            })
            .collect();

        let batch = pool.run("rds-cluster retention", units).await;
        Ok(ActionOutcome {
            records: resources,
            failures: batch.failures,
        })
    }
}

/// Fire-and-forget snapshot of every matched cluster.
#[derive(Debug)]
struct SnapshotCluster;

#[async_trait]
impl Action for SnapshotCluster {
    fn max_workers(&self) -> usize {
        3
    }

    async fn process(
        &self,
        ctx: &PolicyContext,
        pool: &WorkerPool,
        resources: Vec<Record>,
    ) -> Result<ActionOutcome, EngineError> {
        let client = ctx.client("rds")?;

        let units: Vec<_> = resources
            .iter()
            .cloned()
            .map(|cluster| {
                let client = Arc::clone(&client);
                async move {
                    let id = cluster_id(&cluster)?.to_string();
                    client
                        .call(
                            "CreateDBClusterSnapshot",
                            json!({
                                "DBClusterSnapshotIdentifier": snapshot_identifier("backup", &id),
                                "DBClusterIdentifier": id,
                            }),
                        )
                        .await?;
                    Ok(())
                }
            })
            .collect();

        let batch = pool.run("rds-cluster snapshot", units).await;
        Ok(ActionOutcome {
            records: resources,
            failures: batch.failures,
        })
    }
}

// =============================================================================
// rds-cluster-snapshot
// =============================================================================

/// The `rds-cluster-snapshot` filter registry.
pub fn snapshot_filters() -> &'static FilterRegistry {
    static REG: OnceLock<FilterRegistry> = OnceLock::new();
    REG.get_or_init(|| {
        let mut reg = FilterRegistry::new("rds-cluster-snapshot.filters");
        register_core(&mut reg);
        reg.register("age", crate::filters::age::entry("SnapshotCreateTime"))
            .expect("filter registration");
        reg
    })
}

/// The `rds-cluster-snapshot` action registry.
pub fn snapshot_actions() -> &'static ActionRegistry {
    static REG: OnceLock<ActionRegistry> = OnceLock::new();
    REG.get_or_init(|| {
        let mut reg = ActionRegistry::new("rds-cluster-snapshot.actions");
        reg.register(
            "delete",
            ActionEntry {
                schema: Schema::new("delete"),
                build: Box::new(|_config: &Value| {
                    Ok(Arc::new(DeleteClusterSnapshots) as Arc<dyn Action>)
                }),
            },
        )
        .expect("action registration");
        reg
    })
}

#[derive(Debug)]
struct SnapshotManager {
    filters: Vec<ArcFilter>,
}

#[async_trait]
impl ResourceManager for SnapshotManager {
    fn type_name(&self) -> &'static str {
        "rds-cluster-snapshot"
    }

    async fn fetch(&self, ctx: &PolicyContext) -> Result<Vec<Record>, EngineError> {
        query_all(ctx, &SNAPSHOT_SPEC).await
    }

    fn filters(&self) -> &[ArcFilter] {
        &self.filters
    }
}

/// Registry entry for the `rds-cluster-snapshot` resource type.
pub fn snapshot_entry() -> ManagerEntry {
    ManagerEntry {
        build: |configs| {
            Ok(Box::new(SnapshotManager {
                filters: compile_filters(snapshot_filters(), configs)?,
            }))
        },
        filter_registry: snapshot_filters,
        action_registry: snapshot_actions,
    }
}

/// Bulk snapshot delete: newest-first chunks of fifty, one chunk per
/// concurrent unit, deletes sequential within a chunk so the oldest
/// snapshots are the last ones touched. Already-gone snapshots are
/// skipped.
#[derive(Debug)]
struct DeleteClusterSnapshots;

#[async_trait]
impl Action for DeleteClusterSnapshots {
    fn max_workers(&self) -> usize {
        3
    }

    async fn process(
        &self,
        ctx: &PolicyContext,
        pool: &WorkerPool,
        resources: Vec<Record>,
    ) -> Result<ActionOutcome, EngineError> {
        tracing::info!("deleting {} RDS cluster snapshots", resources.len());
        let client = ctx.client("rds")?;

        let units: Vec<_> = reverse_chunks(resources.clone(), DELETE_CHUNK_SIZE)
            .into_iter()
            .map(|chunk| {
                let client = Arc::clone(&client);
                async move {
                    for snapshot in &chunk {
                        let id = snapshot.get_str("DBClusterSnapshotIdentifier").ok_or_else(
                            || {
                                EngineError::Policy(
                                    "snapshot record has no DBClusterSnapshotIdentifier"
                                        .to_string(),
                                )
                            },
                        )?;
                        match client
                            .call(
                                "DeleteDBClusterSnapshot",
                                json!({ "DBClusterSnapshotIdentifier": id }),
                            )
                            .await
                        {
                            Ok(_) => {}
                            Err(err) if err.code() == "DBClusterSnapshotNotFoundFault" => {
                                tracing::debug!("snapshot {} already gone", id);
                            }
                            Err(err) => return Err(err.into()),
                        }
                    }
                    Ok(chunk.len())
                }
            })
            .collect();

        let batch = pool.run("rds-cluster-snapshot delete", units).await;
        Ok(ActionOutcome {
            records: resources,
            failures: batch.failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::compile_action;

    #[test]
    fn cluster_registries_have_expected_keys() {
        assert!(cluster_filters().contains("value"));
        assert!(cluster_filters().contains("age"));
        assert_eq!(cluster_actions().keys(), vec!["delete", "retention", "snapshot"]);
        assert!(snapshot_filters().contains("age"));
        assert_eq!(snapshot_actions().keys(), vec!["delete"]);
    }

    #[test]
    fn retention_requires_days() {
        let err = compile_action(cluster_actions(), &json!({"type": "retention"})).unwrap_err();
        assert!(err.to_string().contains("missing required key 'days'"));

        let (name, action) =
            compile_action(cluster_actions(), &json!({"type": "retention", "days": 14})).unwrap();
        assert_eq!(name, "retention");
        assert_eq!(action.max_workers(), 2);
    }

    #[test]
    fn delete_accepts_skip_snapshot() {
        compile_action(
            cluster_actions(),
            &json!({"type": "delete", "skip-snapshot": true}),
        )
        .unwrap();
        let err = compile_action(
            cluster_actions(),
            &json!({"type": "delete", "skip-snapshot": "yes"}),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Schema { .. }));
    }

    #[test]
    fn snapshot_action_rejects_unknown_keys() {
        let err = compile_action(
            cluster_actions(),
            &json!({"type": "snapshot", "prefix": "x"}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown key 'prefix'"));
    }
}
