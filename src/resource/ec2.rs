//! EC2 instances
//!
//! A thin resource type: instances arrive nested inside reservations, so
//! fetch flattens `Reservations[].Instances[]` into one record list. The
//! account quota filter manufactures this manager to count live instances.

use super::query::{query_all, QuerySpec};
use super::{ManagerEntry, PolicyContext, Record, ResourceManager};
use crate::actions::ActionRegistry;
use crate::error::EngineError;
use crate::filters::{compile_filters, register_core, ArcFilter, FilterRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::OnceLock;

const SPEC: QuerySpec = QuerySpec {
    service: "ec2",
    op: "DescribeInstances",
    items_key: "Reservations",
    token_key: "NextToken",
    id_field: "InstanceId",
};

/// The `ec2` filter registry.
pub fn filters() -> &'static FilterRegistry {
    static REG: OnceLock<FilterRegistry> = OnceLock::new();
    REG.get_or_init(|| {
        let mut reg = FilterRegistry::new("ec2.filters");
        register_core(&mut reg);
        reg.register("age", crate::filters::age::entry("LaunchTime"))
            .expect("filter registration");
        reg
    })
}

/// The `ec2` action registry.
pub fn actions() -> &'static ActionRegistry {
    static REG: OnceLock<ActionRegistry> = OnceLock::new();
    REG.get_or_init(|| ActionRegistry::new("ec2.actions"))
}

#[derive(Debug)]
struct Ec2Manager {
    filters: Vec<ArcFilter>,
}

#[async_trait]
impl ResourceManager for Ec2Manager {
    fn type_name(&self) -> &'static str {
        "ec2"
    }

    async fn fetch(&self, ctx: &PolicyContext) -> Result<Vec<Record>, EngineError> {
        let reservations = query_all(ctx, &SPEC).await?;
        let mut instances = Vec::new();
        for reservation in reservations {
            if let Some(items) = reservation.get("Instances").and_then(Value::as_array) {
                instances.extend(items.iter().cloned().filter_map(Record::from_value));
            }
        }
        Ok(instances)
    }

    fn filters(&self) -> &[ArcFilter] {
        &self.filters
    }
}

/// Registry entry for the `ec2` resource type.
pub fn entry() -> ManagerEntry {
    ManagerEntry {
        build: |configs| {
            Ok(Box::new(Ec2Manager {
                filters: compile_filters(filters(), configs)?,
            }))
        },
        filter_registry: filters,
        action_registry: actions,
    }
}
