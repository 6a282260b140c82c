//! Generic describe/paginate query helper
//!
//! Most resource types are fetched the same way: call one list/describe
//! operation, pull the item array out of the response, and follow the
//! pagination marker until the provider stops returning one. Managers
//! declare the varying parts in a [`QuerySpec`] and share this loop.

use super::{PolicyContext, Record};
use crate::error::EngineError;
use serde_json::{Map, Value};

/// The describe/list shape of one resource type.
#[derive(Debug, Clone, Copy)]
pub struct QuerySpec {
    /// Provider service, e.g. `rds`.
    pub service: &'static str,
    /// List operation, e.g. `DescribeDBClusters`.
    pub op: &'static str,
    /// Response key holding the item array, e.g. `DBClusters`.
    pub items_key: &'static str,
    /// Request/response key carrying the pagination marker.
    pub token_key: &'static str,
    /// Field identifying one resource, e.g. `DBClusterIdentifier`.
    pub id_field: &'static str,
}

/// Fetch every page of `spec`'s list operation. Pagination is exhausted
/// here, before any filtering happens.
pub async fn query_all(ctx: &PolicyContext, spec: &QuerySpec) -> Result<Vec<Record>, EngineError> {
    let client = ctx.client(spec.service)?;
    let mut records = Vec::new();
    let mut marker: Option<String> = None;

    loop {
        let mut params = Map::new();
        if let Some(token) = &marker {
            params.insert(spec.token_key.to_string(), Value::String(token.clone()));
        }

        let response = client.call(spec.op, Value::Object(params)).await?;

        if let Some(items) = response.get(spec.items_key).and_then(Value::as_array) {
            records.extend(items.iter().cloned().filter_map(Record::from_value));
        }

        marker = response
            .get(spec.token_key)
            .and_then(Value::as_str)
            .map(|s| s.to_string());
        if marker.is_none() {
            break;
        }
    }

    tracing::debug!("{}.{}: {} items", spec.service, spec.op, records.len());
    Ok(records)
}
