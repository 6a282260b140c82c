//! Filter engine
//!
//! Filters are independent unary predicates over resource records; chaining
//! them is AND composition and belongs to the resource manager, not the
//! filters themselves. Each resource type owns a filter registry seeded
//! with the core variants (`value` and the boolean composites) plus
//! whatever type-specific filters it registers.
//!
//! # Module Structure
//!
//! - [`value`] - The declarative value-matching language
//! - [`age`] - Age-threshold filter over a per-type date attribute

use crate::error::EngineError;
use crate::registry::Registry;
use crate::resource::{PolicyContext, Record};
use crate::schema::{FieldSpec, Schema};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub mod age;
pub mod value;

pub use value::ValueFilter;

/// A compiled, shareable filter instance.
pub type ArcFilter = Arc<dyn Filter>;

/// A predicate over resource records.
///
/// `process` returns the subset of `resources` that match. Filters may
/// mutate records in place to attach annotations (cached API lookups,
/// sub-resource lists) for later filters and reporting. A filter that
/// cannot resolve the API data it needs must propagate the error; a
/// silent non-match would hide missed compliance.
#[async_trait]
pub trait Filter: Send + Sync + std::fmt::Debug {
    async fn process(
        &self,
        ctx: &PolicyContext,
        resources: Vec<Record>,
    ) -> Result<Vec<Record>, EngineError>;
}

/// Builds a filter instance from its validated configuration block.
pub type FilterBuilder =
    Box<dyn Fn(&FilterRegistry, &Value) -> Result<ArcFilter, EngineError> + Send + Sync>;

/// Registry entry for one filter variant: its schema plus a build function.
pub struct FilterEntry {
    pub schema: Schema,
    pub build: FilterBuilder,
}

impl std::fmt::Debug for FilterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEntry")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Per-resource-type filter registry.
pub type FilterRegistry = Registry<FilterEntry>;

/// Validate a config block against its variant's schema and build the
/// filter. This is the one place schema validation runs; constructors
/// downstream assume well-formed input.
pub fn compile_filter(registry: &FilterRegistry, config: &Value) -> Result<ArcFilter, EngineError> {
    let type_key = config
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Policy("filter block is missing 'type'".to_string()))?;
    let entry = registry.get(type_key)?;
    entry.schema.validate(config)?;
    (entry.build)(registry, config)
}

/// Compile an ordered filter chain.
pub fn compile_filters(
    registry: &FilterRegistry,
    configs: &[Value],
) -> Result<Vec<ArcFilter>, EngineError> {
    configs.iter().map(|c| compile_filter(registry, c)).collect()
}

/// Seed a registry with the core variants every resource type gets:
/// `value` and the boolean composites.
pub fn register_core(registry: &mut FilterRegistry) {
    registry
        .register(
            "value",
            FilterEntry {
                schema: ValueFilter::schema(),
                build: Box::new(value::build),
            },
        )
        .expect("core filter registration");
    for mode in [BoolMode::And, BoolMode::Or, BoolMode::Not] {
        registry
            .register(mode.type_key(), boolean_entry(mode))
            .expect("core filter registration");
    }
}

/// Boolean composition over child filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoolMode {
    And,
    Or,
    Not,
}

impl BoolMode {
    fn type_key(self) -> &'static str {
        match self {
            BoolMode::And => "and",
            BoolMode::Or => "or",
            BoolMode::Not => "not",
        }
    }
}

#[derive(Debug)]
struct BooleanFilter {
    mode: BoolMode,
    children: Vec<ArcFilter>,
}

#[async_trait]
impl Filter for BooleanFilter {
    async fn process(
        &self,
        ctx: &PolicyContext,
        resources: Vec<Record>,
    ) -> Result<Vec<Record>, EngineError> {
        match self.mode {
            BoolMode::And => {
                let mut remaining = resources;
                for child in &self.children {
                    if remaining.is_empty() {
                        break;
                    }
                    remaining = child.process(ctx, remaining).await?;
                }
                Ok(remaining)
            }
            BoolMode::Or => {
                // Union of the children's matches, preserving input order.
                let mut matched: Vec<Record> = Vec::new();
                for child in &self.children {
                    for record in child.process(ctx, resources.clone()).await? {
                        if !matched.contains(&record) {
                            matched.push(record);
                        }
                    }
                }
                Ok(resources.into_iter().filter(|r| matched.contains(r)).collect())
            }
            BoolMode::Not => {
                let mut matched = resources.clone();
                for child in &self.children {
                    if matched.is_empty() {
                        break;
                    }
                    matched = child.process(ctx, matched).await?;
                }
                Ok(resources.into_iter().filter(|r| !matched.contains(r)).collect())
            }
        }
    }
}

fn boolean_entry(mode: BoolMode) -> FilterEntry {
    FilterEntry {
        schema: Schema::new(mode.type_key())
            .field("filters", FieldSpec::Any)
            .required("filters"),
        build: Box::new(move |registry: &FilterRegistry, config: &Value| {
            let blocks = config
                .get("filters")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    EngineError::invalid(mode.type_key(), "'filters' must be a list of filter blocks")
                })?;
            let children = compile_filters(registry, blocks)?;
            Ok(Arc::new(BooleanFilter { mode, children }) as ArcFilter)
        }),
    }
}
