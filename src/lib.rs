//! steward - a policy engine for cloud resources
//!
//! Policies are declarative YAML: per resource type, an ordered list of
//! filters selecting resources and an ordered list of actions remediating
//! them. The engine is the reusable part: string-keyed registries make
//! resource types, filters, and actions open for extension; a schema
//! validator rejects malformed blocks at load time; a bounded worker pool
//! fans actions out with partial-failure tolerance.
//!
//! # Architecture
//!
//! - [`registry`] - String-keyed extension tables, immutable after init
//! - [`schema`] - Declarative config validation with inheritance
//! - [`filters`] - The value-matching language and filter variants
//! - [`actions`] - Action variants and batch helpers
//! - [`executor`] - Bounded-concurrency worker pool
//! - [`resource`] - Records, managers, and the per-type instantiations
//! - [`provider`] - JSON-over-HTTP RPC client with typed errors
//! - [`policy`] - Policy file loading, compilation, execution

pub mod actions;
pub mod config;
pub mod error;
pub mod executor;
pub mod filters;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod schema;
