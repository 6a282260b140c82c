//! Provider API interaction module
//!
//! Everything the engine knows about the cloud provider's wire protocol
//! lives here: JSON-over-HTTP RPC calls, typed error extraction, and the
//! per-service client cache.
//!
//! # Module Structure
//!
//! - [`http`] - HTTP transport and provider error parsing
//! - [`client`] - Per-service API client
//! - [`session`] - Credentials and the per-service client cache
//!
//! # Example
//!
//! ```ignore
//! use steward::provider::session::{Credentials, SessionFactory};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let session = SessionFactory::new("us-east-1", Credentials::new("token"));
//!     let rds = session.client("rds")?;
//!     let clusters = rds.call("DescribeDBClusters", serde_json::json!({})).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod http;
pub mod session;

pub use client::ApiClient;
pub use session::{Credentials, SessionFactory};
