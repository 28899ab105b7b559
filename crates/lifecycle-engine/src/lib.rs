//! Node lifecycle engine
//!
//! Creates, reads, updates and deletes bare-metal cluster nodes across the
//! compute fabric, the storage controller, IPAM and the cluster orchestrator.
//!
//! # Example
//!
//! ```no_run
//! use lifecycle_engine::{EngineContext, Reconciler};
//! use node_config::{NodeSpec, ProviderConfig};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     compute: Arc<dyn fabric_clients::ComputeClient>,
//! #     storage: Arc<dyn fabric_clients::StorageClient>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! lifecycle_engine::init_tracing();
//! let provider = ProviderConfig::from_env()?;
//! let ctx = EngineContext::with_defaults(provider, compute, storage)?;
//! let reconciler = Reconciler::new(Arc::new(ctx));
//!
//! let spec = NodeSpec::parse(&std::fs::read_to_string("node.yaml")?)?;
//! let config = reconciler.create(&spec).await?;
//! println!("{}", config.to_yaml()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Reconciler**: create, read/import, ordered update and aggregated delete
//! - **Update gate**: optional poison lock serializing updates across nodes
//! - **Consistent snapshots**: filesystem freeze over SSH around the snapshot
//! - **Repositories**: image and seed template upload, listing and sync

pub mod context;
pub mod error;
pub mod fsfreeze;
pub mod gate;
pub mod reconcile_helpers;
pub mod reconciler;
pub mod repo;
pub mod telemetry;
pub mod wait;

#[cfg(test)]
mod test_utils;

pub use context::{ApiClusterConnector, ClusterConnector, EngineContext};
pub use error::EngineError;
pub use gate::{GateGuard, UpdateGate};
pub use reconciler::{Reconciler, UpdateOutcome};
pub use repo::{RepoManager, RepoSync};
pub use telemetry::init_tracing;

#[cfg(any(test, feature = "test-util"))]
pub use context::MockConnector;
