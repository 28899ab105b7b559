//! Cluster node drivers
//!
//! A [`ClusterNode`] handle wraps one node's membership in a container
//! orchestrator: role discovery, cordon/drain/uncordon, state waits, removal,
//! and label/taint reconciliation.
//!
//! # Example
//!
//! ```no_run
//! use cluster_node::connect_cluster_node;
//! use node_config::ClusterApiConfig;
//! use std::time::Duration;
//!
//! # async fn example(cfg: ClusterApiConfig) -> Result<(), cluster_node::ClusterError> {
//! let node = connect_cluster_node(Some(&cfg), "10.0.0.11", "node1", false).await?;
//! if node.is_worker() {
//!     node.node_cordon_drain().await?;
//!     node.node_uncordon().await?;
//!     node.node_wait_for_state(&["active"], Duration::from_secs(600)).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Drivers
//!
//! - **rancher2**: Rancher management API (`/v3`), node actions and cluster settle-down
//! - **rke / rke2**: downstream API server through `kube`
//! - **harvester**: hypervisor host maintenance mode
//! - **disabled**: no cluster API; every call succeeds without effect
//! - **Mocks** (`test-util`): scripted node handle and in-memory node API

pub mod connect;
pub mod disabled;
pub mod drain;
pub mod error;
pub mod harvester;
pub mod http;
pub mod kube_api;
pub mod kube_node;
pub mod metadata;
pub mod rancher2;
pub mod retry;
#[path = "trait.rs"]
pub mod cluster_trait;
pub mod wait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use cluster_trait::{ClusterNode, NodeRoles};
pub use connect::connect_cluster_node;
pub use disabled::DisabledNode;
pub use error::ClusterError;
pub use harvester::HarvesterNode;
pub use http::{Auth, RestClient, TlsOptions};
pub use kube_api::{KubeNodeApi, NodeApi};
pub use kube_node::{KubeFlavor, KubeNode};
pub use metadata::{discover_node, merge_taints, update_labels, update_taints};
pub use rancher2::Rancher2Node;
pub use retry::Retry;
pub use wait::StateWait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockClusterNode, MockNodeApi};
