//! In-memory cluster doubles for unit testing
//!
//! - `node.rs` - scripted [`ClusterNode`](crate::ClusterNode) handle
//! - `node_api.rs` - Kubernetes node/pod store behind [`NodeApi`](crate::NodeApi)
//!
//! Both record into a shared `Arc<Mutex<Vec<String>>>` journal so calls can be
//! ordered against the fabric mocks.

mod node;
mod node_api;

pub use node::MockClusterNode;
pub use node_api::MockNodeApi;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
