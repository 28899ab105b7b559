//! Reconciliation logic for bare-metal cluster nodes.
//!
//! This module is organized by lifecycle operation:
//! - `create`: provision storage, compute and addresses for a new node
//! - `read`: discover the observed node configuration
//! - `update`: apply desired-state changes in dependency order
//! - `delete`: decommission a node, continuing past individual failures
//! - `harvester`: the same lifecycle for self-installing Harvester hosts

pub mod create;
pub mod delete;
pub mod harvester;
pub mod read;
pub mod update;

use crate::context::EngineContext;
use crate::error::EngineError;
use node_config::{ChangeFlags, NodeConfig, NodeSpec};
use std::future::Future;
use std::sync::Arc;
use tracing::{Instrument, info_span};
use uuid::Uuid;

/// Result of an update pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Observed configuration after the update, `None` if the node is gone
    pub config: Option<NodeConfig>,
    /// Change classes the update applied
    pub changes: ChangeFlags,
}

/// Reconciles node resources against the fabric and the cluster.
#[derive(Clone)]
pub struct Reconciler {
    pub(crate) ctx: Arc<EngineContext>,
}

impl Reconciler {
    #[must_use]
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Provision a new node
    ///
    /// # Errors
    ///
    /// Fails when the node already exists, any preflight check fails, or a
    /// provisioning step fails. Storage created before the failure is
    /// removed again.
    pub async fn create(&self, spec: &NodeSpec) -> Result<NodeConfig, EngineError> {
        traced("create", spec, self.create_node(spec)).await
    }

    /// Observed configuration, or `None` if the server or its boot storage
    /// no longer exists
    ///
    /// # Errors
    ///
    /// Returns the discovery failure.
    pub async fn read(&self, spec: &NodeSpec) -> Result<Option<NodeConfig>, EngineError> {
        traced("read", spec, self.read_node(spec)).await
    }

    /// Adopt an existing node; same as [`Reconciler::read`]
    ///
    /// # Errors
    ///
    /// Returns the discovery failure.
    pub async fn import(&self, spec: &NodeSpec) -> Result<Option<NodeConfig>, EngineError> {
        traced("import", spec, self.read_node(spec)).await
    }

    /// Move the node from `old` to `new`
    ///
    /// One-shot requests in `new` (restore, forced storage update) are
    /// cleared once handled so the caller can persist them as done.
    ///
    /// # Errors
    ///
    /// Returns the first failing phase; later phases are not run.
    pub async fn update(&self, old: &NodeSpec, new: &mut NodeSpec) -> Result<UpdateOutcome, EngineError> {
        let span = operation_span("update", new.hostname());
        self.update_node(old, new).instrument(span).await
    }

    /// Decommission the node
    ///
    /// # Errors
    ///
    /// Refuses a powered-on node with safe removal set. Otherwise every
    /// step runs and the failures are returned together.
    pub async fn delete(&self, spec: &NodeSpec) -> Result<(), EngineError> {
        traced("delete", spec, self.delete_node(spec)).await
    }
}

fn operation_span(operation: &str, hostname: &str) -> tracing::Span {
    info_span!("node", operation, hostname, operation_id = %Uuid::new_v4())
}

async fn traced<T>(
    operation: &str,
    spec: &NodeSpec,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    fut.instrument(operation_span(operation, spec.hostname())).await
}
