//! Operator for `WorkerCluster` resources: derives one Deployment per cluster and
//! publishes a per-worker pool status back onto the cluster.

pub mod builder;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod logging;
pub mod owner;
pub mod reconciler;
pub mod status;
pub mod store;
pub mod test_support;

pub use crd::{ObjectKey, WorkerCluster, WorkerClusterSpec, WorkerClusterStatus, WorkerStatus};
pub use error::{Error, Result};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use store::{KubeStore, ObjectStore, StoreError};
