//! One reconciliation pass for one WorkerCluster.
//!
//! The pass is strictly sequential: fetch the cluster, build and owner-link the
//! Deployment, make sure it exists, list its pods, write the status. The first
//! failure aborts the pass and is returned as-is; whatever was already written
//! stays and is picked up idempotently by the next pass. Same-key passes are
//! serialized by the caller, so nothing here locks.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info, instrument};

use crate::builder::{build_deployment, recorded_hash, ControlPlaneSettings, TEMPLATE_HASH_ANNOTATION};
use crate::config::{DriftPolicy, OperatorConfig};
use crate::crd::ObjectKey;
use crate::error::Result;
use crate::owner::link_owner;
use crate::status::{aggregate, FixedPoolSize, PoolSizeProbe};
use crate::store::ObjectStore;

/// Result of a successful pass. The engine never asks for a periodic resync; the
/// watch on the cluster and its Deployment re-triggers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    pub fn done() -> Self { Self { requeue_after: None } }
}

pub struct Reconciler<S> {
    store: S,
    settings: ControlPlaneSettings,
    drift_policy: DriftPolicy,
    probe: Arc<dyn PoolSizeProbe>,
}

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(store: S, config: &OperatorConfig) -> Self {
        Self {
            store,
            settings: config.control_plane.clone(),
            drift_policy: config.drift_policy,
            probe: Arc::new(FixedPoolSize::default()),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn PoolSizeProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn store(&self) -> &S { &self.store }

    #[instrument(name = "reconcile", skip(self, key), fields(key = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        debug!("reconcile.start");
        let mut cluster = match self.store.get_cluster(key).await {
            Ok(c) => c,
            Err(e) if e.is_not_found() => {
                // Deleted after the trigger fired; owner references clean up the Deployment.
                debug!("reconcile.cluster_gone");
                return Ok(ReconcileOutcome::done());
            }
            Err(e) => return Err(e.into()),
        };

        let mut desired = build_deployment(&cluster, &self.settings)?;
        link_owner(&cluster, &mut desired)?;
        let child = self.ensure_deployment(key, desired).await?;

        let match_labels = child
            .spec
            .as_ref()
            .and_then(|s| s.selector.match_labels.clone())
            .unwrap_or_default();
        let pods = self.store.list_pods(&key.namespace, &match_labels).await?;

        let status = aggregate(&pods, self.probe.as_ref());
        let workers = status.worker_statuses.len();
        cluster.status = Some(status);
        self.store.update_status(&cluster).await?;

        info!(workers, "reconcile.finished");
        Ok(ReconcileOutcome::done())
    }

    async fn ensure_deployment(&self, key: &ObjectKey, desired: Deployment) -> Result<Deployment> {
        match self.store.get_deployment(key).await {
            Ok(found) => self.handle_existing(found, desired).await,
            Err(e) if e.is_not_found() => {
                info!(deployment=%key, "deployment.create");
                match self.store.create_deployment(&desired).await {
                    Ok(created) => Ok(created),
                    Err(e) if e.is_already_exists() => {
                        // Lost a create race; the winner's object is the one to observe.
                        debug!(deployment=%key, "deployment.create.already_exists");
                        Ok(self.store.get_deployment(key).await?)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// An existing Deployment is only rewritten under `DriftPolicy::Replace` and only
    /// when its recorded hash differs from the freshly built one.
    async fn handle_existing(&self, found: Deployment, desired: Deployment) -> Result<Deployment> {
        let want = recorded_hash(&desired).map(str::to_owned);
        let have = recorded_hash(&found).map(str::to_owned);
        if want == have {
            return Ok(found);
        }
        match self.drift_policy {
            DriftPolicy::Ignore => {
                info!(recorded=?have, desired=?want, "deployment.drift.ignored");
                Ok(found)
            }
            DriftPolicy::Replace => {
                let mut updated = found;
                if let Some(desired_spec) = desired.spec {
                    // selector is immutable on apps/v1 Deployments; keep the stored one.
                    let spec = updated.spec.get_or_insert_with(|| desired_spec.clone());
                    spec.template = desired_spec.template;
                    spec.strategy = desired_spec.strategy;
                }
                if let Some(hash) = want {
                    updated.metadata.annotations.get_or_insert_with(Default::default).insert(TEMPLATE_HASH_ANNOTATION.to_string(), hash);
                }
                info!(recorded=?have, "deployment.drift.replace");
                Ok(self.store.replace_deployment(&updated).await?)
            }
        }
    }
}
