//! Wires the reconciler into `kube_runtime::Controller`, which watches clusters and
//! their owned Deployments, dedupes triggers per key and runs at most one pass per
//! key at a time.

use std::sync::Arc;

use anyhow::Context as _;
use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::ListParams;
use kube::{Api, Client};
use kube_runtime::controller::{Action, Controller};
use kube_runtime::watcher::Config;
use tracing::{debug, info, warn};

use crate::config::OperatorConfig;
use crate::crd::{ObjectKey, WorkerCluster};
use crate::error::Error;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::KubeStore;

pub struct Context {
    pub reconciler: Reconciler<KubeStore>,
    pub config: OperatorConfig,
}

async fn reconcile(obj: Arc<WorkerCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectKey::of(obj.as_ref());
    let limit = ctx.config.reconcile_timeout;
    // Dropping the pass on timeout is safe: the owner reference is set before create.
    let outcome = tokio::time::timeout(limit, ctx.reconciler.reconcile(&key)).await.map_err(|_| Error::Timeout(limit))??;
    Ok(to_action(outcome))
}

fn error_policy(obj: Arc<WorkerCluster>, err: &Error, ctx: Arc<Context>) -> Action {
    warn!(key=%ObjectKey::of(obj.as_ref()), error=%err, kind=err.kind(), "reconcile.failed");
    Action::requeue(ctx.config.error_requeue)
}

pub fn to_action(outcome: ReconcileOutcome) -> Action {
    match outcome.requeue_after {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    }
}

/// Run until SIGINT/SIGTERM.
pub async fn run(client: Client, config: OperatorConfig) -> anyhow::Result<()> {
    let (clusters, deployments): (Api<WorkerCluster>, Api<Deployment>) = match &config.namespace {
        Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client.clone(), ns)),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };
    clusters
        .list(&ListParams::default().limit(1))
        .await
        .context("WorkerCluster CRD not reachable; install it with `crd-gen | kubectl apply -f -`")?;

    let ctx = Arc::new(Context { reconciler: Reconciler::new(KubeStore::new(client), &config), config });
    info!(namespace=?ctx.config.namespace, drift_policy=?ctx.config.drift_policy, "controller.starting");
    Controller::new(clusters, Config::default())
        .owns(deployments, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(object=%obj, "controller.reconciled"),
                Err(e) => warn!(error=%e, "controller.error"),
            }
        })
        .await;
    info!("controller.stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn outcome_maps_to_action() {
        assert_eq!(to_action(ReconcileOutcome::done()), Action::await_change());
        let after = Duration::from_secs(5);
        assert_eq!(to_action(ReconcileOutcome { requeue_after: Some(after) }), Action::requeue(after));
    }
}
