//! Object-store seam. The reconciler only ever talks to an [`ObjectStore`]; the
//! production implementation is [`KubeStore`], tests use
//! [`crate::test_support::InMemoryStore`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use thiserror::Error;

use crate::crd::{ObjectKey, WorkerCluster};

pub const FIELD_MANAGER: &str = "worker-operator";

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },
    #[error("{kind} {key} was modified concurrently")]
    Conflict { kind: &'static str, key: ObjectKey },
    #[error("{kind} request failed: {source}")]
    Transient { kind: &'static str, #[source] source: BoxError },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
    pub fn is_already_exists(&self) -> bool { matches!(self, Self::AlreadyExists { .. }) }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Conflict { .. } => "conflict",
            Self::Transient { .. } => "transient",
        }
    }

    pub fn transient(kind: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Transient { kind, source: source.into() }
    }

    /// Classify an API error the same way for every call site: 404 is absence,
    /// 409 is either a lost create race or a stale write, anything else is retryable.
    pub fn from_kube(kind: &'static str, key: &ObjectKey, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound { kind, key: key.clone() },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => Self::AlreadyExists { kind, key: key.clone() },
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict { kind, key: key.clone() },
            other => Self::transient(kind, other),
        }
    }
}

/// CRUD over the three kinds the engine touches, keyed by namespace + name.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_cluster(&self, key: &ObjectKey) -> Result<WorkerCluster, StoreError>;
    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment, StoreError>;
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError>;
    /// Full replace; the passed object must carry the resourceVersion it was read at.
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError>;
    async fn list_pods(&self, namespace: &str, match_labels: &BTreeMap<String, String>) -> Result<Vec<Pod>, StoreError>;
    /// Overwrite the status subresource. Fails with `Conflict` if the cluster
    /// changed since `cluster.metadata.resourceVersion`.
    async fn update_status(&self, cluster: &WorkerCluster) -> Result<WorkerCluster, StoreError>;
}

/// Render `matchLabels` as a label selector query (`a=b,c=d`). Empty matches everything.
pub fn selector_string(match_labels: &BTreeMap<String, String>) -> String {
    match_labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

#[derive(Clone)]
pub struct KubeStore { client: Client }

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    fn post_params() -> PostParams {
        PostParams { field_manager: Some(FIELD_MANAGER.to_string()), ..PostParams::default() }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_cluster(&self, key: &ObjectKey) -> Result<WorkerCluster, StoreError> {
        let api: Api<WorkerCluster> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name).await.map_err(|e| StoreError::from_kube("WorkerCluster", key, e))
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment, StoreError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name).await.map_err(|e| StoreError::from_kube("Deployment", key, e))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let key = ObjectKey::of(deployment);
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);
        api.create(&Self::post_params(), deployment).await.map_err(|e| StoreError::from_kube("Deployment", &key, e))
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let key = ObjectKey::of(deployment);
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);
        api.replace(&key.name, &Self::post_params(), deployment).await.map_err(|e| StoreError::from_kube("Deployment", &key, e))
    }

    async fn list_pods(&self, namespace: &str, match_labels: &BTreeMap<String, String>) -> Result<Vec<Pod>, StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&selector_string(match_labels));
        let list = api.list(&lp).await.map_err(|e| StoreError::transient("Pod", e))?;
        Ok(list.items)
    }

    async fn update_status(&self, cluster: &WorkerCluster) -> Result<WorkerCluster, StoreError> {
        let key = ObjectKey::of(cluster);
        let api: Api<WorkerCluster> = Api::namespaced(self.client.clone(), &key.namespace);
        // resourceVersion in a merge patch turns the write into a compare-and-swap;
        // the status list is an array so merge semantics replace it whole.
        let patch = json!({
            "metadata": { "resourceVersion": cluster.resource_version() },
            "status": cluster.status.clone().unwrap_or_default(),
        });
        let pp = PatchParams { field_manager: Some(FIELD_MANAGER.to_string()), ..PatchParams::default() };
        api.patch_status(&key.name, &pp, &Patch::Merge(&patch)).await.map_err(|e| StoreError::from_kube("WorkerCluster", &key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: "m".into(), reason: reason.into(), code })
    }

    #[test]
    fn classifies_api_errors() {
        let key = ObjectKey::new("ns", "x");
        assert!(StoreError::from_kube("Deployment", &key, api_err(404, "NotFound")).is_not_found());
        assert!(StoreError::from_kube("Deployment", &key, api_err(409, "AlreadyExists")).is_already_exists());
        assert_eq!(StoreError::from_kube("Deployment", &key, api_err(409, "Conflict")).kind(), "conflict");
        assert_eq!(StoreError::from_kube("Deployment", &key, api_err(503, "ServiceUnavailable")).kind(), "transient");
    }

    #[test]
    fn selector_string_is_sorted_and_joined() {
        let labels: BTreeMap<String, String> = [("tier".to_string(), "worker".to_string()), ("app".to_string(), "travis".to_string())].into();
        assert_eq!(selector_string(&labels), "app=travis,tier=worker");
        assert_eq!(selector_string(&BTreeMap::new()), "");
    }
}
