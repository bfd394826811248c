//! In-memory [`ObjectStore`] for unit and integration tests.
//!
//! Behaves like the API server where the reconciler cares: resource versions
//! bump on every write, duplicate creates return `AlreadyExists`, stale status
//! writes return `Conflict`, and created Deployments get server-side defaults
//! filled in so "stored != built" is the normal case.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::crd::{ObjectKey, WorkerCluster};
use crate::store::{ObjectStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op { GetCluster, GetDeployment, CreateDeployment, ReplaceDeployment, ListPods, UpdateStatus }

/// A write the store accepted, for asserting what a pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write { Create(ObjectKey), Replace(ObjectKey), Status(ObjectKey) }

#[derive(Default)]
struct State {
    clusters: BTreeMap<ObjectKey, WorkerCluster>,
    deployments: BTreeMap<ObjectKey, Deployment>,
    pods: Vec<Pod>,
    writes: Vec<Write>,
    failures: HashMap<Op, String>,
    race_next_create: bool,
    next_version: u64,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn injected(&mut self, op: Op, kind: &'static str) -> Result<(), StoreError> {
        match self.failures.remove(&op) {
            Some(msg) => Err(StoreError::transient(kind, msg)),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct InMemoryStore { state: Mutex<State> }

impl InMemoryStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(|e| e.into_inner()) }

    /// Insert or overwrite a cluster, assigning a uid if it has none.
    pub fn put_cluster(&self, mut cluster: WorkerCluster) -> WorkerCluster {
        let mut st = self.lock();
        let key = ObjectKey::of(&cluster);
        if cluster.metadata.uid.is_none() { cluster.metadata.uid = Some(format!("uid-{}", key)); }
        cluster.metadata.resource_version = Some(st.bump());
        st.clusters.insert(key, cluster.clone());
        cluster
    }

    pub fn delete_cluster(&self, key: &ObjectKey) { self.lock().clusters.remove(key); }

    pub fn put_deployment(&self, mut deployment: Deployment) -> Deployment {
        let mut st = self.lock();
        deployment.metadata.resource_version = Some(st.bump());
        st.deployments.insert(ObjectKey::of(&deployment), deployment.clone());
        deployment
    }

    pub fn put_pod(&self, pod: Pod) { self.lock().pods.push(pod); }

    pub fn delete_pod(&self, namespace: &str, name: &str) {
        self.lock().pods.retain(|p| !(p.namespace().as_deref() == Some(namespace) && p.name_any() == name));
    }

    pub fn cluster(&self, key: &ObjectKey) -> Option<WorkerCluster> { self.lock().clusters.get(key).cloned() }
    pub fn deployment(&self, key: &ObjectKey) -> Option<Deployment> { self.lock().deployments.get(key).cloned() }
    pub fn deployment_count(&self) -> usize { self.lock().deployments.len() }
    pub fn writes(&self) -> Vec<Write> { self.lock().writes.clone() }
    pub fn clear_writes(&self) { self.lock().writes.clear(); }

    /// Make the next call of `op` fail with a transient error.
    pub fn fail_next(&self, op: Op, msg: impl Into<String>) { self.lock().failures.insert(op, msg.into()); }

    /// The next create behaves as if another writer created the same object first.
    pub fn race_next_create(&self) { self.lock().race_next_create = true; }
}

/// What the API server fills in on an apps/v1 Deployment.
fn apply_defaults(d: &mut Deployment) {
    if let Some(spec) = d.spec.as_mut() {
        spec.replicas.get_or_insert(1);
        spec.revision_history_limit.get_or_insert(10);
        spec.progress_deadline_seconds.get_or_insert(600);
    }
}

fn not_found(kind: &'static str, key: &ObjectKey) -> StoreError { StoreError::NotFound { kind, key: key.clone() } }

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get_cluster(&self, key: &ObjectKey) -> Result<WorkerCluster, StoreError> {
        let mut st = self.lock();
        st.injected(Op::GetCluster, "WorkerCluster")?;
        st.clusters.get(key).cloned().ok_or_else(|| not_found("WorkerCluster", key))
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Deployment, StoreError> {
        let mut st = self.lock();
        st.injected(Op::GetDeployment, "Deployment")?;
        st.deployments.get(key).cloned().ok_or_else(|| not_found("Deployment", key))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let mut st = self.lock();
        st.injected(Op::CreateDeployment, "Deployment")?;
        let key = ObjectKey::of(deployment);
        let mut stored = deployment.clone();
        apply_defaults(&mut stored);
        stored.metadata.uid = Some(format!("uid-deploy-{key}"));
        if std::mem::take(&mut st.race_next_create) {
            stored.metadata.resource_version = Some(st.bump());
            st.deployments.insert(key.clone(), stored.clone());
            st.writes.push(Write::Create(key.clone()));
        }
        if st.deployments.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: "Deployment", key });
        }
        stored.metadata.resource_version = Some(st.bump());
        st.deployments.insert(key.clone(), stored.clone());
        st.writes.push(Write::Create(key));
        Ok(stored)
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let mut st = self.lock();
        st.injected(Op::ReplaceDeployment, "Deployment")?;
        let key = ObjectKey::of(deployment);
        let current = st.deployments.get(&key).ok_or_else(|| not_found("Deployment", &key))?;
        if current.metadata.resource_version != deployment.metadata.resource_version {
            return Err(StoreError::Conflict { kind: "Deployment", key });
        }
        let mut stored = deployment.clone();
        apply_defaults(&mut stored);
        stored.metadata.resource_version = Some(st.bump());
        st.deployments.insert(key.clone(), stored.clone());
        st.writes.push(Write::Replace(key));
        Ok(stored)
    }

    async fn list_pods(&self, namespace: &str, match_labels: &BTreeMap<String, String>) -> Result<Vec<Pod>, StoreError> {
        let mut st = self.lock();
        st.injected(Op::ListPods, "Pod")?;
        let pods = st
            .pods
            .iter()
            .filter(|p| p.namespace().as_deref() == Some(namespace))
            .filter(|p| {
                let labels = p.labels();
                match_labels.iter().all(|(k, v)| labels.get(k) == Some(v))
            })
            .cloned()
            .collect();
        Ok(pods)
    }

    async fn update_status(&self, cluster: &WorkerCluster) -> Result<WorkerCluster, StoreError> {
        let mut st = self.lock();
        st.injected(Op::UpdateStatus, "WorkerCluster")?;
        let key = ObjectKey::of(cluster);
        let current = st.clusters.get(&key).ok_or_else(|| not_found("WorkerCluster", &key))?;
        if current.metadata.resource_version != cluster.metadata.resource_version {
            return Err(StoreError::Conflict { kind: "WorkerCluster", key });
        }
        let mut stored = current.clone();
        stored.status = Some(cluster.status.clone().unwrap_or_default());
        stored.metadata.resource_version = Some(st.bump());
        st.clusters.insert(key.clone(), stored.clone());
        st.writes.push(Write::Status(key));
        Ok(stored)
    }
}
