//! Pure construction of the child Deployment for a WorkerCluster.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment};
use k8s_openapi::api::core::v1::{Container, EnvVar};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::crd::WorkerCluster;
use crate::error::{Error, Result};

pub const ENV_CONTROLLER_ADDR: &str = "TRAVIS_WORKER_REMOTE_CONTROLLER_ADDR";
pub const ENV_CONTROLLER_AUTH: &str = "TRAVIS_WORKER_REMOTE_CONTROLLER_AUTH";
pub const ENV_POOL_SIZE: &str = "TRAVIS_WORKER_POOL_SIZE";
pub const TEMPLATE_HASH_ANNOTATION: &str = "travisci.com/template-hash";

/// Where a worker exposes its pool-size API and the credential guarding it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ControlPlaneSettings {
    pub addr: String,
    // TODO: generate a per-cluster secret and read it back from the pod spec when querying workers.
    pub auth: String,
}

impl Default for ControlPlaneSettings {
    fn default() -> Self { Self { addr: "0.0.0.0:8080".into(), auth: "worker:worker".into() } }
}

/// Build the canonical Deployment for `cluster`. Same name, namespace and labels as
/// the cluster; the first container gets the remote-controller env and starts with
/// an empty pool so the operator decides capacity.
pub fn build_deployment(cluster: &WorkerCluster, settings: &ControlPlaneSettings) -> Result<Deployment> {
    let mut template = cluster.spec.template.clone();
    let container = template
        .spec
        .as_mut()
        .and_then(|s| s.containers.first_mut())
        .ok_or_else(|| Error::precondition("worker template declares no containers"))?;
    configure_container(container, settings);

    let spec = DeploymentSpec {
        selector: cluster.spec.selector.clone(),
        template,
        strategy: Some(rollout_strategy()),
        ..DeploymentSpec::default()
    };
    let hash = template_hash(&spec)?;
    Ok(Deployment {
        metadata: ObjectMeta {
            name: cluster.metadata.name.clone(),
            namespace: cluster.metadata.namespace.clone(),
            labels: cluster.metadata.labels.clone(),
            annotations: Some(BTreeMap::from([(TEMPLATE_HASH_ANNOTATION.to_string(), hash)])),
            ..ObjectMeta::default()
        },
        spec: Some(spec),
        status: None,
    })
}

/// Never drop below the current capacity during a rollout; add one pod at a time.
pub fn rollout_strategy() -> DeploymentStrategy {
    DeploymentStrategy {
        type_: Some("RollingUpdate".into()),
        rolling_update: Some(RollingUpdateDeployment {
            max_unavailable: Some(IntOrString::Int(0)),
            max_surge: Some(IntOrString::Int(1)),
        }),
    }
}

fn configure_container(c: &mut Container, settings: &ControlPlaneSettings) {
    let env = c.env.get_or_insert_with(Vec::new);
    let wanted = [
        (ENV_CONTROLLER_ADDR, settings.addr.as_str()),
        (ENV_CONTROLLER_AUTH, settings.auth.as_str()),
        (ENV_POOL_SIZE, "0"),
    ];
    for (name, value) in wanted {
        let var = EnvVar { name: name.to_string(), value: Some(value.to_string()), ..EnvVar::default() };
        match env.iter_mut().find(|e| e.name == name) {
            Some(existing) => *existing = var,
            None => env.push(var),
        }
    }
}

/// Hex SHA-256 over the fields this operator owns. Server-side defaulting touches
/// other fields, so comparing hashes never reports drift the operator caused itself.
pub fn template_hash(spec: &DeploymentSpec) -> Result<String> {
    let owned = json!({
        "selector": spec.selector,
        "template": spec.template,
        "strategy": spec.strategy,
    });
    let bytes = serde_json::to_vec(&owned)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Hash annotation recorded on a Deployment, if any.
pub fn recorded_hash(deployment: &Deployment) -> Option<&str> {
    deployment.metadata.annotations.as_ref()?.get(TEMPLATE_HASH_ANNOTATION).map(String::as_str)
}
