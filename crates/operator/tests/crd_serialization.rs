use kube::CustomResourceExt;
use serde_json::json;
use worker_operator::{WorkerCluster, WorkerClusterStatus, WorkerStatus};

#[test]
fn status_wire_format() {
    let status = WorkerClusterStatus {
        worker_statuses: vec![WorkerStatus { name: "w-1".into(), current_pool_size: 1, expected_pool_size: 1, requested_pool_size: 1 }],
    };
    let j = serde_json::to_value(&status).unwrap();
    assert_eq!(j, json!({"workerStatuses":[{"name":"w-1","currentPoolSize":1,"expectedPoolSize":1,"requestedPoolSize":1}]}));
    let back: WorkerClusterStatus = serde_json::from_value(j).unwrap();
    assert_eq!(back, status);
}

#[test]
fn cluster_manifest_parses() {
    let manifest = json!({
        "apiVersion": "travisci.com/v1alpha1",
        "kind": "WorkerCluster",
        "metadata": {"name": "linux", "namespace": "ci", "labels": {"app": "worker"}},
        "spec": {
            "selector": {"matchLabels": {"app": "worker"}},
            "template": {
                "metadata": {"labels": {"app": "worker"}},
                "spec": {"containers": [{"name": "worker", "image": "travisci/worker:v6"}]}
            }
        }
    });
    let wc: WorkerCluster = serde_json::from_value(manifest).unwrap();
    assert!(wc.status.is_none());
    assert_eq!(wc.spec.template.spec.as_ref().unwrap().containers[0].name, "worker");
}

#[test]
fn crd_has_status_subresource() {
    let crd = WorkerCluster::crd();
    assert_eq!(crd.metadata.name.as_deref(), Some("workerclusters.travisci.com"));
    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1alpha1");
    assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
}
