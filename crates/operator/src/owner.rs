use k8s_openapi::api::apps::v1::Deployment;
use kube::Resource;

use crate::crd::WorkerCluster;
use crate::error::{Error, Result};

/// Stamp `child` with a controller owner reference to `cluster` so deleting the
/// cluster garbage-collects the Deployment. Must happen before the create call.
pub fn link_owner(cluster: &WorkerCluster, child: &mut Deployment) -> Result<()> {
    let owner = cluster
        .controller_owner_ref(&())
        .ok_or_else(|| Error::owner_link("WorkerCluster has no name or uid yet"))?;
    let refs = child.metadata.owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = refs.iter().find(|r| r.controller == Some(true) && r.uid != owner.uid) {
        return Err(Error::owner_link(format!("already controlled by {} {}", other.kind, other.name)));
    }
    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::WorkerClusterSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;

    fn cluster(uid: Option<&str>) -> WorkerCluster {
        WorkerCluster {
            metadata: ObjectMeta { name: Some("x".into()), namespace: Some("ci".into()), uid: uid.map(Into::into), ..Default::default() },
            spec: WorkerClusterSpec { selector: Default::default(), template: Default::default() },
            status: None,
        }
    }

    #[test]
    fn stamps_controller_reference() {
        let mut d = Deployment::default();
        link_owner(&cluster(Some("uid-1")), &mut d).unwrap();
        let refs = d.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "WorkerCluster");
        assert_eq!(refs[0].api_version, "travisci.com/v1alpha1");
        assert_eq!(refs[0].uid, "uid-1");
        assert_eq!(refs[0].controller, Some(true));
    }

    #[test]
    fn linking_twice_keeps_one_reference() {
        let wc = cluster(Some("uid-1"));
        let mut d = Deployment::default();
        link_owner(&wc, &mut d).unwrap();
        link_owner(&wc, &mut d).unwrap();
        assert_eq!(d.metadata.owner_references.unwrap().len(), 1);
    }

    #[test]
    fn missing_uid_fails() {
        let err = link_owner(&cluster(None), &mut Deployment::default()).unwrap_err();
        assert!(matches!(err, Error::OwnerLink(_)));
    }

    #[test]
    fn foreign_controller_is_rejected() {
        let mut d = Deployment::default();
        d.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".into(), kind: "ReplicaSet".into(), name: "other".into(), uid: "uid-9".into(),
            controller: Some(true), ..Default::default()
        }]);
        assert!(link_owner(&cluster(Some("uid-1")), &mut d).is_err());
    }
}
