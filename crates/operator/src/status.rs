//! Pod observations to `WorkerClusterStatus`.

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::crd::{WorkerClusterStatus, WorkerStatus};

/// Pool-size counters for one worker pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizes {
    pub current: i32,
    pub expected: i32,
    pub requested: i32,
}

/// Source of a worker's pool sizes. A live implementation would ask the worker's
/// remote-controller API; [`FixedPoolSize`] is what runs today.
pub trait PoolSizeProbe: Send + Sync {
    fn pool_sizes(&self, pod: &Pod) -> PoolSizes;
}

/// Reports the same value for every counter of every pod.
#[derive(Debug, Clone, Copy)]
pub struct FixedPoolSize(pub i32);

impl Default for FixedPoolSize {
    fn default() -> Self { Self(1) }
}

impl PoolSizeProbe for FixedPoolSize {
    fn pool_sizes(&self, _pod: &Pod) -> PoolSizes {
        PoolSizes { current: self.0, expected: self.0, requested: self.0 }
    }
}

/// One record per pod, in listing order. No pods gives an empty list, never `None`.
pub fn aggregate(pods: &[Pod], probe: &dyn PoolSizeProbe) -> WorkerClusterStatus {
    let worker_statuses = pods
        .iter()
        .map(|pod| {
            let sizes = probe.pool_sizes(pod);
            WorkerStatus {
                name: pod.name_any(),
                current_pool_size: sizes.current,
                expected_pool_size: sizes.expected,
                requested_pool_size: sizes.requested,
            }
        })
        .collect();
    WorkerClusterStatus { worker_statuses }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn pod(name: &str) -> Pod { Pod { metadata: ObjectMeta { name: Some(name.into()), ..Default::default() }, ..Default::default() } }

    #[test]
    fn empty_input_gives_empty_list() {
        let status = aggregate(&[], &FixedPoolSize::default());
        assert!(status.worker_statuses.is_empty());
        assert_eq!(serde_json::to_value(&status).unwrap(), serde_json::json!({"workerStatuses": []}));
    }

    #[test]
    fn keeps_input_order_and_sentinel_counts() {
        let status = aggregate(&[pod("w-b"), pod("w-a")], &FixedPoolSize::default());
        let names: Vec<_> = status.worker_statuses.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["w-b", "w-a"]);
        assert!(status.worker_statuses.iter().all(|w| w.current_pool_size == 1 && w.expected_pool_size == 1 && w.requested_pool_size == 1));
    }

    #[test]
    fn probe_is_consulted_per_pod() {
        struct ByName;
        impl PoolSizeProbe for ByName {
            fn pool_sizes(&self, pod: &Pod) -> PoolSizes {
                let n = pod.name_any().len() as i32;
                PoolSizes { current: n, expected: n + 1, requested: n + 2 }
            }
        }
        let status = aggregate(&[pod("abc")], &ByName);
        assert_eq!(status.worker_statuses[0], WorkerStatus { name: "abc".into(), current_pool_size: 3, expected_pool_size: 4, requested_pool_size: 5 });
    }
}
