use thiserror::Error;

use crate::store::StoreError;

/// Failures of one reconciliation pass. Store errors pass through untouched so the
/// controller's requeue path sees exactly what the API server said.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)] Store(#[from] StoreError),
    #[error("precondition violated: {0}")] Precondition(String),
    #[error("owner link failed: {0}")] OwnerLink(String),
    #[error("reconcile timed out after {0:?}")] Timeout(std::time::Duration),
    #[error("serialization error: {0}")] Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn precondition(msg: impl Into<String>) -> Self { Self::Precondition(msg.into()) }
    pub fn owner_link(msg: impl Into<String>) -> Self { Self::OwnerLink(msg.into()) }

    /// Short machine-friendly label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(e) => e.kind(),
            Self::Precondition(_) => "precondition",
            Self::OwnerLink(_) => "owner_link",
            Self::Timeout(_) => "timeout",
            Self::Serialization(_) => "serialization",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ObjectKey;

    #[test]
    fn store_errors_are_transparent() {
        let err: Error = StoreError::NotFound { kind: "WorkerCluster", key: ObjectKey::new("ns", "x") }.into();
        assert_eq!(err.to_string(), "WorkerCluster ns/x not found");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn precondition_label() {
        let err = Error::precondition("template has no containers");
        assert_eq!(err.kind(), "precondition");
        assert!(err.to_string().contains("no containers"));
    }
}
