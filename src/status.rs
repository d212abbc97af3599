//! Application status codes and the retry classifier.
//!
//! Three downstream services can answer a call: the MDS itself, a
//! metaserver, or the topology service. Each has its own status enumeration.
//! Responses expose whichever one they carry through [`RetryStatus`], and
//! [`should_retry`] decides from a fixed per-enumeration set whether the
//! status is transient.

use serde::{Deserialize, Serialize};

/// Status returned by the MDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MdsStatus {
    Ok,
    UnknownError,
    ParamError,
    FsNotFound,
    InodeNotFound,
    DentryNotFound,
    DirNotEmpty,
    NotServing,
    EpochMismatch,
    QuotaExceeded,
    InternalError,
}

/// Status returned by a metaserver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaStatus {
    Ok,
    UnknownError,
    ParamError,
    NotFound,
    Redirected,
    Overload,
    StorageInternalError,
    InodeExist,
}

/// Status returned by the topology service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopoStatus {
    Ok,
    InternalError,
    InvalidParam,
    FsNotFound,
    MdsNotFound,
    NotServing,
    StorageMaybeRetry,
}

const MDS_RETRYABLE: &[MdsStatus] = &[MdsStatus::NotServing, MdsStatus::EpochMismatch];
const META_RETRYABLE: &[MetaStatus] = &[MetaStatus::Redirected, MetaStatus::Overload];
const TOPO_RETRYABLE: &[TopoStatus] = &[TopoStatus::NotServing, TopoStatus::StorageMaybeRetry];

/// Status embedded in a decoded response, tagged by the service that sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Mds(MdsStatus),
    MetaServer(MetaStatus),
    Topology(TopoStatus),
}

impl StatusCode {
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            StatusCode::Mds(MdsStatus::Ok)
                | StatusCode::MetaServer(MetaStatus::Ok)
                | StatusCode::Topology(TopoStatus::Ok)
        )
    }

    /// Whether the status is in its service's transient set.
    pub fn is_transient(&self) -> bool {
        match self {
            StatusCode::Mds(s) => MDS_RETRYABLE.contains(s),
            StatusCode::MetaServer(s) => META_RETRYABLE.contains(s),
            StatusCode::Topology(s) => TOPO_RETRYABLE.contains(s),
        }
    }

    /// Stable numeric value, used as the offset inside the rpc-result band.
    pub fn value(&self) -> i32 {
        match self {
            StatusCode::Mds(s) => *s as i32,
            StatusCode::MetaServer(s) => 100 + *s as i32,
            StatusCode::Topology(s) => 200 + *s as i32,
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusCode::Mds(s) => write!(f, "mds:{:?}", s),
            StatusCode::MetaServer(s) => write!(f, "metaserver:{:?}", s),
            StatusCode::Topology(s) => write!(f, "topology:{:?}", s),
        }
    }
}

/// Capability of a decoded response: it carries a retry-relevant status.
pub trait RetryStatus {
    fn status(&self) -> StatusCode;
}

/// Whether a decoded response should be retried.
pub fn should_retry<R: RetryStatus + ?Sized>(response: &R) -> bool {
    response.status().is_transient()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reply(StatusCode);

    impl RetryStatus for Reply {
        fn status(&self) -> StatusCode {
            self.0
        }
    }

    #[test]
    fn test_transient_sets() {
        assert!(should_retry(&Reply(StatusCode::MetaServer(MetaStatus::Redirected))));
        assert!(should_retry(&Reply(StatusCode::MetaServer(MetaStatus::Overload))));
        assert!(should_retry(&Reply(StatusCode::Mds(MdsStatus::NotServing))));
        assert!(should_retry(&Reply(StatusCode::Mds(MdsStatus::EpochMismatch))));
        assert!(should_retry(&Reply(StatusCode::Topology(TopoStatus::StorageMaybeRetry))));
    }

    #[test]
    fn test_final_statuses() {
        assert!(!should_retry(&Reply(StatusCode::Mds(MdsStatus::Ok))));
        assert!(!should_retry(&Reply(StatusCode::Mds(MdsStatus::FsNotFound))));
        assert!(!should_retry(&Reply(StatusCode::MetaServer(MetaStatus::NotFound))));
        assert!(!should_retry(&Reply(StatusCode::Topology(TopoStatus::InvalidParam))));
    }

    #[test]
    fn test_values_are_distinct_per_service() {
        let a = StatusCode::Mds(MdsStatus::ParamError).value();
        let b = StatusCode::MetaServer(MetaStatus::ParamError).value();
        let c = StatusCode::Topology(TopoStatus::InvalidParam).value();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(StatusCode::Mds(MdsStatus::Ok).is_ok());
    }
}
