//! Types describing the GCE/GKE resources the drain controller operates on.
//!
//! None of these are persisted locally. Instances and node pools are re-fetched from the cloud API
//! on every polling cycle; the only durable scheduling state is the drain deadline label on each
//! instance (see [`ledger`]).
mod client;
mod credentials;
pub mod error;
pub mod ledger;
pub mod locator;

pub use self::client::*;
pub use self::credentials::{project_id_from_key_file, AccessTokenSource};
pub use self::error::Error as ComputeError;
pub use self::locator::{ResourceKind, ResourceLocation};

#[cfg(feature = "mockall")]
pub use self::client::MockComputeClient;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies the GKE cluster whose preemptible node pools are managed.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ClusterRef {
    pub project_id: String,
    pub zone: String,
    pub cluster_name: String,
}

impl ClusterRef {
    pub fn new<S1, S2, S3>(project_id: S1, zone: S2, cluster_name: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        ClusterRef {
            project_id: project_id.into(),
            zone: zone.into(),
            cluster_name: cluster_name.into(),
        }
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project_id, self.zone, self.cluster_name)
    }
}

/// The lifecycle status of a compute instance, as reported by the compute API.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Repairing,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = serde_plain::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&status)
    }
}

/// The subset of a compute instance that the drain controller reads.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    pub status: InstanceStatus,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Opaque optimistic-concurrency token which must accompany any label mutation.
    #[serde(default)]
    pub label_fingerprint: String,
}

impl Instance {
    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }
}

/// Progress of an asynchronous compute mutation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
    #[serde(other)]
    Unknown,
}

/// A handle to an asynchronous compute mutation, such as setting labels or deleting an instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub operation_type: String,
    pub status: OperationStatus,
    /// The zone URL the operation runs in. Zonal operations are polled through this zone.
    #[serde(default)]
    pub zone: Option<String>,
    /// The error body reported by the API. Its shape is not relied upon beyond being JSON.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    /// Renders the embedded error body, falling back to its debug representation.
    pub fn error_body(&self) -> Option<String> {
        self.error.as_ref().map(|error| {
            serde_json::to_string(error).unwrap_or_else(|_| format!("{:?}", error))
        })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolConfig {
    #[serde(default)]
    pub preemptible: bool,
    #[serde(default)]
    pub spot: bool,
}

/// A GKE node pool. Rebuilt from scratch on every discovery pass.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    pub name: String,
    #[serde(default)]
    pub config: NodePoolConfig,
    #[serde(default)]
    pub instance_group_urls: Vec<String>,
}

impl NodePool {
    /// Whether the pool runs on capacity the platform may reclaim at any time.
    pub fn is_preemptible(&self) -> bool {
        self.config.preemptible || self.config.spot
    }
}
