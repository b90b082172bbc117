//! The declared cluster record and the store it lives in.
//!
//! The operator reads the spec and writes back a few status fields. Every
//! write fetches the latest version first and is rejected if somebody else
//! wrote in between.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strato_id::ClusterId;
use strato_reconcile::{ConvergenceStatus, Error, ErrorKind, Missing, Reconcilable, Result, SpecHash};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Network layout of the cluster VPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub vpc_cidr: String,
    pub private_subnet_cidrs: Vec<String>,
    pub public_subnet_cidrs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub instance_type: String,
    pub min_size: u32,
    pub max_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneSpec {
    pub instance_type: String,
    pub replicas: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsSpec {
    pub base_domain: String,
    pub hosted_zone_id: String,
}

/// What the cluster should look like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub release_version: String,
    /// Reference to the provider credential the cluster is created with.
    pub credential_ref: String,
    pub network: NetworkSpec,
    pub workers: WorkerSpec,
    pub control_plane: ControlPlaneSpec,
    pub dns: DnsSpec,
    /// Expiration for objects in the access log bucket.
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

fn default_log_retention_days() -> u32 {
    30
}

/// Fields the operator writes back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(default)]
    pub convergence: ConvergenceStatus,
    pub worker_group: Option<String>,
    pub desired_capacity: Option<u32>,
    pub main_template_hash: Option<SpecHash>,
    pub last_error_kind: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A declared cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    /// Bumped by the store on every write.
    pub version: u64,
    /// Deletion was requested; the record stays until the operator
    /// finalizes it.
    #[serde(default)]
    pub deleting: bool,
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl Cluster {
    pub fn new(id: ClusterId, spec: ClusterSpec) -> Self {
        Self {
            id,
            version: 0,
            deleting: false,
            spec,
            status: ClusterStatus::default(),
        }
    }

    /// Tag key marking provider resources that belong to this cluster.
    pub fn ownership_tag_key(&self) -> String {
        format!("kubernetes.io/cluster/{}", self.id)
    }
}

/// Values discovered during one pass.
#[derive(Debug, Default)]
pub struct ClusterScratch {
    pub network: NetworkScratch,
    pub outputs: OutputScratch,
    pub scaling: ScalingScratch,
}

/// Host-side network identifiers.
#[derive(Debug, Default, Clone)]
pub struct NetworkScratch {
    pub host_vpc_id: Option<String>,
    pub host_vpc_cidr: Option<String>,
    /// Route table name to route table ID.
    pub route_tables: BTreeMap<String, String>,
}

/// Values read from the main stack.
#[derive(Debug, Default, Clone)]
pub struct OutputScratch {
    pub vpc_id: Option<String>,
    pub peering_connection_id: Option<String>,
    pub worker_group: Option<String>,
    /// Fingerprint of the main template rendered this pass.
    pub main_template_hash: Option<SpecHash>,
}

#[derive(Debug, Default, Clone)]
pub struct ScalingScratch {
    pub desired_capacity: Option<u32>,
}

impl Reconcilable for Cluster {
    type Scratch = ClusterScratch;

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn is_deleting(&self) -> bool {
        self.deleting
    }
}

/// Storage for declared clusters.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get(&self, id: &ClusterId) -> Result<Option<Cluster>>;

    async fn list(&self) -> Result<Vec<Cluster>>;

    /// Write `cluster` if its version still matches the stored one. Returns
    /// the stored record with the bumped version.
    async fn update(&self, cluster: Cluster) -> Result<Cluster>;

    /// Finalize a deleted cluster.
    async fn remove(&self, id: &ClusterId) -> Result<()>;
}

/// Attempts at a status write before giving up on conflicts.
const STATUS_WRITE_ATTEMPTS: u32 = 3;

/// Fetch the latest record, apply `mutate` to its status and write it back.
///
/// Nothing is written when the status is unchanged. Version conflicts are
/// retried against a freshly fetched record.
pub async fn update_status<F>(
    store: &dyn ClusterStore,
    id: &ClusterId,
    mutate: F,
) -> Result<Cluster>
where
    F: Fn(&mut ClusterStatus) + Send + Sync,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut latest = store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(Missing::Cluster, id.as_str()))?;

        let before = latest.status.clone();
        mutate(&mut latest.status);
        if latest.status == before {
            return Ok(latest);
        }
        latest.status.updated_at = Some(Utc::now());

        match store.update(latest).await {
            Ok(stored) => return Ok(stored),
            Err(err) if err.kind() == ErrorKind::Conflict && attempt < STATUS_WRITE_ATTEMPTS => {
                debug!(cluster = %id, attempt, error = %err, "status write conflicted, refetching");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Cluster store backed by memory.
#[derive(Default)]
pub struct InMemoryClusterStore {
    clusters: RwLock<BTreeMap<ClusterId, Cluster>>,
}

impl InMemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a cluster, bumping its version past the stored one.
    pub async fn put(&self, mut cluster: Cluster) -> Cluster {
        let mut clusters = self.clusters.write().await;
        let stored_version = clusters.get(&cluster.id).map(|c| c.version).unwrap_or(0);
        cluster.version = stored_version.max(cluster.version) + 1;
        clusters.insert(cluster.id.clone(), cluster.clone());
        cluster
    }

    /// Request deletion of a cluster.
    pub async fn mark_deleting(&self, id: &ClusterId) -> Result<Cluster> {
        let mut clusters = self.clusters.write().await;
        let cluster = clusters
            .get_mut(id)
            .ok_or_else(|| Error::not_found(Missing::Cluster, id.as_str()))?;
        cluster.deleting = true;
        cluster.version += 1;
        info!(cluster = %id, "cluster marked for deletion");
        Ok(cluster.clone())
    }
}

#[async_trait]
impl ClusterStore for InMemoryClusterStore {
    async fn get(&self, id: &ClusterId) -> Result<Option<Cluster>> {
        Ok(self.clusters.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Cluster>> {
        Ok(self.clusters.read().await.values().cloned().collect())
    }

    async fn update(&self, mut cluster: Cluster) -> Result<Cluster> {
        let mut clusters = self.clusters.write().await;
        let stored = clusters
            .get_mut(&cluster.id)
            .ok_or_else(|| Error::not_found(Missing::Cluster, cluster.id.as_str()))?;
        if stored.version != cluster.version {
            return Err(Error::Conflict(format!(
                "cluster {} is at version {}, write was based on {}",
                cluster.id, stored.version, cluster.version
            )));
        }
        cluster.version += 1;
        *stored = cluster.clone();
        Ok(cluster)
    }

    async fn remove(&self, id: &ClusterId) -> Result<()> {
        if self.clusters.write().await.remove(id).is_some() {
            info!(cluster = %id, "cluster finalized");
        }
        Ok(())
    }
}
