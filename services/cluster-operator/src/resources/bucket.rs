//! The cluster's object storage buckets.
//!
//! Every cluster has an access log bucket and a data bucket that logs into
//! it. The access log bucket is never deleted by reconciliation; its logs
//! outlive the cluster.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use strato_cloud::{BucketApi, LifecycleRule, BUCKET_ALREADY_OWNED, NO_SUCH_BUCKET};
use strato_reconcile::{ControllerContext, Patch, Resource, Result, ResultExt};
use tracing::{debug, info};

use super::ownership_tags;
use crate::cluster::{Cluster, ClusterScratch};

/// One bucket as observed or intended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSpec {
    pub name: String,
    pub is_logging_bucket: bool,
    pub lifecycle: Option<LifecycleRule>,
    pub access_log_target: Option<String>,
}

impl BucketSpec {
    fn same_config(&self, other: &BucketSpec) -> bool {
        self.lifecycle == other.lifecycle && self.access_log_target == other.access_log_target
    }
}

/// The set of cluster buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buckets(pub Vec<BucketSpec>);

impl Buckets {
    fn names(&self) -> BTreeSet<&str> {
        self.0.iter().map(|b| b.name.as_str()).collect()
    }

    fn get(&self, name: &str) -> Option<&BucketSpec> {
        self.0.iter().find(|b| b.name == name)
    }
}

/// Desired buckets that do not exist yet.
pub fn buckets_to_create(current: &Buckets, desired: &Buckets) -> Vec<BucketSpec> {
    let existing = current.names();
    desired
        .0
        .iter()
        .filter(|b| !existing.contains(b.name.as_str()))
        .cloned()
        .collect()
}

/// Existing buckets that are no longer desired, except the logging bucket.
pub fn buckets_to_delete(current: &Buckets, desired: &Buckets) -> Vec<BucketSpec> {
    let wanted = desired.names();
    current
        .0
        .iter()
        .filter(|b| !b.is_logging_bucket && !wanted.contains(b.name.as_str()))
        .cloned()
        .collect()
}

/// Desired buckets whose observed configuration differs.
fn buckets_to_update(current: &Buckets, desired: &Buckets) -> Vec<BucketSpec> {
    desired
        .0
        .iter()
        .filter(|want| {
            current
                .get(&want.name)
                .is_some_and(|have| !have.same_config(want))
        })
        .cloned()
        .collect()
}

pub struct BucketResource {
    api: Arc<dyn BucketApi>,
}

impl BucketResource {
    pub fn new(api: Arc<dyn BucketApi>) -> Self {
        Self { api }
    }

    pub fn logging_bucket_name(cluster: &Cluster) -> String {
        format!("{}-access-logs", cluster.id)
    }

    pub fn data_bucket_name(cluster: &Cluster) -> String {
        format!("{}-data", cluster.id)
    }

    async fn configure(&self, bucket: &BucketSpec) -> Result<()> {
        self.api
            .put_lifecycle(&bucket.name, bucket.lifecycle)
            .await
            .with_context(|| format!("configuring lifecycle of bucket {}", bucket.name))?;
        self.api
            .put_access_logging(&bucket.name, bucket.access_log_target.clone())
            .await
            .with_context(|| format!("configuring access logging of bucket {}", bucket.name))?;
        Ok(())
    }
}

#[async_trait]
impl Resource<Cluster> for BucketResource {
    type State = Buckets;
    type Create = Vec<BucketSpec>;
    type Update = Vec<BucketSpec>;
    type Delete = Vec<BucketSpec>;

    fn name(&self) -> &str {
        "bucket"
    }

    async fn current_state(
        &self,
        cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<Buckets> {
        let logging = Self::logging_bucket_name(cluster);
        let mut buckets = Vec::new();

        for name in [logging.clone(), Self::data_bucket_name(cluster)] {
            match self.api.head_bucket(&name).await {
                Ok(info) => buckets.push(BucketSpec {
                    is_logging_bucket: info.name == logging,
                    name: info.name,
                    lifecycle: info.lifecycle,
                    access_log_target: info.access_log_target,
                }),
                Err(err) if err.is(&NO_SUCH_BUCKET) => {
                    debug!(bucket = %name, "bucket does not exist yet");
                }
                Err(err) => return Err(err).with_context(|| format!("observing bucket {name}")),
            }
        }
        Ok(Buckets(buckets))
    }

    async fn desired_state(
        &self,
        cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<Buckets> {
        if cluster.deleting {
            return Ok(Buckets::default());
        }

        let logging = Self::logging_bucket_name(cluster);
        Ok(Buckets(vec![
            BucketSpec {
                name: logging.clone(),
                is_logging_bucket: true,
                lifecycle: Some(LifecycleRule {
                    expiration_days: cluster.spec.log_retention_days,
                }),
                access_log_target: None,
            },
            BucketSpec {
                name: Self::data_bucket_name(cluster),
                is_logging_bucket: false,
                lifecycle: None,
                access_log_target: Some(logging),
            },
        ]))
    }

    /// Creation wins over deletion, deletion over update.
    fn compute_patch(
        &self,
        _cluster: &Cluster,
        current: &Buckets,
        desired: &Buckets,
    ) -> Result<Patch<Vec<BucketSpec>>> {
        let create = buckets_to_create(current, desired);
        if !create.is_empty() {
            return Ok(Patch::Create(create));
        }
        let delete = buckets_to_delete(current, desired);
        if !delete.is_empty() {
            return Ok(Patch::Delete(delete));
        }
        let update = buckets_to_update(current, desired);
        if !update.is_empty() {
            return Ok(Patch::Update(update));
        }
        Ok(Patch::Empty)
    }

    async fn apply_create(
        &self,
        cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
        mut buckets: Vec<BucketSpec>,
    ) -> Result<()> {
        // Log targets have to exist before anything logs into them.
        buckets.sort_by_key(|b| !b.is_logging_bucket);

        for bucket in &buckets {
            match self
                .api
                .create_bucket(&bucket.name, ownership_tags(cluster))
                .await
            {
                Ok(()) => info!(bucket = %bucket.name, "bucket created"),
                Err(err) if err.is(&BUCKET_ALREADY_OWNED) => {
                    info!(bucket = %bucket.name, "bucket already exists");
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("creating bucket {}", bucket.name))
                }
            }
            self.configure(bucket).await?;
        }
        Ok(())
    }

    async fn apply_update(
        &self,
        _cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
        buckets: Vec<BucketSpec>,
    ) -> Result<()> {
        for bucket in &buckets {
            self.configure(bucket).await?;
            info!(bucket = %bucket.name, "bucket configuration updated");
        }
        Ok(())
    }

    async fn apply_delete(
        &self,
        _cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
        buckets: Vec<BucketSpec>,
    ) -> Result<()> {
        for bucket in &buckets {
            let emptied = self.api.delete_objects(&bucket.name).await;
            let deleted = match emptied {
                Ok(()) => self.api.delete_bucket(&bucket.name).await,
                Err(err) => Err(err),
            };
            match deleted {
                Ok(()) => info!(bucket = %bucket.name, "bucket deleted"),
                Err(err) if err.is(&NO_SUCH_BUCKET) => {
                    debug!(bucket = %bucket.name, "bucket already gone");
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("deleting bucket {}", bucket.name))
                }
            }
        }
        Ok(())
    }
}
