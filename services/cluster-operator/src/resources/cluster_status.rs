//! Writes values discovered during the pass back to the cluster's status.

use std::sync::Arc;

use async_trait::async_trait;
use strato_reconcile::{ControllerContext, Error, Missing, Patch, Resource, Result, SpecHash};

use crate::cluster::{update_status, Cluster, ClusterScratch, ClusterStatus, ClusterStore};

/// The status fields this resource owns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFields {
    pub worker_group: Option<String>,
    pub desired_capacity: Option<u32>,
    pub main_template_hash: Option<SpecHash>,
}

impl StatusFields {
    fn of(status: &ClusterStatus) -> Self {
        Self {
            worker_group: status.worker_group.clone(),
            desired_capacity: status.desired_capacity,
            main_template_hash: status.main_template_hash.clone(),
        }
    }
}

pub struct ClusterStatusResource {
    store: Arc<dyn ClusterStore>,
}

impl ClusterStatusResource {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Resource<Cluster> for ClusterStatusResource {
    type State = StatusFields;
    type Create = ();
    type Update = StatusFields;
    type Delete = ();

    fn name(&self) -> &str {
        "cluster-status"
    }

    /// Read from the store rather than the pass's copy, which may be stale.
    async fn current_state(
        &self,
        cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<StatusFields> {
        let latest = self
            .store
            .get(&cluster.id)
            .await?
            .ok_or_else(|| Error::not_found(Missing::Cluster, cluster.id.as_str()))?;
        Ok(StatusFields::of(&latest.status))
    }

    /// Fields nobody discovered this pass keep their stored value.
    async fn desired_state(
        &self,
        cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<StatusFields> {
        let stored = StatusFields::of(&cluster.status);
        let scratch = &ctx.scratch;
        Ok(StatusFields {
            worker_group: scratch
                .outputs
                .worker_group
                .clone()
                .or(stored.worker_group),
            desired_capacity: scratch.scaling.desired_capacity.or(stored.desired_capacity),
            main_template_hash: scratch
                .outputs
                .main_template_hash
                .clone()
                .or(stored.main_template_hash),
        })
    }

    fn compute_patch(
        &self,
        cluster: &Cluster,
        current: &StatusFields,
        desired: &StatusFields,
    ) -> Result<Patch<(), StatusFields, ()>> {
        if cluster.deleting || current == desired {
            return Ok(Patch::Empty);
        }
        Ok(Patch::Update(desired.clone()))
    }

    async fn apply_update(
        &self,
        cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
        fields: StatusFields,
    ) -> Result<()> {
        update_status(self.store.as_ref(), &cluster.id, |status| {
            status.worker_group = fields.worker_group.clone();
            status.desired_capacity = fields.desired_capacity;
            status.main_template_hash = fields.main_template_hash.clone();
        })
        .await?;
        Ok(())
    }
}
