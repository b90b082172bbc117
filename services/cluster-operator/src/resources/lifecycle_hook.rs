//! Drain hook on the worker autoscaling group.
//!
//! Terminating workers pause on the hook so their pods can be drained. The
//! hook goes away together with the group when the main stack is deleted.

use std::sync::Arc;

use async_trait::async_trait;
use strato_cloud::{
    AutoScalingApi, DefaultResult, LifecycleHook, LifecycleTransition,
    AUTO_SCALING_GROUP_NOT_FOUND,
};
use strato_reconcile::{ControllerContext, Patch, Resource, Result, ResultExt, Snapshot};
use tracing::info;

use crate::cluster::{Cluster, ClusterScratch};

pub const DRAIN_HOOK_NAME: &str = "strato-worker-drain";

/// The drain hook of one group, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookState {
    pub group: Option<String>,
    pub hook: Option<LifecycleHook>,
}

impl Snapshot for HookState {
    fn is_absent(&self) -> bool {
        self.hook.is_none()
    }

    fn same_as(&self, other: &Self) -> bool {
        self.hook == other.hook
    }
}

pub struct LifecycleHookResource {
    api: Arc<dyn AutoScalingApi>,
    heartbeat_timeout_secs: u32,
}

impl LifecycleHookResource {
    pub fn new(api: Arc<dyn AutoScalingApi>, heartbeat_timeout_secs: u32) -> Self {
        Self {
            api,
            heartbeat_timeout_secs,
        }
    }

    fn absent() -> HookState {
        HookState {
            group: None,
            hook: None,
        }
    }
}

#[async_trait]
impl Resource<Cluster> for LifecycleHookResource {
    type State = HookState;
    type Create = HookState;
    type Update = HookState;
    type Delete = HookState;

    fn name(&self) -> &str {
        "lifecycle-hook"
    }

    async fn current_state(
        &self,
        cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<HookState> {
        if cluster.deleting {
            return Ok(Self::absent());
        }
        let Some(group) = ctx.scratch.outputs.worker_group.clone() else {
            ctx.cancel_pass("worker group not known yet");
            return Ok(Self::absent());
        };

        let asg = match self.api.describe_auto_scaling_group(&group).await {
            Ok(asg) => asg,
            Err(err) if err.is(&AUTO_SCALING_GROUP_NOT_FOUND) => {
                ctx.cancel_pass(format!("worker group {group} not found yet"));
                return Ok(Self::absent());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("describing worker group {group}"))
            }
        };
        ctx.scratch.scaling.desired_capacity = Some(asg.desired_capacity);

        let hook = asg
            .lifecycle_hooks
            .into_iter()
            .find(|hook| hook.name == DRAIN_HOOK_NAME);
        Ok(HookState {
            group: Some(group),
            hook,
        })
    }

    async fn desired_state(
        &self,
        cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<HookState> {
        let group = ctx.scratch.outputs.worker_group.clone();
        if cluster.deleting || group.is_none() {
            return Ok(Self::absent());
        }
        Ok(HookState {
            group,
            hook: Some(LifecycleHook {
                name: DRAIN_HOOK_NAME.to_string(),
                transition: LifecycleTransition::InstanceTerminating,
                heartbeat_timeout_secs: self.heartbeat_timeout_secs,
                default_result: DefaultResult::Continue,
            }),
        })
    }

    fn compute_patch(
        &self,
        _cluster: &Cluster,
        current: &HookState,
        desired: &HookState,
    ) -> Result<Patch<HookState>> {
        Ok(Patch::diff(current, desired))
    }

    async fn apply_create(
        &self,
        _cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
        state: HookState,
    ) -> Result<()> {
        self.put(state).await
    }

    async fn apply_update(
        &self,
        _cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
        state: HookState,
    ) -> Result<()> {
        self.put(state).await
    }

    async fn apply_delete(
        &self,
        _cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
        state: HookState,
    ) -> Result<()> {
        if let (Some(group), Some(hook)) = (state.group, state.hook) {
            self.api
                .delete_lifecycle_hook(&group, &hook.name)
                .await
                .with_context(|| format!("deleting lifecycle hook of {group}"))?;
            info!(group = %group, hook = %hook.name, "lifecycle hook deleted");
        }
        Ok(())
    }
}

impl LifecycleHookResource {
    async fn put(&self, state: HookState) -> Result<()> {
        let (Some(group), Some(hook)) = (state.group, state.hook) else {
            return Ok(());
        };
        let name = hook.name.clone();
        self.api
            .put_lifecycle_hook(&group, hook)
            .await
            .with_context(|| format!("putting lifecycle hook on {group}"))?;
        info!(group = %group, hook = %name, "lifecycle hook in place");
        Ok(())
    }
}
