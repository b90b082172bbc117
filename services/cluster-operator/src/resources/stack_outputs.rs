//! Reads the main stack's outputs into the pass.

use std::sync::Arc;

use async_trait::async_trait;
use strato_id::StackRole;
use strato_reconcile::{ControllerContext, ErrorKind, Missing, Patch, Resource, Result};
use tracing::debug;

use crate::cluster::{Cluster, ClusterScratch};
use crate::stack::StackManager;

pub const VPC_ID_OUTPUT: &str = "VPCID";
pub const PEERING_CONNECTION_OUTPUT: &str = "VPCPeeringConnectionID";
pub const WORKER_GROUP_OUTPUT: &str = "WorkerASGName";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainOutputs {
    pub vpc_id: String,
    pub peering_connection_id: String,
    pub worker_group: String,
}

/// Observe-only. Outputs that cannot be read yet cancel the pass instead of
/// failing it; the next pass reads them once the stack has settled.
pub struct StackOutputsResource {
    manager: Arc<StackManager>,
}

impl StackOutputsResource {
    pub fn new(manager: Arc<StackManager>) -> Self {
        Self { manager }
    }

    async fn read(&self, cluster: &Cluster) -> Result<MainOutputs> {
        let name = cluster.id.stack_name(StackRole::Main).to_string();
        let (outputs, status) = self.manager.describe_outputs_and_status(&name).await?;
        debug!(stack = %name, %status, outputs = outputs.len(), "read stack outputs");

        Ok(MainOutputs {
            vpc_id: StackManager::output_value(&outputs, VPC_ID_OUTPUT)?.to_string(),
            peering_connection_id: StackManager::output_value(&outputs, PEERING_CONNECTION_OUTPUT)?
                .to_string(),
            worker_group: StackManager::output_value(&outputs, WORKER_GROUP_OUTPUT)?.to_string(),
        })
    }
}

#[async_trait]
impl Resource<Cluster> for StackOutputsResource {
    type State = Option<MainOutputs>;
    type Create = ();
    type Update = ();
    type Delete = ();

    fn name(&self) -> &str {
        "stack-outputs"
    }

    async fn current_state(
        &self,
        cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<Option<MainOutputs>> {
        if cluster.deleting {
            return Ok(None);
        }

        let outputs = match self.read(cluster).await {
            Ok(outputs) => outputs,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::OutputsNotAccessible
                        | ErrorKind::NotFound(Missing::Stack)
                        | ErrorKind::NotFound(Missing::Output)
                ) =>
            {
                ctx.cancel_pass(err.to_string());
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let scratch = &mut ctx.scratch.outputs;
        scratch.vpc_id = Some(outputs.vpc_id.clone());
        scratch.peering_connection_id = Some(outputs.peering_connection_id.clone());
        scratch.worker_group = Some(outputs.worker_group.clone());
        Ok(Some(outputs))
    }

    async fn desired_state(
        &self,
        _cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<Option<MainOutputs>> {
        let scratch = &ctx.scratch.outputs;
        Ok(match (
            &scratch.vpc_id,
            &scratch.peering_connection_id,
            &scratch.worker_group,
        ) {
            (Some(vpc_id), Some(peering), Some(group)) => Some(MainOutputs {
                vpc_id: vpc_id.clone(),
                peering_connection_id: peering.clone(),
                worker_group: group.clone(),
            }),
            _ => None,
        })
    }

    fn compute_patch(
        &self,
        _cluster: &Cluster,
        _current: &Option<MainOutputs>,
        _desired: &Option<MainOutputs>,
    ) -> Result<Patch<(), (), ()>> {
        Ok(Patch::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests::cluster;
    use crate::stack::StackWaitConfig;
    use strato_cloud::{MockCloud, Output, StackDescription, StackStatus};

    fn resource(cloud: &Arc<MockCloud>) -> StackOutputsResource {
        StackOutputsResource::new(Arc::new(
            StackManager::new(cloud.clone(), StackWaitConfig::default()).unwrap(),
        ))
    }

    async fn seed(cloud: &MockCloud, status: StackStatus, outputs: Vec<Output>) {
        cloud
            .insert_stack(StackDescription {
                name: "demo-main".into(),
                status,
                status_reason: None,
                template_body: "{}".into(),
                parameters: vec![],
                capabilities: vec![],
                tags: vec![],
                outputs,
            })
            .await;
    }

    fn all_outputs() -> Vec<Output> {
        vec![
            Output::new(VPC_ID_OUTPUT, "vpc-cluster"),
            Output::new(PEERING_CONNECTION_OUTPUT, "pcx-1"),
            Output::new(WORKER_GROUP_OUTPUT, "demo-workers"),
        ]
    }

    #[tokio::test]
    async fn test_outputs_land_in_scratch() {
        let cloud = Arc::new(MockCloud::new());
        seed(&cloud, StackStatus::UpdateRollbackComplete, all_outputs()).await;
        let mut ctx = ControllerContext::<ClusterScratch>::new();

        let current = resource(&cloud)
            .current_state(&cluster("demo"), &mut ctx)
            .await
            .unwrap();

        assert_eq!(current.unwrap().worker_group, "demo-workers");
        assert_eq!(ctx.scratch.outputs.peering_connection_id.as_deref(), Some("pcx-1"));
        assert!(!ctx.is_canceled());
    }

    #[tokio::test]
    async fn test_unreadable_outputs_cancel_the_pass() {
        let cloud = Arc::new(MockCloud::new());
        seed(&cloud, StackStatus::UpdateInProgress, all_outputs()).await;
        let mut ctx = ControllerContext::<ClusterScratch>::new();

        let current = resource(&cloud)
            .current_state(&cluster("demo"), &mut ctx)
            .await
            .unwrap();
        assert!(current.is_none());
        assert!(ctx.cancel_reason().unwrap().contains("UPDATE_IN_PROGRESS"));
    }

    #[tokio::test]
    async fn test_missing_output_cancels_the_pass() {
        let cloud = Arc::new(MockCloud::new());
        seed(
            &cloud,
            StackStatus::CreateComplete,
            vec![Output::new(VPC_ID_OUTPUT, "vpc-cluster")],
        )
        .await;
        let mut ctx = ControllerContext::<ClusterScratch>::new();

        resource(&cloud)
            .current_state(&cluster("demo"), &mut ctx)
            .await
            .unwrap();
        assert!(ctx.is_canceled());
        assert!(ctx.scratch.outputs.vpc_id.is_none());
    }
}
