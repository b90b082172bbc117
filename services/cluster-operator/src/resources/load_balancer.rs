//! Load balancers created by workloads inside the cluster.
//!
//! They live outside the stacks and keep the cluster VPC from being deleted,
//! so teardown removes every load balancer tagged as owned by the cluster.
//! Nothing is queried while the cluster is live.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use strato_cloud::{LoadBalancerApi, LOAD_BALANCER_NOT_FOUND};
use strato_reconcile::{ControllerContext, Patch, Resource, Result, ResultExt};
use tracing::{debug, info};

use crate::cluster::{Cluster, ClusterScratch};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBalancers(pub BTreeSet<String>);

pub struct LoadBalancerResource {
    api: Arc<dyn LoadBalancerApi>,
}

impl LoadBalancerResource {
    pub fn new(api: Arc<dyn LoadBalancerApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Resource<Cluster> for LoadBalancerResource {
    type State = LoadBalancers;
    type Create = ();
    type Update = ();
    type Delete = Vec<String>;

    fn name(&self) -> &str {
        "load-balancer"
    }

    async fn current_state(
        &self,
        cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<LoadBalancers> {
        if !cluster.deleting {
            return Ok(LoadBalancers::default());
        }
        let key = cluster.ownership_tag_key();
        let found = self
            .api
            .describe_load_balancers(&key, "owned")
            .await
            .with_context(|| format!("listing load balancers tagged {key}"))?;
        Ok(LoadBalancers(found.into_iter().map(|lb| lb.name).collect()))
    }

    async fn desired_state(
        &self,
        _cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<LoadBalancers> {
        Ok(LoadBalancers::default())
    }

    fn compute_patch(
        &self,
        _cluster: &Cluster,
        current: &LoadBalancers,
        desired: &LoadBalancers,
    ) -> Result<Patch<(), (), Vec<String>>> {
        let stale: Vec<String> = current.0.difference(&desired.0).cloned().collect();
        if stale.is_empty() {
            return Ok(Patch::Empty);
        }
        Ok(Patch::Delete(stale))
    }

    async fn apply_delete(
        &self,
        _cluster: &Cluster,
        _ctx: &mut ControllerContext<ClusterScratch>,
        names: Vec<String>,
    ) -> Result<()> {
        for name in &names {
            match self.api.delete_load_balancer(name).await {
                Ok(()) => info!(load_balancer = %name, "load balancer deleted"),
                Err(err) if err.is(&LOAD_BALANCER_NOT_FOUND) => {
                    debug!(load_balancer = %name, "load balancer already gone");
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("deleting load balancer {name}"))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests::cluster;
    use strato_cloud::{LoadBalancer, MockCloud, MockOp, Tag};

    async fn cloud() -> Arc<MockCloud> {
        let cloud = Arc::new(MockCloud::new());
        cloud
            .add_load_balancer(LoadBalancer {
                name: "demo-ingress".into(),
                tags: vec![Tag::new("kubernetes.io/cluster/demo", "owned")],
            })
            .await;
        cloud
            .add_load_balancer(LoadBalancer {
                name: "other-ingress".into(),
                tags: vec![Tag::new("kubernetes.io/cluster/other", "owned")],
            })
            .await;
        cloud
    }

    #[tokio::test]
    async fn test_live_cluster_is_not_queried() {
        let cloud = cloud().await;
        let resource = LoadBalancerResource::new(cloud.clone());
        let mut ctx = ControllerContext::<ClusterScratch>::new();

        let current = resource
            .current_state(&cluster("demo"), &mut ctx)
            .await
            .unwrap();
        assert!(current.0.is_empty());
        assert_eq!(cloud.calls(MockOp::DescribeLoadBalancers).await, 0);
    }

    #[tokio::test]
    async fn test_teardown_deletes_only_owned() {
        let cloud = cloud().await;
        let resource = LoadBalancerResource::new(cloud.clone());
        let mut demo = cluster("demo");
        demo.deleting = true;
        let mut ctx = ControllerContext::<ClusterScratch>::new();

        let current = resource.current_state(&demo, &mut ctx).await.unwrap();
        let desired = resource.desired_state(&demo, &mut ctx).await.unwrap();
        let Patch::Delete(names) = resource.compute_patch(&demo, &current, &desired).unwrap()
        else {
            panic!("expected delete");
        };
        assert_eq!(names, vec!["demo-ingress".to_string()]);

        // Racing deletion elsewhere is fine.
        let mut names = names;
        names.push("demo-vanished".into());
        resource.apply_delete(&demo, &mut ctx, names).await.unwrap();
        assert_eq!(cloud.load_balancer_names().await, vec!["other-ingress".to_string()]);
    }
}
