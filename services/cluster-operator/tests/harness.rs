//! Test harness for cluster operator integration tests.
//!
//! Wires the full pipeline against `MockCloud` with millisecond polling and
//! backoff so whole cluster lifecycles run in a few milliseconds.

use std::sync::Arc;
use std::time::Duration;

use strato_cloud::{
    AutoScalingGroup, MockCloud, Output, RouteTable, StackDescription, StackStatus, Vpc,
};
use strato_id::{ClusterId, StackRole};
use strato_operator::cluster::{
    Cluster, ClusterSpec, ClusterStore, ControlPlaneSpec, DnsSpec, InMemoryClusterStore,
    NetworkSpec, WorkerSpec,
};
use strato_operator::pipeline::{cluster_controller, Collaborators, PipelineConfig, Providers};
use strato_operator::resources::{PEERING_CONNECTION_OUTPUT, VPC_ID_OUTPUT, WORKER_GROUP_OUTPUT};
use strato_operator::stack::{StackManager, StackWaitConfig};
use strato_operator::template::{InMemoryBundleSource, JsonTemplateRenderer};
use strato_operator::worker::{ClusterOutcome, ClusterWorker, WorkerConfig};
use strato_reconcile::RetryPolicy;

pub const HOST_VPC: &str = "host";
pub const HOST_ROUTE_TABLES: [&str; 2] = ["host-private-a", "host-private-b"];

#[allow(dead_code)]
pub fn fast_wait() -> StackWaitConfig {
    StackWaitConfig {
        poll_interval: Duration::from_millis(1),
        timeout: Duration::from_secs(2),
    }
}

#[allow(dead_code)]
pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        host_vpc_name: HOST_VPC.to_string(),
        host_route_tables: HOST_ROUTE_TABLES.iter().map(|s| s.to_string()).collect(),
        stack_wait: fast_wait(),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
        drain_heartbeat_timeout_secs: 300,
    }
}

#[allow(dead_code)]
pub fn manager(cloud: &Arc<MockCloud>) -> StackManager {
    StackManager::new(cloud.clone(), fast_wait()).unwrap()
}

#[allow(dead_code)]
pub fn spec() -> ClusterSpec {
    ClusterSpec {
        release_version: "20.1.0".to_string(),
        credential_ref: "default/credential".to_string(),
        network: NetworkSpec {
            vpc_cidr: "10.1.0.0/16".to_string(),
            private_subnet_cidrs: vec!["10.1.0.0/19".to_string()],
            public_subnet_cidrs: vec!["10.1.32.0/19".to_string()],
        },
        workers: WorkerSpec {
            instance_type: "m5.xlarge".to_string(),
            min_size: 3,
            max_size: 10,
        },
        control_plane: ControlPlaneSpec {
            instance_type: "m5.large".to_string(),
            replicas: 1,
        },
        dns: DnsSpec {
            base_domain: "demo.example.com".to_string(),
            hosted_zone_id: "Z123".to_string(),
        },
        log_retention_days: 30,
    }
}

/// A stack as the provider would describe it.
#[allow(dead_code)]
pub fn stack(name: &str, status: StackStatus, outputs: Vec<Output>) -> StackDescription {
    StackDescription {
        name: name.to_string(),
        status,
        status_reason: None,
        template_body: "{}".to_string(),
        parameters: vec![],
        capabilities: vec![],
        tags: vec![],
        outputs,
    }
}

/// The whole operator wired against one mock provider.
#[allow(dead_code)]
pub struct Env {
    pub cloud: Arc<MockCloud>,
    pub store: Arc<InMemoryClusterStore>,
    pub bundles: Arc<InMemoryBundleSource>,
    pub worker: ClusterWorker,
}

#[allow(dead_code)]
impl Env {
    pub async fn new() -> Self {
        Self::with_worker_config(WorkerConfig {
            interval: Duration::from_millis(10),
            max_concurrent: 2,
            max_failed_passes: 2,
            failure_window: Duration::from_secs(60),
        })
        .await
    }

    pub async fn with_worker_config(worker_config: WorkerConfig) -> Self {
        let cloud = Arc::new(MockCloud::new());
        cloud
            .add_vpc(Vpc {
                id: "vpc-host".to_string(),
                name: HOST_VPC.to_string(),
                cidr_block: "10.0.0.0/16".to_string(),
            })
            .await;
        for (i, name) in HOST_ROUTE_TABLES.iter().enumerate() {
            cloud
                .add_route_table(RouteTable {
                    id: format!("rtb-{i}"),
                    name: name.to_string(),
                    vpc_id: "vpc-host".to_string(),
                })
                .await;
        }

        let store = Arc::new(InMemoryClusterStore::new());
        let bundles = Arc::new(InMemoryBundleSource::new());
        let controller = cluster_controller(
            &Providers::mock(cloud.clone()),
            &Collaborators {
                renderer: Arc::new(JsonTemplateRenderer),
                bundles: bundles.clone(),
                store: store.clone(),
            },
            &pipeline_config(),
        )
        .unwrap();
        let worker = ClusterWorker::new(controller, store.clone(), worker_config);

        Self {
            cloud,
            store,
            bundles,
            worker,
        }
    }

    /// Declare a cluster and plan what its main stack reports once created.
    pub async fn add_cluster(&self, id: &str) -> Cluster {
        let id = ClusterId::parse(id).unwrap();
        let worker_group = format!("{id}-workers");
        self.cloud
            .plan_outputs(
                id.stack_name(StackRole::Main).as_str(),
                vec![
                    Output::new(VPC_ID_OUTPUT, format!("vpc-{id}")),
                    Output::new(PEERING_CONNECTION_OUTPUT, format!("pcx-{id}")),
                    Output::new(WORKER_GROUP_OUTPUT, worker_group.clone()),
                ],
            )
            .await;
        self.cloud
            .add_auto_scaling_group(AutoScalingGroup {
                name: worker_group,
                min_size: 3,
                max_size: 10,
                desired_capacity: 4,
                lifecycle_hooks: vec![],
            })
            .await;
        self.bundles.issue(&id, &["api", "etcd"]).await;
        self.store.put(Cluster::new(id, spec())).await
    }

    pub async fn cluster(&self, id: &str) -> Option<Cluster> {
        self.store
            .get(&ClusterId::parse(id).unwrap())
            .await
            .unwrap()
    }

    /// One pass for the stored cluster `id`.
    pub async fn pass(&self, id: &str) -> ClusterOutcome {
        let cluster = self.cluster(id).await.expect("cluster is stored");
        self.worker.reconcile_one(&cluster).await.unwrap()
    }

    /// Passes until `done` holds for the outcome, at most `max` of them.
    pub async fn passes_until(
        &self,
        id: &str,
        max: usize,
        done: impl Fn(&ClusterOutcome) -> bool,
    ) -> (ClusterOutcome, usize) {
        for n in 1..=max {
            let outcome = self.pass(id).await;
            if done(&outcome) {
                return (outcome, n);
            }
        }
        panic!("cluster {id} did not settle within {max} passes");
    }
}
