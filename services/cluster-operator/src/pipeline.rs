//! Assembles the cluster pipeline from providers and collaborators.

use std::sync::Arc;

use strato_cloud::{
    AutoScalingApi, BucketApi, LoadBalancerApi, MockCloud, NetworkApi, StackApi,
};
use strato_reconcile::{Controller, Error, Result, RetryPolicy};

use crate::cluster::{Cluster, ClusterStore};
use crate::lookup::{CachedLookup, RouteTableIndex, VpcIndex};
use crate::resources::{
    BucketResource, ClusterStatusResource, HostNetworkResource, LifecycleHookResource,
    LoadBalancerResource, StackOutputsResource, StackResource, StackResourceConfig,
};
use crate::stack::{StackManager, StackWaitConfig};
use crate::template::{BundleSource, TemplateRenderer};

/// Default heartbeat timeout of the worker drain hook.
pub const DEFAULT_DRAIN_HEARTBEAT_SECS: u32 = 300;

/// Provider APIs the pipeline talks to.
#[derive(Clone)]
pub struct Providers {
    pub stacks: Arc<dyn StackApi>,
    pub network: Arc<dyn NetworkApi>,
    pub buckets: Arc<dyn BucketApi>,
    pub balancers: Arc<dyn LoadBalancerApi>,
    pub scaling: Arc<dyn AutoScalingApi>,
}

impl Providers {
    /// Every API served by one in-memory provider.
    pub fn mock(cloud: Arc<MockCloud>) -> Self {
        Self {
            stacks: cloud.clone(),
            network: cloud.clone(),
            buckets: cloud.clone(),
            balancers: cloud.clone(),
            scaling: cloud,
        }
    }
}

/// Services the pipeline calls that are not cloud provider APIs.
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn TemplateRenderer>,
    pub bundles: Arc<dyn BundleSource>,
    pub store: Arc<dyn ClusterStore>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// `Name` tag of the host VPC clusters peer with.
    pub host_vpc_name: String,
    /// `Name` tags of the host route tables that get routes to clusters.
    pub host_route_tables: Vec<String>,
    pub stack_wait: StackWaitConfig,
    pub retry: RetryPolicy,
    pub drain_heartbeat_timeout_secs: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            host_vpc_name: "host".to_string(),
            host_route_tables: vec!["host-private-a".to_string(), "host-private-b".to_string()],
            stack_wait: StackWaitConfig::default(),
            retry: RetryPolicy::default(),
            drain_heartbeat_timeout_secs: DEFAULT_DRAIN_HEARTBEAT_SECS,
        }
    }
}

/// Build the controller for clusters.
///
/// Lookup caches live inside the returned controller, so names resolve once
/// per controller rather than once per pass.
pub fn cluster_controller(
    providers: &Providers,
    collaborators: &Collaborators,
    config: &PipelineConfig,
) -> Result<Controller<Cluster>> {
    if config.host_vpc_name.is_empty() {
        return Err(Error::InvalidConfig("host VPC name is empty".to_string()));
    }
    let stacks = Arc::new(StackManager::new(
        providers.stacks.clone(),
        config.stack_wait.clone(),
    )?);

    let host_network = HostNetworkResource::new(
        CachedLookup::new(VpcIndex::new(providers.network.clone())),
        CachedLookup::new(RouteTableIndex::new(providers.network.clone())),
        config.host_vpc_name.clone(),
        config.host_route_tables.clone(),
    );
    let stack = |stack_config: StackResourceConfig| {
        let bundles = stack_config
            .certificate_bundles
            .map(|_| collaborators.bundles.clone());
        StackResource::new(
            stack_config,
            stacks.clone(),
            collaborators.renderer.clone(),
            bundles,
        )
    };

    Controller::builder("cluster")
        .retry_policy(config.retry.clone())
        .resource(host_network)
        .resource(BucketResource::new(providers.buckets.clone()))
        .resource(stack(StackResourceConfig::control_plane_pre())?)
        .resource(stack(StackResourceConfig::main())?)
        .resource(StackOutputsResource::new(stacks.clone()))
        .resource(stack(StackResourceConfig::control_plane_post())?)
        .resource(LoadBalancerResource::new(providers.balancers.clone()))
        .resource(LifecycleHookResource::new(
            providers.scaling.clone(),
            config.drain_heartbeat_timeout_secs,
        ))
        .resource(ClusterStatusResource::new(collaborators.store.clone()))
        .build()
}
