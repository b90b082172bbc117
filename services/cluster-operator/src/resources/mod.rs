//! The concrete resources of the cluster pipeline.
//!
//! Each one manages a single infrastructure concern. They are listed here in
//! pipeline order; deletion walks them in reverse.

mod bucket;
mod cluster_status;
mod host_network;
mod lifecycle_hook;
mod load_balancer;
mod stack;
mod stack_outputs;

pub use bucket::{buckets_to_create, buckets_to_delete, BucketResource, BucketSpec, Buckets};
pub use cluster_status::{ClusterStatusResource, StatusFields};
pub use host_network::{HostNetwork, HostNetworkResource};
pub use lifecycle_hook::{HookState, LifecycleHookResource, DRAIN_HOOK_NAME};
pub use load_balancer::{LoadBalancerResource, LoadBalancers};
pub use stack::{StackResource, StackResourceConfig, StackSnapshot, StackState};
pub use stack_outputs::{
    MainOutputs, StackOutputsResource, PEERING_CONNECTION_OUTPUT, VPC_ID_OUTPUT,
    WORKER_GROUP_OUTPUT,
};

use strato_cloud::Tag;

use crate::cluster::Cluster;

/// Tags every provider object created for `cluster` carries.
pub(crate) fn ownership_tags(cluster: &Cluster) -> Vec<Tag> {
    vec![
        Tag::new(cluster.ownership_tag_key(), "owned"),
        Tag::new("strato.io/cluster", cluster.id.as_str()),
    ]
}
