//! Load balancers created outside the stacks (by workloads in the cluster).

use async_trait::async_trait;

use crate::{ApiError, Tag};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    pub name: String,
    pub tags: Vec<Tag>,
}

/// Provider load balancer API.
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    /// Load balancers carrying the tag `key=value`.
    async fn describe_load_balancers(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<LoadBalancer>, ApiError>;

    /// Fails with `LoadBalancerNotFound` when it does not exist.
    async fn delete_load_balancer(&self, name: &str) -> Result<(), ApiError>;
}
