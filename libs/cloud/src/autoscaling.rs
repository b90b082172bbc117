//! Autoscaling groups and their lifecycle hooks.

use async_trait::async_trait;

use crate::ApiError;

/// Transition a lifecycle hook intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleTransition {
    InstanceLaunching,
    InstanceTerminating,
}

impl LifecycleTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleTransition::InstanceLaunching => "autoscaling:EC2_INSTANCE_LAUNCHING",
            LifecycleTransition::InstanceTerminating => "autoscaling:EC2_INSTANCE_TERMINATING",
        }
    }
}

/// What happens when a hook times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultResult {
    Continue,
    Abandon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleHook {
    pub name: String,
    pub transition: LifecycleTransition,
    pub heartbeat_timeout_secs: u32,
    pub default_result: DefaultResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoScalingGroup {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub lifecycle_hooks: Vec<LifecycleHook>,
}

/// Provider autoscaling API.
#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    /// Fails with `AutoScalingGroupNotFound` when the group does not exist.
    async fn describe_auto_scaling_group(&self, name: &str)
        -> Result<AutoScalingGroup, ApiError>;

    /// Creates or replaces the hook with the same name.
    async fn put_lifecycle_hook(&self, group: &str, hook: LifecycleHook) -> Result<(), ApiError>;

    async fn delete_lifecycle_hook(&self, group: &str, hook: &str) -> Result<(), ApiError>;
}
