//! # strato-cloud
//!
//! The provider boundary of the reconciliation engine: the API traits the
//! engine calls, the data they exchange, and the provider error type.
//!
//! ## Modules
//!
//! - `stack`: declarative infrastructure stacks and their status enumeration
//! - `network`: route table and VPC lookups by `Name` tag
//! - `bucket`, `balancer`, `autoscaling`: the remaining managed primitives
//! - `error`: [`ApiError`] and code-then-substring error matchers
//! - `mock`: [`MockCloud`], an in-memory provider used by tests and dev mode

mod autoscaling;
mod balancer;
mod bucket;
pub mod error;
pub mod mock;
mod network;
mod stack;

pub use autoscaling::{
    AutoScalingApi, AutoScalingGroup, DefaultResult, LifecycleHook, LifecycleTransition,
};
pub use balancer::{LoadBalancer, LoadBalancerApi};
pub use bucket::{BucketApi, BucketInfo, LifecycleRule};
pub use error::*;
pub use mock::{MockCloud, MockOp};
pub use network::{NetworkApi, RouteTable, Vpc};
pub use stack::{
    Capability, CreateStackInput, Output, Parameter, StackApi, StackDescription, StackStatus,
    UpdateStackInput,
};

/// A key/value tag attached to provider resources.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
