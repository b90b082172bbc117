//! Virtual network lookups by `Name` tag.

use async_trait::async_trait;

use crate::ApiError;

/// A route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
}

/// A virtual private cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vpc {
    pub id: String,
    pub name: String,
    pub cidr_block: String,
}

/// Provider network API. Both queries filter on the `Name` tag and may
/// return zero, one or many matches.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn describe_route_tables(&self, name: &str) -> Result<Vec<RouteTable>, ApiError>;

    async fn describe_vpcs(&self, name: &str) -> Result<Vec<Vpc>, ApiError>;
}
