//! Discovers the host VPC and route tables the cluster peers with.

use async_trait::async_trait;
use strato_cloud::Vpc;
use strato_reconcile::{ControllerContext, Patch, Resource, Result};
use tracing::debug;

use crate::cluster::{Cluster, ClusterScratch};
use crate::lookup::{CachedLookup, RouteTableIndex, VpcIndex};

/// Observed host network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostNetwork {
    pub vpc: Option<Vpc>,
    /// Route table name to ID.
    pub route_tables: std::collections::BTreeMap<String, String>,
}

/// Observe-only: resolves names once per process and publishes the IDs to
/// the rest of the pass.
pub struct HostNetworkResource {
    vpcs: CachedLookup<VpcIndex>,
    route_tables: CachedLookup<RouteTableIndex>,
    vpc_name: String,
    route_table_names: Vec<String>,
}

impl HostNetworkResource {
    pub fn new(
        vpcs: CachedLookup<VpcIndex>,
        route_tables: CachedLookup<RouteTableIndex>,
        vpc_name: impl Into<String>,
        route_table_names: Vec<String>,
    ) -> Self {
        Self {
            vpcs,
            route_tables,
            vpc_name: vpc_name.into(),
            route_table_names,
        }
    }
}

#[async_trait]
impl Resource<Cluster> for HostNetworkResource {
    type State = HostNetwork;
    type Create = ();
    type Update = ();
    type Delete = ();

    fn name(&self) -> &str {
        "host-network"
    }

    async fn current_state(
        &self,
        _cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<HostNetwork> {
        let vpc = self.vpcs.lookup(&self.vpc_name).await?;
        let names: Vec<&str> = self.route_table_names.iter().map(String::as_str).collect();
        let route_tables = self.route_tables.lookup_all(&names).await?;
        debug!(vpc_id = %vpc.id, route_tables = route_tables.len(), "host network resolved");

        let network = &mut ctx.scratch.network;
        network.host_vpc_id = Some(vpc.id.clone());
        network.host_vpc_cidr = Some(vpc.cidr_block.clone());
        network.route_tables = route_tables.clone();

        Ok(HostNetwork {
            vpc: Some(vpc),
            route_tables,
        })
    }

    async fn desired_state(
        &self,
        _cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<HostNetwork> {
        // The host network is managed elsewhere; whatever exists is desired.
        let network = &ctx.scratch.network;
        Ok(HostNetwork {
            vpc: network.host_vpc_id.as_ref().map(|id| Vpc {
                id: id.clone(),
                name: self.vpc_name.clone(),
                cidr_block: network.host_vpc_cidr.clone().unwrap_or_default(),
            }),
            route_tables: network.route_tables.clone(),
        })
    }

    fn compute_patch(
        &self,
        _cluster: &Cluster,
        _current: &HostNetwork,
        _desired: &HostNetwork,
    ) -> Result<Patch<(), (), ()>> {
        Ok(Patch::Empty)
    }
}
