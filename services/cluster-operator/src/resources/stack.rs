//! One resource type for every stack the cluster owns, configured per role.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use strato_cloud::{Capability, CreateStackInput, Parameter, StackStatus, Tag, UpdateStackInput};
use strato_id::StackRole;
use strato_reconcile::{
    ChangeKind, ControllerContext, Error, ErrorKind, Patch, Resource, Result, Snapshot, SpecHash,
};
use tracing::{debug, info};

use super::ownership_tags;
use crate::cluster::{Cluster, ClusterScratch};
use crate::stack::{CreateOutcome, DeleteOutcome, StackManager, StackPhase, UpdateOutcome};
use crate::template::{BundleSource, RenderRequest, TemplateRenderer};

/// What distinguishes one cluster stack from another.
#[derive(Debug, Clone)]
pub struct StackResourceConfig {
    pub name: &'static str,
    pub role: StackRole,
    pub capabilities: Vec<Capability>,
    /// Render the cluster's network, worker and DNS settings.
    pub uses_cluster_spec: bool,
    /// Render the host VPC and route tables discovered earlier in the pass.
    pub uses_host_network: bool,
    /// Render the main stack's peering connection. The pass is canceled
    /// while it is unknown.
    pub uses_main_outputs: bool,
    /// Certificate bundles fetched together before rendering.
    pub certificate_bundles: Option<[&'static str; 2]>,
}

impl StackResourceConfig {
    /// IAM roles the host account needs before the cluster exists.
    pub fn control_plane_pre() -> Self {
        Self {
            name: "stack-control-plane-pre",
            role: StackRole::ControlPlanePre,
            capabilities: vec![Capability::NamedIam],
            uses_cluster_spec: false,
            uses_host_network: false,
            uses_main_outputs: false,
            certificate_bundles: None,
        }
    }

    /// The cluster's own infrastructure.
    pub fn main() -> Self {
        Self {
            name: "stack-main",
            role: StackRole::Main,
            capabilities: vec![Capability::NamedIam],
            uses_cluster_spec: true,
            uses_host_network: true,
            uses_main_outputs: false,
            certificate_bundles: Some(["api", "etcd"]),
        }
    }

    /// Host routes towards the cluster VPC.
    pub fn control_plane_post() -> Self {
        Self {
            name: "stack-control-plane-post",
            role: StackRole::ControlPlanePost,
            capabilities: Vec::new(),
            uses_cluster_spec: false,
            uses_host_network: true,
            uses_main_outputs: true,
            certificate_bundles: None,
        }
    }
}

/// A stack's diffable shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSnapshot {
    pub name: String,
    pub template_body: String,
    pub parameters: Vec<Parameter>,
    /// Observed only.
    pub status: Option<StackStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackState(pub Option<StackSnapshot>);

impl Snapshot for StackState {
    fn is_absent(&self) -> bool {
        self.0.is_none()
    }

    /// Body and parameters; the status is the provider's business.
    fn same_as(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => {
                a.template_body == b.template_body
                    && by_key(&a.parameters) == by_key(&b.parameters)
            }
            (None, None) => true,
            _ => false,
        }
    }
}

/// Parameters sorted by key; the provider does not preserve their order.
fn by_key(parameters: &[Parameter]) -> Vec<(&str, &str)> {
    let mut pairs: Vec<_> = parameters
        .iter()
        .map(|p| (p.key.as_str(), p.value.as_str()))
        .collect();
    pairs.sort_unstable();
    pairs
}

pub struct StackResource {
    config: StackResourceConfig,
    manager: Arc<StackManager>,
    renderer: Arc<dyn TemplateRenderer>,
    bundles: Option<Arc<dyn BundleSource>>,
}

impl StackResource {
    /// Fails with `InvalidConfig` when the config asks for certificate
    /// bundles but no bundle source is given.
    pub fn new(
        config: StackResourceConfig,
        manager: Arc<StackManager>,
        renderer: Arc<dyn TemplateRenderer>,
        bundles: Option<Arc<dyn BundleSource>>,
    ) -> Result<Self> {
        if config.certificate_bundles.is_some() && bundles.is_none() {
            return Err(Error::InvalidConfig(format!(
                "{} needs a certificate bundle source",
                config.name
            )));
        }
        Ok(Self {
            config,
            manager,
            renderer,
            bundles,
        })
    }

    fn stack_name(&self, cluster: &Cluster) -> String {
        cluster.id.stack_name(self.config.role).to_string()
    }

    fn parameters(&self, cluster: &Cluster) -> Vec<Parameter> {
        vec![
            Parameter::new("ClusterID", cluster.id.as_str()),
            Parameter::new("ReleaseVersion", &cluster.spec.release_version),
        ]
    }

    /// Template values for this role. Returns `None` after canceling the pass
    /// when something the template needs is not known yet.
    async fn template_values(
        &self,
        cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let mut values = BTreeMap::new();
        values.insert("CredentialRef".to_string(), cluster.spec.credential_ref.clone());

        if self.config.uses_cluster_spec {
            let spec = &cluster.spec;
            values.extend([
                ("VpcCidr".to_string(), spec.network.vpc_cidr.clone()),
                (
                    "PrivateSubnetCidrs".to_string(),
                    spec.network.private_subnet_cidrs.join(","),
                ),
                (
                    "PublicSubnetCidrs".to_string(),
                    spec.network.public_subnet_cidrs.join(","),
                ),
                ("WorkerInstanceType".to_string(), spec.workers.instance_type.clone()),
                ("WorkerMinSize".to_string(), spec.workers.min_size.to_string()),
                ("WorkerMaxSize".to_string(), spec.workers.max_size.to_string()),
                (
                    "ControlPlaneInstanceType".to_string(),
                    spec.control_plane.instance_type.clone(),
                ),
                (
                    "ControlPlaneReplicas".to_string(),
                    spec.control_plane.replicas.to_string(),
                ),
                ("BaseDomain".to_string(), spec.dns.base_domain.clone()),
                ("HostedZoneId".to_string(), spec.dns.hosted_zone_id.clone()),
            ]);
        }

        if self.config.uses_host_network {
            let network = &ctx.scratch.network;
            let (Some(vpc_id), Some(vpc_cidr)) = (&network.host_vpc_id, &network.host_vpc_cidr)
            else {
                return Err(Error::ExecutionFailed(
                    "host network was not resolved earlier in the pass".to_string(),
                ));
            };
            let route_tables: Vec<&str> = network.route_tables.values().map(String::as_str).collect();
            values.extend([
                ("HostVpcId".to_string(), vpc_id.clone()),
                ("HostVpcCidr".to_string(), vpc_cidr.clone()),
                ("HostRouteTableIds".to_string(), route_tables.join(",")),
            ]);
        }

        if self.config.uses_main_outputs {
            let Some(peering) = ctx.scratch.outputs.peering_connection_id.clone() else {
                ctx.cancel_pass("main stack peering connection not known yet");
                return Ok(None);
            };
            values.insert("PeeringConnectionId".to_string(), peering);
            values.insert("ClusterVpcCidr".to_string(), cluster.spec.network.vpc_cidr.clone());
        }

        if let (Some([first, second]), Some(source)) =
            (self.config.certificate_bundles, &self.bundles)
        {
            let (a, b) = tokio::try_join!(
                source.fetch(&cluster.id, first),
                source.fetch(&cluster.id, second)
            )?;
            for bundle in [a, b] {
                values.insert(
                    format!("{}CertificateFingerprint", bundle.name),
                    bundle.fingerprint().to_string(),
                );
            }
        }

        Ok(Some(values))
    }
}

/// Turn "another operation is running" into a canceled pass.
fn defer_if_busy(
    result: Result<()>,
    ctx: &mut ControllerContext<ClusterScratch>,
) -> Result<()> {
    match result {
        Err(err) if matches!(err.kind(), ErrorKind::InProgress(_)) => {
            ctx.cancel_pass(err.to_string());
            Ok(())
        }
        other => other,
    }
}

#[async_trait]
impl Resource<Cluster> for StackResource {
    type State = StackState;
    type Create = StackSnapshot;
    type Update = StackSnapshot;
    type Delete = String;

    fn name(&self) -> &str {
        self.config.name
    }

    async fn current_state(
        &self,
        cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<StackState> {
        let name = self.stack_name(cluster);
        let Some(stack) = self.manager.describe(&name).await? else {
            return Ok(StackState(None));
        };

        let phase = StackPhase::from_status(&stack.status);
        if phase == StackPhase::Absent {
            return Ok(StackState(None));
        }
        if !cluster.deleting {
            if phase.is_transient() {
                ctx.cancel_pass(format!("stack {name} is {}", stack.status));
            } else if matches!(phase, StackPhase::Failed | StackPhase::DeleteFailed) {
                return Err(Error::StackFailed {
                    stack: name,
                    reason: stack.status_reason.unwrap_or_default(),
                    status: stack.status,
                });
            }
        }

        Ok(StackState(Some(StackSnapshot {
            name,
            template_body: stack.template_body,
            parameters: stack.parameters,
            status: Some(stack.status),
        })))
    }

    async fn desired_state(
        &self,
        cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
    ) -> Result<StackState> {
        if cluster.deleting {
            return Ok(StackState(None));
        }
        let Some(values) = self.template_values(cluster, ctx).await? else {
            return Ok(StackState(None));
        };

        let template_body = self.renderer.render(&RenderRequest {
            cluster_id: cluster.id.clone(),
            role: self.config.role,
            release_version: cluster.spec.release_version.clone(),
            values,
        })?;
        if self.config.role == StackRole::Main {
            ctx.scratch.outputs.main_template_hash =
                Some(SpecHash::from_bytes(template_body.as_bytes()));
        }

        Ok(StackState(Some(StackSnapshot {
            name: self.stack_name(cluster),
            template_body,
            parameters: self.parameters(cluster),
            status: None,
        })))
    }

    fn compute_patch(
        &self,
        _cluster: &Cluster,
        current: &StackState,
        desired: &StackState,
    ) -> Result<Patch<StackSnapshot, StackSnapshot, String>> {
        let kind = ChangeKind::decide(
            current.is_absent(),
            desired.is_absent(),
            current.same_as(desired),
        );
        Ok(match (kind, &current.0, &desired.0) {
            (ChangeKind::Create, _, Some(want)) => Patch::Create(want.clone()),
            (ChangeKind::Update, _, Some(want)) => Patch::Update(want.clone()),
            (ChangeKind::Delete, Some(have), _) => Patch::Delete(have.name.clone()),
            _ => Patch::Empty,
        })
    }

    async fn apply_create(
        &self,
        cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
        stack: StackSnapshot,
    ) -> Result<()> {
        let mut tags = ownership_tags(cluster);
        tags.push(Tag::new("strato.io/stack", self.config.role.as_str()));

        let input = CreateStackInput {
            name: stack.name.clone(),
            template_body: stack.template_body,
            parameters: stack.parameters,
            capabilities: self.config.capabilities.clone(),
            tags,
        };
        let result = match self.manager.create(input).await {
            Ok(CreateOutcome::Created(phase)) => {
                info!(stack = %stack.name, %phase, "stack created");
                Ok(())
            }
            Ok(CreateOutcome::AlreadyExists) => {
                debug!(stack = %stack.name, "stack existed already");
                Ok(())
            }
            Err(err) => Err(err),
        };
        defer_if_busy(result, ctx)
    }

    async fn apply_update(
        &self,
        _cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
        stack: StackSnapshot,
    ) -> Result<()> {
        let input = UpdateStackInput {
            name: stack.name.clone(),
            template_body: stack.template_body,
            parameters: stack.parameters,
            capabilities: self.config.capabilities.clone(),
        };
        let result = match self.manager.update(input).await {
            Ok(UpdateOutcome::Updated(phase)) => {
                info!(stack = %stack.name, %phase, "stack updated");
                Ok(())
            }
            Ok(UpdateOutcome::Unchanged) => Ok(()),
            Err(err) => Err(err),
        };
        defer_if_busy(result, ctx)
    }

    async fn apply_delete(
        &self,
        _cluster: &Cluster,
        ctx: &mut ControllerContext<ClusterScratch>,
        name: String,
    ) -> Result<()> {
        match self.manager.delete(&name).await? {
            DeleteOutcome::AlreadyAbsent => {}
            DeleteOutcome::Requested => {
                ctx.keep_finalizers(format!("deletion of stack {name} requested"));
                ctx.cancel_pass(format!("waiting for stack {name} to be deleted"));
            }
            DeleteOutcome::InProgress(operation) => {
                ctx.keep_finalizers(format!("{operation} of stack {name} in progress"));
                ctx.cancel_pass(format!("stack {name} busy with {operation}"));
            }
        }
        Ok(())
    }
}
