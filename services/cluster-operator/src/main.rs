//! strato cluster operator
//!
//! Reconciles declared clusters toward their cloud infrastructure: buckets,
//! the stacks every cluster owns, host routing and the worker drain hook.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::json;
use strato_cloud::{AutoScalingGroup, MockCloud, Output, RouteTable, Vpc};
use strato_id::{ClusterId, StackRole};
use strato_operator::{
    cluster::{Cluster, ClusterSpec, InMemoryClusterStore},
    config,
    pipeline::{cluster_controller, Collaborators, Providers},
    resources::{PEERING_CONNECTION_OUTPUT, VPC_ID_OUTPUT, WORKER_GROUP_OUTPUT},
    template::{InMemoryBundleSource, JsonTemplateRenderer},
    worker::ClusterWorker,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to STRATO_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting strato cluster operator");
    info!(
        reconcile_interval_secs = config.reconcile_interval.as_secs(),
        host_vpc = %config.host_vpc_name,
        "Configuration loaded"
    );

    if !config.dev_mode {
        bail!("no cloud provider backend is configured; set STRATO_DEV=1 to run against the in-memory provider");
    }

    info!("Seeding in-memory provider (dev mode)");
    let cloud = Arc::new(MockCloud::new());
    let store = Arc::new(InMemoryClusterStore::new());
    let bundles = Arc::new(InMemoryBundleSource::new());
    seed_dev(&config, &cloud, &store, &bundles).await?;

    let controller = cluster_controller(
        &Providers::mock(cloud),
        &Collaborators {
            renderer: Arc::new(JsonTemplateRenderer),
            bundles,
            store: store.clone(),
        },
        &config.pipeline(),
    )?;

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = ClusterWorker::new(controller, store, config.worker());
    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    // Signal shutdown to the worker
    let _ = shutdown_tx.send(true);

    info!("Waiting for worker to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, worker_handle).await {
        warn!(error = %e, "Cluster worker did not shut down in time");
    }

    info!("Cluster operator shutdown complete");
    Ok(())
}

/// Host network, a demo cluster and what its stacks will report once created.
async fn seed_dev(
    config: &config::Config,
    cloud: &MockCloud,
    store: &InMemoryClusterStore,
    bundles: &InMemoryBundleSource,
) -> Result<()> {
    cloud
        .add_vpc(Vpc {
            id: "vpc-0host".to_string(),
            name: config.host_vpc_name.clone(),
            cidr_block: "10.0.0.0/16".to_string(),
        })
        .await;
    for (i, name) in config.host_route_tables.iter().enumerate() {
        cloud
            .add_route_table(RouteTable {
                id: format!("rtb-0host{i}"),
                name: name.clone(),
                vpc_id: "vpc-0host".to_string(),
            })
            .await;
    }

    let id = ClusterId::parse("demo")?;
    let spec: ClusterSpec = serde_json::from_value(json!({
        "release_version": "20.1.0",
        "credential_ref": "default/credential",
        "network": {
            "vpc_cidr": "10.1.0.0/16",
            "private_subnet_cidrs": ["10.1.0.0/19", "10.1.32.0/19"],
            "public_subnet_cidrs": ["10.1.64.0/19"]
        },
        "workers": { "instance_type": "m5.xlarge", "min_size": 3, "max_size": 10 },
        "control_plane": { "instance_type": "m5.large", "replicas": 1 },
        "dns": { "base_domain": "demo.dev.strato.local", "hosted_zone_id": "Z0DEV" }
    }))?;

    let worker_group = format!("{id}-workers");
    cloud
        .plan_outputs(
            id.stack_name(StackRole::Main).as_str(),
            vec![
                Output::new(VPC_ID_OUTPUT, "vpc-0demo"),
                Output::new(PEERING_CONNECTION_OUTPUT, "pcx-0demo"),
                Output::new(WORKER_GROUP_OUTPUT, worker_group.clone()),
            ],
        )
        .await;
    cloud
        .add_auto_scaling_group(AutoScalingGroup {
            name: worker_group,
            min_size: spec.workers.min_size,
            max_size: spec.workers.max_size,
            desired_capacity: spec.workers.min_size,
            lifecycle_hooks: Vec::new(),
        })
        .await;
    bundles.issue(&id, &["api", "etcd"]).await;

    let cluster = store.put(Cluster::new(id, spec)).await;
    info!(cluster = %cluster.id, "Seeded demo cluster");
    Ok(())
}
