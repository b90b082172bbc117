//! End-to-end cluster lifecycles through the worker and the full pipeline.

mod harness;

use std::time::Duration;

use harness::Env;
use strato_cloud::{ApiError, LoadBalancer, MockOp, Tag};
use strato_id::ClusterId;
use strato_operator::cluster::{Cluster, ClusterStore};
use strato_operator::resources::DRAIN_HOOK_NAME;
use strato_operator::worker::{ClusterOutcome, PassStats};
use strato_reconcile::{ConvergenceStatus, ErrorKind};
use tokio::sync::watch;

const STACKS: [&str; 3] = [
    "demo-control-plane-pre",
    "demo-main",
    "demo-control-plane-post",
];

fn converged(outcome: &ClusterOutcome) -> bool {
    *outcome == ClusterOutcome::Converged
}

#[tokio::test]
async fn fresh_cluster_converges_in_two_passes() {
    let env = Env::new().await;
    env.add_cluster("demo").await;

    assert_eq!(env.pass("demo").await, ClusterOutcome::Converging);
    for name in STACKS {
        assert!(env.cloud.stack(name).await.is_some(), "{name} missing");
    }
    assert_eq!(
        env.cloud.bucket_names().await,
        vec!["demo-access-logs".to_string(), "demo-data".to_string()]
    );
    let group = env.cloud.auto_scaling_group("demo-workers").await.unwrap();
    assert_eq!(group.lifecycle_hooks[0].name, DRAIN_HOOK_NAME);

    assert_eq!(env.pass("demo").await, ClusterOutcome::Converged);

    let cluster = env.cluster("demo").await.unwrap();
    assert_eq!(cluster.status.convergence, ConvergenceStatus::Converged);
    assert_eq!(cluster.status.worker_group.as_deref(), Some("demo-workers"));
    assert_eq!(cluster.status.desired_capacity, Some(4));
    assert!(cluster.status.main_template_hash.is_some());
    assert!(cluster.status.last_error.is_none());
}

#[tokio::test]
async fn converged_cluster_is_left_alone() {
    let env = Env::new().await;
    env.add_cluster("demo").await;
    env.passes_until("demo", 5, converged).await;

    let mutations = [
        MockOp::CreateStack,
        MockOp::UpdateStack,
        MockOp::DeleteStack,
        MockOp::CreateBucket,
        MockOp::PutLifecycle,
        MockOp::PutLifecycleHook,
    ];
    let mut before = Vec::new();
    for op in mutations {
        before.push(env.cloud.calls(op).await);
    }
    let version = env.cluster("demo").await.unwrap().version;

    assert_eq!(env.pass("demo").await, ClusterOutcome::Converged);

    for (op, count) in mutations.into_iter().zip(before) {
        assert_eq!(env.cloud.calls(op).await, count, "{op:?} called again");
    }
    assert_eq!(env.cluster("demo").await.unwrap().version, version);
}

#[tokio::test]
async fn spec_change_updates_the_main_stack() {
    let env = Env::new().await;
    env.add_cluster("demo").await;
    env.passes_until("demo", 5, converged).await;
    let old_hash = env
        .cluster("demo")
        .await
        .unwrap()
        .status
        .main_template_hash
        .unwrap();

    let mut cluster = env.cluster("demo").await.unwrap();
    cluster.spec.workers.max_size = 20;
    env.store.update(cluster).await.unwrap();

    assert_eq!(env.pass("demo").await, ClusterOutcome::Converging);
    let main = env.cloud.stack("demo-main").await.unwrap();
    assert!(main.template_body.contains("\"WorkerMaxSize\": \"20\""));
    assert_eq!(env.cloud.calls(MockOp::UpdateStack).await, 1);

    env.passes_until("demo", 3, converged).await;
    let new_hash = env
        .cluster("demo")
        .await
        .unwrap()
        .status
        .main_template_hash
        .unwrap();
    assert_ne!(old_hash, new_hash);
}

#[tokio::test]
async fn deletion_keeps_finalizers_until_stacks_are_gone() {
    let env = Env::new().await;
    env.add_cluster("demo").await;
    env.passes_until("demo", 5, converged).await;
    env.cloud
        .add_load_balancer(LoadBalancer {
            name: "demo-ingress".to_string(),
            tags: vec![Tag::new("kubernetes.io/cluster/demo", "owned")],
        })
        .await;

    let id = ClusterId::parse("demo").unwrap();
    env.store.mark_deleting(&id).await.unwrap();

    assert_eq!(env.pass("demo").await, ClusterOutcome::Deleting);
    assert!(env.cluster("demo").await.is_some());
    assert!(env.cloud.load_balancer_names().await.is_empty());
    // Deletion of the last stack in the pipeline was requested, nothing else.
    assert_eq!(env.cloud.calls(MockOp::DeleteStack).await, 1);
    assert!(env.cloud.stack("demo-main").await.is_some());

    let (_, passes) = env
        .passes_until("demo", 10, |o| *o == ClusterOutcome::Finalized)
        .await;
    assert_eq!(passes, 3);

    assert!(env.cluster("demo").await.is_none());
    for name in STACKS {
        assert!(env.cloud.stack(name).await.is_none(), "{name} left behind");
    }
    // The access log bucket outlives the cluster.
    assert_eq!(
        env.cloud.bucket_names().await,
        vec!["demo-access-logs".to_string()]
    );
}

#[tokio::test]
async fn persistent_failure_is_reported_then_cleared() {
    let env = Env::new().await;
    // No certificate bundles issued: rendering the main stack fails.
    env.store
        .put(Cluster::new(ClusterId::parse("demo").unwrap(), harness::spec()))
        .await;

    let first = env.pass("demo").await;
    assert_eq!(
        first,
        ClusterOutcome::Failed {
            kind: ErrorKind::Collaborator,
            exhausted: false
        }
    );
    let status = env.cluster("demo").await.unwrap().status;
    assert_eq!(status.convergence, ConvergenceStatus::Converging);
    assert_eq!(status.last_error_kind.as_deref(), Some("Collaborator"));
    assert!(status
        .last_error
        .as_deref()
        .unwrap()
        .contains("resource stack-main"));

    let second = env.pass("demo").await;
    assert!(matches!(second, ClusterOutcome::Failed { exhausted: true, .. }));
    assert_eq!(
        env.cluster("demo").await.unwrap().status.convergence,
        ConvergenceStatus::NotConverged
    );

    // Fixing the collaborator lets the cluster make progress again.
    let id = ClusterId::parse("demo").unwrap();
    env.bundles.issue(&id, &["api", "etcd"]).await;
    assert!(!matches!(env.pass("demo").await, ClusterOutcome::Failed { .. }));
    let status = env.cluster("demo").await.unwrap().status;
    assert!(status.last_error.is_none());
    assert_ne!(status.convergence, ConvergenceStatus::NotConverged);
}

#[tokio::test]
async fn transient_provider_errors_are_retried_within_the_pass() {
    let env = Env::new().await;
    env.add_cluster("demo").await;
    env.cloud
        .fail_next(
            MockOp::CreateBucket,
            ApiError::new("Throttling", "Rate exceeded"),
        )
        .await;

    assert_eq!(env.pass("demo").await, ClusterOutcome::Converging);
    assert_eq!(env.cloud.calls(MockOp::CreateBucket).await, 3);
    assert_eq!(env.cloud.bucket_names().await.len(), 2);
}

#[tokio::test]
async fn reconcile_all_covers_every_cluster() {
    let env = Env::new().await;
    env.add_cluster("alpha").await;
    env.add_cluster("beta").await;

    let stats = env.worker.reconcile_all().await.unwrap();
    assert_eq!(
        stats,
        PassStats {
            clusters_processed: 2,
            converging: 2,
            ..Default::default()
        }
    );

    let stats = env.worker.reconcile_all().await.unwrap();
    assert_eq!(stats.converged, 2);
    assert!(env.cloud.stack("alpha-main").await.is_some());
    assert!(env.cloud.stack("beta-main").await.is_some());
}

#[tokio::test]
async fn worker_loop_runs_until_shutdown() {
    let env = Env::new().await;
    env.add_cluster("demo").await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = env.worker.clone();
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = env.cluster("demo").await.unwrap().status;
        if status.convergence == ConvergenceStatus::Converged {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "cluster did not converge under the worker loop"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker stops on shutdown")
        .unwrap();
}
