//! The reconciliation controller: runs a fixed pipeline of resources for one
//! declared object per pass.

use std::time::Instant;

use async_trait::async_trait;
use strato_id::PassId;
use tracing::{debug, info, instrument, warn};

use crate::{
    ChangeKind, ControllerContext, Error, Patch, Reconcilable, Resource, Result, ResultExt,
    RetryPolicy,
};

/// How a pass ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every resource ran.
    Completed,
    /// A resource asked to stop; the object should be reconciled again later.
    Canceled { resource: String, reason: String },
}

/// Summary of one pass.
#[derive(Debug)]
pub struct PassReport<S> {
    pub pass_id: PassId,
    pub outcome: PassOutcome,
    /// The declared object must not be finalized yet.
    pub keep_finalizers: bool,
    /// Change applied by each resource that ran, in run order.
    pub changes: Vec<(String, ChangeKind)>,
    /// Scratch state as the last resource left it.
    pub scratch: S,
}

impl<S> PassReport<S> {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, PassOutcome::Completed)
    }

    /// Deletion of the declared object may be finalized.
    pub fn may_finalize(&self) -> bool {
        self.is_completed() && !self.keep_finalizers
    }
}

/// Type-erased pipeline step; implemented for every [`Resource`].
#[async_trait]
trait Step<T: Reconcilable>: Send + Sync {
    fn step_name(&self) -> &str;

    async fn run(
        &self,
        obj: &T,
        ctx: &mut ControllerContext<T::Scratch>,
        policy: &RetryPolicy,
    ) -> Result<ChangeKind>;
}

#[async_trait]
impl<T, R> Step<T> for R
where
    T: Reconcilable,
    R: Resource<T>,
{
    fn step_name(&self) -> &str {
        self.name()
    }

    async fn run(
        &self,
        obj: &T,
        ctx: &mut ControllerContext<T::Scratch>,
        policy: &RetryPolicy,
    ) -> Result<ChangeKind> {
        let current = self
            .current_state(obj, ctx)
            .await
            .context("observing current state")?;
        if ctx.is_canceled() {
            return Ok(ChangeKind::None);
        }

        let desired = self
            .desired_state(obj, ctx)
            .await
            .context("computing desired state")?;
        if ctx.is_canceled() {
            return Ok(ChangeKind::None);
        }

        let patch = self
            .compute_patch(obj, &current, &desired)
            .context("computing patch")?;
        let kind = patch.kind();
        debug!(resource = self.name(), change = %kind, ?current, ?desired, "computed patch");
        if patch.is_empty() {
            return Ok(kind);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match apply(self, obj, ctx, &patch).await {
                Ok(()) => return Ok(kind),
                Err(err) => match policy.next_delay(&err, attempt) {
                    Some(delay) => {
                        warn!(
                            resource = self.name(),
                            change = %kind,
                            attempt,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "apply failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err::<ChangeKind, _>(err)
                            .with_context(|| format!("applying {kind}"))
                    }
                },
            }
        }
    }
}

async fn apply<T, R>(
    resource: &R,
    obj: &T,
    ctx: &mut ControllerContext<T::Scratch>,
    patch: &Patch<R::Create, R::Update, R::Delete>,
) -> Result<()>
where
    T: Reconcilable,
    R: Resource<T>,
{
    match patch {
        Patch::Empty => Ok(()),
        Patch::Create(change) => resource.apply_create(obj, ctx, change.clone()).await,
        Patch::Update(change) => resource.apply_update(obj, ctx, change.clone()).await,
        Patch::Delete(change) => resource.apply_delete(obj, ctx, change.clone()).await,
    }
}

/// Runs an ordered pipeline of resources against one declared object.
///
/// Resources run strictly one after another in pipeline order, or in reverse
/// order while the object is being deleted. A resource that cancels the pass
/// stops the pipeline; an error fails the pass.
pub struct Controller<T: Reconcilable> {
    name: String,
    steps: Vec<Box<dyn Step<T>>>,
    policy: RetryPolicy,
}

impl<T: Reconcilable + 'static> Controller<T> {
    pub fn builder(name: impl Into<String>) -> ControllerBuilder<T> {
        ControllerBuilder {
            name: name.into(),
            steps: Vec::new(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource names in pipeline order.
    pub fn resource_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step_name()).collect()
    }

    /// Run one pass with a fresh context.
    #[instrument(skip_all, fields(controller = %self.name, object = %obj.key()))]
    pub async fn reconcile(&self, obj: &T) -> Result<PassReport<T::Scratch>> {
        let mut ctx = ControllerContext::<T::Scratch>::new();
        let pass_id = ctx.pass_id();
        let deleting = obj.is_deleting();
        let started = Instant::now();
        info!(%pass_id, deleting, "starting reconciliation pass");

        let order: Box<dyn Iterator<Item = &Box<dyn Step<T>>> + Send + '_> = if deleting {
            Box::new(self.steps.iter().rev())
        } else {
            Box::new(self.steps.iter())
        };

        let mut changes = Vec::new();
        for step in order {
            let name = step.step_name();
            let change = step
                .run(obj, &mut ctx, &self.policy)
                .await
                .with_context(|| format!("resource {name}"))?;
            changes.push((name.to_string(), change));

            if ctx.is_canceled() {
                let reason = ctx.cancel_reason().unwrap_or_default().to_string();
                info!(
                    %pass_id,
                    resource = name,
                    reason = %reason,
                    keep_finalizers = ctx.finalizers_kept(),
                    "reconciliation pass canceled"
                );
                return Ok(PassReport {
                    pass_id,
                    outcome: PassOutcome::Canceled {
                        resource: name.to_string(),
                        reason,
                    },
                    keep_finalizers: ctx.finalizers_kept(),
                    changes,
                    scratch: ctx.into_scratch(),
                });
            }
        }

        info!(
            %pass_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            keep_finalizers = ctx.finalizers_kept(),
            "reconciliation pass completed"
        );
        Ok(PassReport {
            pass_id,
            outcome: PassOutcome::Completed,
            keep_finalizers: ctx.finalizers_kept(),
            changes,
            scratch: ctx.into_scratch(),
        })
    }
}

/// Assembles a [`Controller`]; the retry policy applies to every resource.
pub struct ControllerBuilder<T: Reconcilable> {
    name: String,
    steps: Vec<Box<dyn Step<T>>>,
    policy: RetryPolicy,
}

impl<T: Reconcilable + 'static> ControllerBuilder<T> {
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn resource<R>(mut self, resource: R) -> Self
    where
        R: Resource<T> + 'static,
    {
        self.steps.push(Box::new(resource));
        self
    }

    /// Fails if the pipeline is empty or two resources share a name.
    pub fn build(self) -> Result<Controller<T>> {
        if self.steps.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "controller {} has no resources",
                self.name
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_name()) {
                return Err(Error::InvalidConfig(format!(
                    "controller {} has duplicate resource {}",
                    self.name,
                    step.step_name()
                )));
            }
        }
        Ok(Controller {
            name: self.name,
            steps: self.steps,
            policy: self.policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::{ErrorKind, Missing, Operation, Snapshot};

    #[derive(Debug, Default)]
    struct Scratch {
        vpc_id: Option<String>,
        seen: Vec<String>,
    }

    struct Object {
        deleting: bool,
    }

    impl Reconcilable for Object {
        type Scratch = Scratch;

        fn key(&self) -> String {
            "demo".to_string()
        }

        fn is_deleting(&self) -> bool {
            self.deleting
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Value(Option<String>);

    impl Snapshot for Value {
        fn is_absent(&self) -> bool {
            self.0.is_none()
        }

        fn same_as(&self, other: &Self) -> bool {
            self == other
        }
    }

    /// Test resource with scripted behaviour.
    struct Fake {
        name: &'static str,
        current: Option<String>,
        desired: Option<String>,
        writes_vpc: bool,
        cancel: bool,
        failures: AtomicU32,
        failure: fn() -> Error,
        applied: Arc<Mutex<Vec<String>>>,
    }

    impl Fake {
        fn new(name: &'static str, applied: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                current: None,
                desired: None,
                writes_vpc: false,
                cancel: false,
                failures: AtomicU32::new(0),
                failure: || Error::in_progress(Operation::Update, "x"),
                applied,
            }
        }
    }

    #[async_trait]
    impl Resource<Object> for Fake {
        type State = Value;
        type Create = Value;
        type Update = Value;
        type Delete = Value;

        fn name(&self) -> &str {
            self.name
        }

        async fn current_state(
            &self,
            _obj: &Object,
            ctx: &mut ControllerContext<Scratch>,
        ) -> Result<Value> {
            ctx.scratch.seen.push(self.name.to_string());
            if self.writes_vpc {
                ctx.scratch.vpc_id = Some("vpc-1".to_string());
            }
            if self.cancel {
                ctx.cancel_pass("not ready");
            }
            Ok(Value(self.current.clone()))
        }

        async fn desired_state(
            &self,
            _obj: &Object,
            ctx: &mut ControllerContext<Scratch>,
        ) -> Result<Value> {
            Ok(Value(self.desired.clone().or(ctx.scratch.vpc_id.clone())))
        }

        fn compute_patch(
            &self,
            _obj: &Object,
            current: &Value,
            desired: &Value,
        ) -> Result<Patch<Value>> {
            Ok(Patch::diff(current, desired))
        }

        async fn apply_create(
            &self,
            _obj: &Object,
            _ctx: &mut ControllerContext<Scratch>,
            change: Value,
        ) -> Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err((self.failure)());
            }
            self.applied
                .lock()
                .unwrap()
                .push(format!("{}:create:{}", self.name, change.0.unwrap_or_default()));
            Ok(())
        }

        async fn apply_delete(
            &self,
            _obj: &Object,
            _ctx: &mut ControllerContext<Scratch>,
            change: Value,
        ) -> Result<()> {
            self.applied
                .lock()
                .unwrap()
                .push(format!("{}:delete:{}", self.name, change.0.unwrap_or_default()));
            Ok(())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_context_flows_between_resources() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut discover = Fake::new("discover", applied.clone());
        discover.writes_vpc = true;
        discover.current = Some("x".into());
        discover.desired = Some("x".into());
        let consumer = Fake::new("consumer", applied.clone());

        let controller = Controller::builder("test")
            .resource(discover)
            .resource(consumer)
            .build()
            .unwrap();
        let report = controller
            .reconcile(&Object { deleting: false })
            .await
            .unwrap();

        assert!(report.may_finalize());
        assert_eq!(
            report.changes,
            vec![
                ("discover".to_string(), ChangeKind::None),
                ("consumer".to_string(), ChangeKind::Create),
            ]
        );
        assert_eq!(*applied.lock().unwrap(), vec!["consumer:create:vpc-1"]);
    }

    #[tokio::test]
    async fn test_cancel_stops_pipeline_without_error() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut first = Fake::new("first", applied.clone());
        first.cancel = true;
        first.desired = Some("never".into());
        let second = Fake::new("second", applied.clone());

        let controller = Controller::builder("test")
            .resource(first)
            .resource(second)
            .build()
            .unwrap();
        let report = controller
            .reconcile(&Object { deleting: false })
            .await
            .unwrap();

        assert_eq!(
            report.outcome,
            PassOutcome::Canceled {
                resource: "first".to_string(),
                reason: "not ready".to_string(),
            }
        );
        assert!(!report.may_finalize());
        assert_eq!(report.scratch.seen, vec!["first"]);
        assert!(applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_runs_in_reverse() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut a = Fake::new("a", applied.clone());
        a.current = Some("a".into());
        let mut b = Fake::new("b", applied.clone());
        b.current = Some("b".into());

        let controller = Controller::builder("test")
            .resource(a)
            .resource(b)
            .build()
            .unwrap();
        let report = controller
            .reconcile(&Object { deleting: true })
            .await
            .unwrap();

        assert_eq!(report.scratch.seen, vec!["b", "a"]);
        assert_eq!(*applied.lock().unwrap(), vec!["b:delete:b", "a:delete:a"]);
    }

    #[tokio::test]
    async fn test_apply_retried_until_success() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut flaky = Fake::new("flaky", applied.clone());
        flaky.desired = Some("v".into());
        flaky.failures = AtomicU32::new(2);

        let controller = Controller::builder("test")
            .retry_policy(fast_policy())
            .resource(flaky)
            .build()
            .unwrap();
        controller
            .reconcile(&Object { deleting: false })
            .await
            .unwrap();

        assert_eq!(*applied.lock().unwrap(), vec!["flaky:create:v"]);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_pass_with_kind() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut broken = Fake::new("broken", applied.clone());
        broken.desired = Some("v".into());
        broken.failures = AtomicU32::new(5);
        broken.failure = || Error::TooManyResults {
            what: Missing::Vpc,
            name: "host".into(),
            count: 2,
        };

        let controller = Controller::builder("test")
            .retry_policy(fast_policy())
            .resource(broken)
            .build()
            .unwrap();
        let err = controller
            .reconcile(&Object { deleting: false })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TooManyResults);
        assert!(err.to_string().starts_with("resource broken: applying create"));
        // One attempt only.
        assert!(applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_builder_rejects_duplicates_and_empty() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let err = Controller::<Object>::builder("test")
            .resource(Fake::new("same", applied.clone()))
            .resource(Fake::new("same", applied))
            .build()
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        let err = Controller::<Object>::builder("empty").build().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }
}
