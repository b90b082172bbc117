//! In-memory provider for tests and local development.
//!
//! Stacks move through their statuses one step per `describe_stacks` call,
//! which is enough to exercise polling without real time passing. Every API
//! call is counted, and failures can be queued per operation.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::codes;
use crate::{
    ApiError, AutoScalingApi, AutoScalingGroup, BucketApi, BucketInfo, CreateStackInput,
    LifecycleHook, LifecycleRule, LoadBalancer, LoadBalancerApi, NetworkApi, Output, RouteTable,
    StackApi, StackDescription, StackStatus, Tag, UpdateStackInput, Vpc,
};

/// Operations of the mock, used for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MockOp {
    CreateStack,
    UpdateStack,
    DeleteStack,
    DescribeStacks,
    DescribeRouteTables,
    DescribeVpcs,
    HeadBucket,
    CreateBucket,
    PutLifecycle,
    PutAccessLogging,
    DeleteObjects,
    DeleteBucket,
    DescribeLoadBalancers,
    DeleteLoadBalancer,
    DescribeAutoScalingGroup,
    PutLifecycleHook,
    DeleteLifecycleHook,
}

struct MockStack {
    description: StackDescription,
    /// Statuses still to come, one per describe call.
    pending: VecDeque<StackStatus>,
}

struct MockBucket {
    info: BucketInfo,
    objects: usize,
}

#[derive(Default)]
struct MockState {
    stacks: BTreeMap<String, MockStack>,
    duplicated: BTreeSet<String>,
    planned_outputs: BTreeMap<String, Vec<Output>>,
    planned_transitions: BTreeMap<String, VecDeque<StackStatus>>,
    route_tables: Vec<RouteTable>,
    vpcs: Vec<Vpc>,
    buckets: BTreeMap<String, MockBucket>,
    load_balancers: Vec<LoadBalancer>,
    groups: BTreeMap<String, AutoScalingGroup>,
    failures: BTreeMap<MockOp, VecDeque<ApiError>>,
    calls: BTreeMap<MockOp, usize>,
}

/// In-memory implementation of every provider API.
#[derive(Default)]
pub struct MockCloud {
    state: Mutex<MockState>,
}

impl MockCloud {
    /// Create an empty mock provider.
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    /// Insert a stack as if it already existed.
    pub async fn insert_stack(&self, description: StackDescription) {
        let mut state = self.state.lock().await;
        state.stacks.insert(
            description.name.clone(),
            MockStack {
                description,
                pending: VecDeque::new(),
            },
        );
    }

    /// Make `describe_stacks` return the stack twice.
    pub async fn duplicate_stack(&self, name: &str) {
        self.state.lock().await.duplicated.insert(name.to_string());
    }

    /// Outputs the stack will expose once created.
    pub async fn plan_outputs(&self, stack: &str, outputs: Vec<Output>) {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.stacks.get_mut(stack) {
            existing.description.outputs = outputs.clone();
        }
        state.planned_outputs.insert(stack.to_string(), outputs);
    }

    /// Statuses the next create, update or delete of `stack` walks through,
    /// replacing the default successful path.
    pub async fn plan_transitions(&self, stack: &str, statuses: Vec<StackStatus>) {
        self.state
            .lock()
            .await
            .planned_transitions
            .insert(stack.to_string(), statuses.into());
    }

    pub async fn add_route_table(&self, route_table: RouteTable) {
        self.state.lock().await.route_tables.push(route_table);
    }

    pub async fn add_vpc(&self, vpc: Vpc) {
        self.state.lock().await.vpcs.push(vpc);
    }

    pub async fn add_bucket(&self, info: BucketInfo, objects: usize) {
        self.state
            .lock()
            .await
            .buckets
            .insert(info.name.clone(), MockBucket { info, objects });
    }

    pub async fn add_load_balancer(&self, load_balancer: LoadBalancer) {
        self.state.lock().await.load_balancers.push(load_balancer);
    }

    pub async fn add_auto_scaling_group(&self, group: AutoScalingGroup) {
        self.state
            .lock()
            .await
            .groups
            .insert(group.name.clone(), group);
    }

    /// Fail the next call of `op` with `err`. Queued failures are consumed in
    /// order.
    pub async fn fail_next(&self, op: MockOp, err: ApiError) {
        self.state
            .lock()
            .await
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Number of calls made to `op`, including failed ones.
    pub async fn calls(&self, op: MockOp) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// The stack without advancing its status.
    pub async fn stack(&self, name: &str) -> Option<StackDescription> {
        self.state
            .lock()
            .await
            .stacks
            .get(name)
            .map(|s| s.description.clone())
    }

    pub async fn bucket(&self, name: &str) -> Option<BucketInfo> {
        self.state
            .lock()
            .await
            .buckets
            .get(name)
            .map(|b| b.info.clone())
    }

    pub async fn bucket_names(&self) -> Vec<String> {
        self.state.lock().await.buckets.keys().cloned().collect()
    }

    pub async fn load_balancer_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .load_balancers
            .iter()
            .map(|lb| lb.name.clone())
            .collect()
    }

    pub async fn auto_scaling_group(&self, name: &str) -> Option<AutoScalingGroup> {
        self.state.lock().await.groups.get(name).cloned()
    }

    /// Count the call and pop an injected failure, if any.
    async fn begin(&self, op: MockOp) -> Result<MutexGuard<'_, MockState>, ApiError> {
        let mut state = self.state.lock().await;
        *state.calls.entry(op).or_default() += 1;
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            debug!(?op, error = %err, "[MOCK] Injected failure");
            return Err(err);
        }
        Ok(state)
    }
}

fn stack_not_found(name: &str) -> ApiError {
    ApiError::new(
        codes::VALIDATION_ERROR,
        format!("Stack with id {name} does not exist"),
    )
}

fn invalid_stack_state(name: &str, status: &StackStatus, verb: &str) -> ApiError {
    ApiError::new(
        codes::VALIDATION_ERROR,
        format!(
            "Stack:arn:aws:cloudformation:eu-central-1:000000000000:stack/{name} is in {status} state and can not be {verb}."
        ),
    )
}

fn no_such_bucket() -> ApiError {
    ApiError::new(
        codes::NO_SUCH_BUCKET,
        "The specified bucket does not exist",
    )
}

#[async_trait]
impl StackApi for MockCloud {
    async fn create_stack(&self, input: CreateStackInput) -> Result<(), ApiError> {
        let mut guard = self.begin(MockOp::CreateStack).await?;
        let state = &mut *guard;

        if state.stacks.contains_key(&input.name) {
            return Err(ApiError::new(
                codes::ALREADY_EXISTS,
                format!("Stack [{}] already exists", input.name),
            ));
        }

        let pending = state
            .planned_transitions
            .remove(&input.name)
            .unwrap_or_else(|| VecDeque::from([StackStatus::CreateComplete]));
        let outputs = state
            .planned_outputs
            .get(&input.name)
            .cloned()
            .unwrap_or_default();

        info!(stack = %input.name, "[MOCK] Creating stack");
        state.stacks.insert(
            input.name.clone(),
            MockStack {
                description: StackDescription {
                    name: input.name,
                    status: StackStatus::CreateInProgress,
                    status_reason: None,
                    template_body: input.template_body,
                    parameters: input.parameters,
                    capabilities: input.capabilities,
                    tags: input.tags,
                    outputs,
                },
                pending,
            },
        );
        Ok(())
    }

    async fn update_stack(&self, input: UpdateStackInput) -> Result<(), ApiError> {
        let mut guard = self.begin(MockOp::UpdateStack).await?;
        let state = &mut *guard;

        let Some(stack) = state.stacks.get_mut(&input.name) else {
            return Err(stack_not_found(&input.name));
        };

        let status = stack.description.status.clone();
        if status.is_in_progress() {
            return Err(invalid_stack_state(&input.name, &status, "updated"));
        }
        if stack.description.template_body == input.template_body
            && stack.description.parameters == input.parameters
        {
            return Err(ApiError::new(
                codes::VALIDATION_ERROR,
                "No updates are to be performed.",
            ));
        }

        info!(stack = %input.name, "[MOCK] Updating stack");
        stack.description.template_body = input.template_body;
        stack.description.parameters = input.parameters;
        stack.description.capabilities = input.capabilities;
        stack.description.status = StackStatus::UpdateInProgress;
        stack.pending = state
            .planned_transitions
            .remove(&input.name)
            .unwrap_or_else(|| {
                VecDeque::from([
                    StackStatus::UpdateCompleteCleanupInProgress,
                    StackStatus::UpdateComplete,
                ])
            });
        Ok(())
    }

    async fn delete_stack(&self, name: &str) -> Result<(), ApiError> {
        let mut guard = self.begin(MockOp::DeleteStack).await?;
        let state = &mut *guard;

        // Deleting a stack that does not exist succeeds, like the real API.
        let Some(stack) = state.stacks.get_mut(name) else {
            return Ok(());
        };

        let status = stack.description.status.clone();
        if status.is_in_progress() {
            return Err(invalid_stack_state(name, &status, "deleted"));
        }

        info!(stack = %name, "[MOCK] Deleting stack");
        stack.description.status = StackStatus::DeleteInProgress;
        stack.pending = state
            .planned_transitions
            .remove(name)
            .unwrap_or_else(|| VecDeque::from([StackStatus::DeleteComplete]));
        Ok(())
    }

    async fn describe_stacks(&self, name: &str) -> Result<Vec<StackDescription>, ApiError> {
        let mut guard = self.begin(MockOp::DescribeStacks).await?;
        let state = &mut *guard;

        let description = {
            let Some(stack) = state.stacks.get_mut(name) else {
                return Err(stack_not_found(name));
            };
            if let Some(next) = stack.pending.pop_front() {
                debug!(stack = %name, status = %next, "[MOCK] Stack status advanced");
                stack.description.status = next;
            }
            stack.description.clone()
        };

        if description.status == StackStatus::DeleteComplete {
            state.stacks.remove(name);
            return Err(stack_not_found(name));
        }

        let copies = if state.duplicated.contains(name) { 2 } else { 1 };
        Ok(vec![description; copies])
    }
}

#[async_trait]
impl NetworkApi for MockCloud {
    async fn describe_route_tables(&self, name: &str) -> Result<Vec<RouteTable>, ApiError> {
        let state = self.begin(MockOp::DescribeRouteTables).await?;
        Ok(state
            .route_tables
            .iter()
            .filter(|rt| rt.name == name)
            .cloned()
            .collect())
    }

    async fn describe_vpcs(&self, name: &str) -> Result<Vec<Vpc>, ApiError> {
        let state = self.begin(MockOp::DescribeVpcs).await?;
        Ok(state
            .vpcs
            .iter()
            .filter(|vpc| vpc.name == name)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BucketApi for MockCloud {
    async fn head_bucket(&self, name: &str) -> Result<BucketInfo, ApiError> {
        let state = self.begin(MockOp::HeadBucket).await?;
        state
            .buckets
            .get(name)
            .map(|b| b.info.clone())
            .ok_or_else(no_such_bucket)
    }

    async fn create_bucket(&self, name: &str, tags: Vec<Tag>) -> Result<(), ApiError> {
        let mut state = self.begin(MockOp::CreateBucket).await?;
        if state.buckets.contains_key(name) {
            return Err(ApiError::new(
                codes::BUCKET_ALREADY_OWNED_BY_YOU,
                "Your previous request to create the named bucket succeeded and you already own it.",
            ));
        }
        info!(bucket = %name, "[MOCK] Creating bucket");
        state.buckets.insert(
            name.to_string(),
            MockBucket {
                info: BucketInfo {
                    name: name.to_string(),
                    lifecycle: None,
                    access_log_target: None,
                    tags,
                },
                objects: 0,
            },
        );
        Ok(())
    }

    async fn put_lifecycle(&self, name: &str, rule: Option<LifecycleRule>) -> Result<(), ApiError> {
        let mut state = self.begin(MockOp::PutLifecycle).await?;
        let bucket = state.buckets.get_mut(name).ok_or_else(no_such_bucket)?;
        bucket.info.lifecycle = rule;
        Ok(())
    }

    async fn put_access_logging(
        &self,
        name: &str,
        target: Option<String>,
    ) -> Result<(), ApiError> {
        let mut state = self.begin(MockOp::PutAccessLogging).await?;
        let bucket = state.buckets.get_mut(name).ok_or_else(no_such_bucket)?;
        bucket.info.access_log_target = target;
        Ok(())
    }

    async fn delete_objects(&self, name: &str) -> Result<(), ApiError> {
        let mut state = self.begin(MockOp::DeleteObjects).await?;
        let bucket = state.buckets.get_mut(name).ok_or_else(no_such_bucket)?;
        bucket.objects = 0;
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<(), ApiError> {
        let mut state = self.begin(MockOp::DeleteBucket).await?;
        let objects = state.buckets.get(name).ok_or_else(no_such_bucket)?.objects;
        if objects > 0 {
            return Err(ApiError::new(
                codes::BUCKET_NOT_EMPTY,
                "The bucket you tried to delete is not empty",
            ));
        }
        info!(bucket = %name, "[MOCK] Deleting bucket");
        state.buckets.remove(name);
        Ok(())
    }
}

#[async_trait]
impl LoadBalancerApi for MockCloud {
    async fn describe_load_balancers(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<LoadBalancer>, ApiError> {
        let state = self.begin(MockOp::DescribeLoadBalancers).await?;
        Ok(state
            .load_balancers
            .iter()
            .filter(|lb| lb.tags.iter().any(|t| t.key == key && t.value == value))
            .cloned()
            .collect())
    }

    async fn delete_load_balancer(&self, name: &str) -> Result<(), ApiError> {
        let mut state = self.begin(MockOp::DeleteLoadBalancer).await?;
        let before = state.load_balancers.len();
        state.load_balancers.retain(|lb| lb.name != name);
        if state.load_balancers.len() == before {
            return Err(ApiError::new(
                codes::LOAD_BALANCER_NOT_FOUND,
                format!("There is no ACTIVE Load Balancer named '{name}'"),
            ));
        }
        info!(load_balancer = %name, "[MOCK] Deleted load balancer");
        Ok(())
    }
}

#[async_trait]
impl AutoScalingApi for MockCloud {
    async fn describe_auto_scaling_group(
        &self,
        name: &str,
    ) -> Result<AutoScalingGroup, ApiError> {
        let state = self.begin(MockOp::DescribeAutoScalingGroup).await?;
        state.groups.get(name).cloned().ok_or_else(|| {
            ApiError::new(
                codes::AUTO_SCALING_GROUP_NOT_FOUND,
                format!("AutoScalingGroup name not found - {name}"),
            )
        })
    }

    async fn put_lifecycle_hook(&self, group: &str, hook: LifecycleHook) -> Result<(), ApiError> {
        let mut state = self.begin(MockOp::PutLifecycleHook).await?;
        let Some(asg) = state.groups.get_mut(group) else {
            return Err(ApiError::new(
                codes::AUTO_SCALING_GROUP_NOT_FOUND,
                format!("AutoScalingGroup name not found - {group}"),
            ));
        };
        asg.lifecycle_hooks.retain(|h| h.name != hook.name);
        asg.lifecycle_hooks.push(hook);
        Ok(())
    }

    async fn delete_lifecycle_hook(&self, group: &str, hook: &str) -> Result<(), ApiError> {
        let mut state = self.begin(MockOp::DeleteLifecycleHook).await?;
        if let Some(asg) = state.groups.get_mut(group) {
            asg.lifecycle_hooks.retain(|h| h.name != hook);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Capability, Parameter, ALREADY_EXISTS, NO_UPDATES, STACK_NOT_FOUND};

    fn create_input(name: &str) -> CreateStackInput {
        CreateStackInput {
            name: name.to_string(),
            template_body: "{}".to_string(),
            parameters: vec![Parameter::new("A", "1")],
            capabilities: vec![Capability::NamedIam],
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_stack_advances_per_describe() {
        let cloud = MockCloud::new();
        cloud.create_stack(create_input("s")).await.unwrap();

        assert_eq!(
            cloud.stack("s").await.unwrap().status,
            StackStatus::CreateInProgress
        );
        let described = cloud.describe_stacks("s").await.unwrap();
        assert_eq!(described[0].status, StackStatus::CreateComplete);
        assert_eq!(cloud.calls(MockOp::DescribeStacks).await, 1);
    }

    #[tokio::test]
    async fn test_create_twice_reports_already_exists() {
        let cloud = MockCloud::new();
        cloud.create_stack(create_input("s")).await.unwrap();
        let err = cloud.create_stack(create_input("s")).await.unwrap_err();
        assert!(err.is(&ALREADY_EXISTS));
    }

    #[tokio::test]
    async fn test_update_without_changes() {
        let cloud = MockCloud::new();
        cloud.create_stack(create_input("s")).await.unwrap();
        cloud.describe_stacks("s").await.unwrap();

        let err = cloud
            .update_stack(UpdateStackInput {
                name: "s".to_string(),
                template_body: "{}".to_string(),
                parameters: vec![Parameter::new("A", "1")],
                capabilities: vec![],
            })
            .await
            .unwrap_err();
        assert!(err.is(&NO_UPDATES));
    }

    #[tokio::test]
    async fn test_delete_then_not_found() {
        let cloud = MockCloud::new();
        cloud.create_stack(create_input("s")).await.unwrap();
        cloud.describe_stacks("s").await.unwrap();
        cloud.delete_stack("s").await.unwrap();

        let err = cloud.describe_stacks("s").await.unwrap_err();
        assert!(err.is(&STACK_NOT_FOUND));
        assert!(cloud.stack("s").await.is_none());
        // Deleting again is fine.
        cloud.delete_stack("s").await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_failure_consumed_once() {
        let cloud = MockCloud::new();
        cloud
            .fail_next(MockOp::DescribeVpcs, ApiError::new("Throttling", "Rate exceeded"))
            .await;

        assert!(cloud.describe_vpcs("host").await.is_err());
        assert!(cloud.describe_vpcs("host").await.unwrap().is_empty());
        assert_eq!(cloud.calls(MockOp::DescribeVpcs).await, 2);
    }

    #[tokio::test]
    async fn test_bucket_not_empty() {
        let cloud = MockCloud::new();
        cloud
            .add_bucket(
                BucketInfo {
                    name: "b".to_string(),
                    lifecycle: None,
                    access_log_target: None,
                    tags: vec![],
                },
                3,
            )
            .await;

        let err = cloud.delete_bucket("b").await.unwrap_err();
        assert_eq!(err.code(), Some(codes::BUCKET_NOT_EMPTY));
        cloud.delete_objects("b").await.unwrap();
        cloud.delete_bucket("b").await.unwrap();
        assert!(cloud.bucket_names().await.is_empty());
    }
}
