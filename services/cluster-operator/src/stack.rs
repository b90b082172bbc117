//! Stack lifecycle: create, update, delete and describe one declarative
//! stack, and read its outputs once the provider allows it.
//!
//! ```text
//! Absent -> Creating -> Created -> Updating -> Updated -> Deleting -> Absent
//!                                                                  \-> DeleteFailed
//! ```
//!
//! Provider sub-statuses fold into these phases: `ROLLBACK_COMPLETE` is
//! `Created`, `UPDATE_ROLLBACK_COMPLETE` is `Updated`, and the cleanup
//! statuses count as `Updating`. The provider owns the status; nothing here
//! caches it between calls.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use strato_cloud::{
    ApiError, CreateStackInput, Output, StackApi, StackDescription, StackStatus, UpdateStackInput,
    ALREADY_EXISTS, CREATE_IN_PROGRESS, DELETE_IN_PROGRESS, NO_UPDATES, STACK_NOT_FOUND,
    UPDATE_IN_PROGRESS,
};
use strato_reconcile::{Error, Missing, Operation, Result, ResultExt};
use tracing::{debug, info, instrument, warn};

/// Where a stack is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackPhase {
    Absent,
    Creating,
    Created,
    Updating,
    Updated,
    Deleting,
    DeleteFailed,
    /// Create or update failed and the provider gave up rolling back.
    Failed,
}

impl StackPhase {
    pub fn from_status(status: &StackStatus) -> Self {
        use StackStatus::*;

        match status {
            CreateInProgress | ReviewInProgress | RollbackInProgress => StackPhase::Creating,
            CreateComplete | RollbackComplete => StackPhase::Created,
            UpdateInProgress
            | UpdateCompleteCleanupInProgress
            | UpdateRollbackInProgress
            | UpdateRollbackCompleteCleanupInProgress => StackPhase::Updating,
            UpdateComplete | UpdateRollbackComplete => StackPhase::Updated,
            DeleteInProgress => StackPhase::Deleting,
            DeleteFailed => StackPhase::DeleteFailed,
            DeleteComplete => StackPhase::Absent,
            CreateFailed | RollbackFailed | UpdateRollbackFailed => StackPhase::Failed,
            Other(_) if status.is_failed() => StackPhase::Failed,
            Other(_) if status.is_in_progress() => StackPhase::Updating,
            Other(_) => StackPhase::Updated,
        }
    }

    /// The provider is still working on the stack.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StackPhase::Creating | StackPhase::Updating | StackPhase::Deleting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StackPhase::Absent => "absent",
            StackPhase::Creating => "creating",
            StackPhase::Created => "created",
            StackPhase::Updating => "updating",
            StackPhase::Updated => "updated",
            StackPhase::Deleting => "deleting",
            StackPhase::DeleteFailed => "delete_failed",
            StackPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for StackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long to wait for a stack to settle.
#[derive(Debug, Clone)]
pub struct StackWaitConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for StackWaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(20 * 60),
        }
    }
}

impl StackWaitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "stack poll interval must be positive".to_string(),
            ));
        }
        if self.timeout < self.poll_interval {
            return Err(Error::InvalidConfig(format!(
                "stack wait timeout {:?} is shorter than the poll interval {:?}",
                self.timeout, self.poll_interval
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Created and settled in the given phase.
    Created(StackPhase),
    /// A stack with this name was already there.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated(StackPhase),
    /// The provider found nothing to change.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Deletion was started; the stack is going away.
    Requested,
    /// Another operation is underway. The caller keeps finalizers and comes
    /// back later.
    InProgress(Operation),
    /// Nothing to delete.
    AlreadyAbsent,
}

/// Drives one provider's stack API.
pub struct StackManager {
    api: Arc<dyn StackApi>,
    wait: StackWaitConfig,
}

impl StackManager {
    pub fn new(api: Arc<dyn StackApi>, wait: StackWaitConfig) -> Result<Self> {
        wait.validate()?;
        Ok(Self { api, wait })
    }

    /// The stack named `name`, or `None` if it does not exist.
    ///
    /// Fails with `TooManyResults` when more than one stack matches.
    pub async fn describe(&self, name: &str) -> Result<Option<StackDescription>> {
        let mut stacks = match self.api.describe_stacks(name).await {
            Ok(stacks) => stacks,
            Err(err) if err.is(&STACK_NOT_FOUND) => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("describing stack {name}")),
        };
        match stacks.len() {
            0 => Ok(None),
            1 => Ok(stacks.pop()),
            count => Err(Error::TooManyResults {
                what: Missing::Stack,
                name: name.to_string(),
                count,
            }),
        }
    }

    pub async fn phase(&self, name: &str) -> Result<StackPhase> {
        Ok(self
            .describe(name)
            .await?
            .map(|stack| StackPhase::from_status(&stack.status))
            .unwrap_or(StackPhase::Absent))
    }

    /// Create the stack and wait until it settles.
    ///
    /// A stack that already exists is not an error. A create that settles in
    /// a failed status is.
    #[instrument(skip_all, fields(stack = %input.name))]
    pub async fn create(&self, input: CreateStackInput) -> Result<CreateOutcome> {
        let name = input.name.clone();
        match self.api.create_stack(input).await {
            Ok(()) => {}
            Err(err) if err.is(&ALREADY_EXISTS) => {
                info!(stack = %name, "stack already exists, nothing to create");
                return Ok(CreateOutcome::AlreadyExists);
            }
            Err(err) => return Err(err).with_context(|| format!("creating stack {name}")),
        }

        info!(stack = %name, "stack creation requested");
        let phase = self.wait_until_settled(&name, Operation::Create).await?;
        if phase == StackPhase::Created {
            info!(stack = %name, "stack created");
        }
        Ok(CreateOutcome::Created(phase))
    }

    /// Update the stack and wait until it settles.
    ///
    /// The provider rejecting an update because nothing changed is a soft
    /// outcome. An update rejected because another operation is running
    /// fails with `InProgress`.
    #[instrument(skip_all, fields(stack = %input.name))]
    pub async fn update(&self, input: UpdateStackInput) -> Result<UpdateOutcome> {
        let name = input.name.clone();
        if let Err(err) = self.api.update_stack(input).await {
            if err.is(&NO_UPDATES) {
                debug!(stack = %name, "provider reports no updates to perform");
                return Ok(UpdateOutcome::Unchanged);
            }
            if let Some(operation) = operation_underway(&err) {
                return Err(Error::in_progress(operation, name));
            }
            if err.is(&STACK_NOT_FOUND) {
                return Err(Error::not_found(Missing::Stack, name));
            }
            return Err(err).with_context(|| format!("updating stack {name}"));
        }

        info!(stack = %name, "stack update requested");
        let phase = self.wait_until_settled(&name, Operation::Update).await?;
        Ok(UpdateOutcome::Updated(phase))
    }

    /// Request deletion without waiting for it to finish.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<DeleteOutcome> {
        let Some(stack) = self.describe(name).await? else {
            debug!(stack = %name, "stack already absent");
            return Ok(DeleteOutcome::AlreadyAbsent);
        };

        let phase = StackPhase::from_status(&stack.status);
        match phase {
            StackPhase::Deleting => {
                info!(stack = %name, "stack deletion already in progress");
                return Ok(DeleteOutcome::InProgress(Operation::Delete));
            }
            StackPhase::Creating | StackPhase::Updating => {
                info!(stack = %name, status = %stack.status, "stack busy, deleting later");
                return Ok(DeleteOutcome::InProgress(operation_of(phase)));
            }
            StackPhase::DeleteFailed => {
                warn!(
                    stack = %name,
                    reason = stack.status_reason.as_deref().unwrap_or_default(),
                    "previous stack deletion failed, retrying"
                );
            }
            _ => {}
        }

        match self.api.delete_stack(name).await {
            Ok(()) => {
                info!(stack = %name, "stack deletion requested");
                Ok(DeleteOutcome::Requested)
            }
            Err(err) if err.is(&STACK_NOT_FOUND) => Ok(DeleteOutcome::AlreadyAbsent),
            Err(err) => match operation_underway(&err) {
                Some(operation) => {
                    info!(stack = %name, %operation, "stack busy, deleting later");
                    Ok(DeleteOutcome::InProgress(operation))
                }
                None => Err(err).with_context(|| format!("deleting stack {name}")),
            },
        }
    }

    /// Outputs and status of the stack.
    ///
    /// Outputs are only returned in `CREATE_COMPLETE`, `ROLLBACK_COMPLETE`,
    /// `UPDATE_COMPLETE` and `UPDATE_ROLLBACK_COMPLETE`. In every other
    /// status this fails with `OutputsNotAccessible` carrying the status.
    pub async fn describe_outputs_and_status(
        &self,
        name: &str,
    ) -> Result<(Vec<Output>, StackStatus)> {
        let stack = self
            .describe(name)
            .await?
            .ok_or_else(|| Error::not_found(Missing::Stack, name))?;

        if !stack.status.outputs_accessible() {
            return Err(Error::OutputsNotAccessible {
                stack: name.to_string(),
                status: stack.status,
            });
        }
        Ok((stack.outputs, stack.status))
    }

    /// Value of the output `key`. The first match wins.
    pub fn output_value<'a>(outputs: &'a [Output], key: &str) -> Result<&'a str> {
        outputs
            .iter()
            .find(|output| output.key == key)
            .map(|output| output.value.as_str())
            .ok_or_else(|| Error::not_found(Missing::Output, key))
    }

    /// Poll until the stack leaves its transient statuses.
    ///
    /// A stack that stays busy past the timeout fails with `InProgress`,
    /// which the caller may retry.
    async fn wait_until_settled(&self, name: &str, operation: Operation) -> Result<StackPhase> {
        let started = Instant::now();
        loop {
            let stack = self
                .describe(name)
                .await?
                .ok_or_else(|| Error::not_found(Missing::Stack, name))?;

            let phase = StackPhase::from_status(&stack.status);
            if !phase.is_transient() {
                return settled(name, phase, stack);
            }

            if started.elapsed() >= self.wait.timeout {
                warn!(
                    stack = %name,
                    status = %stack.status,
                    waited_secs = started.elapsed().as_secs(),
                    "stack did not settle in time"
                );
                return Err(Error::in_progress(operation, name));
            }

            debug!(stack = %name, status = %stack.status, "waiting for stack to settle");
            tokio::time::sleep(self.wait.poll_interval).await;
        }
    }
}

/// Outcome of a create or update once the stack stopped moving.
///
/// A stack that ends up deleted never reached its goal, so it counts as a
/// failure just like a failed status.
fn settled(name: &str, phase: StackPhase, stack: StackDescription) -> Result<StackPhase> {
    match phase {
        StackPhase::Failed | StackPhase::DeleteFailed => Err(Error::StackFailed {
            stack: name.to_string(),
            reason: stack.status_reason.unwrap_or_default(),
            status: stack.status,
        }),
        StackPhase::Absent => Err(Error::StackFailed {
            stack: name.to_string(),
            reason: stack
                .status_reason
                .unwrap_or_else(|| "stack was deleted while waiting".to_string()),
            status: stack.status,
        }),
        _ => {
            if matches!(
                stack.status,
                StackStatus::RollbackComplete | StackStatus::UpdateRollbackComplete
            ) {
                warn!(
                    stack = %name,
                    status = %stack.status,
                    reason = stack.status_reason.as_deref().unwrap_or_default(),
                    "stack rolled back"
                );
            }
            Ok(phase)
        }
    }
}

/// The operation a provider error says is already running on the stack.
fn operation_underway(err: &ApiError) -> Option<Operation> {
    if err.is(&DELETE_IN_PROGRESS) {
        Some(Operation::Delete)
    } else if err.is(&UPDATE_IN_PROGRESS) {
        Some(Operation::Update)
    } else if err.is(&CREATE_IN_PROGRESS) {
        Some(Operation::Create)
    } else {
        None
    }
}

fn operation_of(phase: StackPhase) -> Operation {
    match phase {
        StackPhase::Creating => Operation::Create,
        StackPhase::Deleting => Operation::Delete,
        _ => Operation::Update,
    }
}
