//! Declarative infrastructure stacks.

use std::fmt;

use async_trait::async_trait;

use crate::{ApiError, Tag};

/// Stack status as reported by the provider.
///
/// Statuses the engine does not know are kept verbatim in `Other` so they
/// can still be logged and surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StackStatus {
    CreateInProgress,
    CreateFailed,
    CreateComplete,
    RollbackInProgress,
    RollbackFailed,
    RollbackComplete,
    DeleteInProgress,
    DeleteFailed,
    DeleteComplete,
    UpdateInProgress,
    UpdateCompleteCleanupInProgress,
    UpdateComplete,
    UpdateRollbackInProgress,
    UpdateRollbackFailed,
    UpdateRollbackCompleteCleanupInProgress,
    UpdateRollbackComplete,
    ReviewInProgress,
    Other(String),
}

impl StackStatus {
    const KNOWN: [StackStatus; 17] = [
        StackStatus::CreateInProgress,
        StackStatus::CreateFailed,
        StackStatus::CreateComplete,
        StackStatus::RollbackInProgress,
        StackStatus::RollbackFailed,
        StackStatus::RollbackComplete,
        StackStatus::DeleteInProgress,
        StackStatus::DeleteFailed,
        StackStatus::DeleteComplete,
        StackStatus::UpdateInProgress,
        StackStatus::UpdateCompleteCleanupInProgress,
        StackStatus::UpdateComplete,
        StackStatus::UpdateRollbackInProgress,
        StackStatus::UpdateRollbackFailed,
        StackStatus::UpdateRollbackCompleteCleanupInProgress,
        StackStatus::UpdateRollbackComplete,
        StackStatus::ReviewInProgress,
    ];

    /// The provider's status token.
    pub fn as_str(&self) -> &str {
        match self {
            StackStatus::CreateInProgress => "CREATE_IN_PROGRESS",
            StackStatus::CreateFailed => "CREATE_FAILED",
            StackStatus::CreateComplete => "CREATE_COMPLETE",
            StackStatus::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            StackStatus::RollbackFailed => "ROLLBACK_FAILED",
            StackStatus::RollbackComplete => "ROLLBACK_COMPLETE",
            StackStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
            StackStatus::DeleteFailed => "DELETE_FAILED",
            StackStatus::DeleteComplete => "DELETE_COMPLETE",
            StackStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
            StackStatus::UpdateCompleteCleanupInProgress => "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
            StackStatus::UpdateComplete => "UPDATE_COMPLETE",
            StackStatus::UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
            StackStatus::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            StackStatus::UpdateRollbackCompleteCleanupInProgress => {
                "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS"
            }
            StackStatus::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            StackStatus::ReviewInProgress => "REVIEW_IN_PROGRESS",
            StackStatus::Other(s) => s,
        }
    }

    /// Transient status, the provider is still working.
    pub fn is_in_progress(&self) -> bool {
        self.as_str().ends_with("_IN_PROGRESS")
    }

    /// Terminal failure.
    pub fn is_failed(&self) -> bool {
        self.as_str().ends_with("_FAILED")
    }

    /// Terminal success, including the rollback completions.
    pub fn is_complete(&self) -> bool {
        self.as_str().ends_with("_COMPLETE")
    }

    /// Statuses in which the stack's outputs can be read.
    pub fn outputs_accessible(&self) -> bool {
        matches!(
            self,
            StackStatus::CreateComplete
                | StackStatus::RollbackComplete
                | StackStatus::UpdateComplete
                | StackStatus::UpdateRollbackComplete
        )
    }
}

impl From<&str> for StackStatus {
    fn from(s: &str) -> Self {
        StackStatus::KNOWN
            .into_iter()
            .find(|status| status.as_str() == s)
            .unwrap_or_else(|| StackStatus::Other(s.to_string()))
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stack input parameter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A stack output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub key: String,
    pub value: String,
}

impl Output {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Acknowledgements the provider requires before creating IAM resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Iam,
    NamedIam,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Iam => "CAPABILITY_IAM",
            Capability::NamedIam => "CAPABILITY_NAMED_IAM",
        }
    }
}

/// A stack as returned by `DescribeStacks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDescription {
    pub name: String,
    pub status: StackStatus,
    pub status_reason: Option<String>,
    pub template_body: String,
    pub parameters: Vec<Parameter>,
    pub capabilities: Vec<Capability>,
    pub tags: Vec<Tag>,
    pub outputs: Vec<Output>,
}

/// Input for `CreateStack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStackInput {
    pub name: String,
    pub template_body: String,
    pub parameters: Vec<Parameter>,
    pub capabilities: Vec<Capability>,
    pub tags: Vec<Tag>,
}

/// Input for `UpdateStack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStackInput {
    pub name: String,
    pub template_body: String,
    pub parameters: Vec<Parameter>,
    pub capabilities: Vec<Capability>,
}

/// Provider stack API.
#[async_trait]
pub trait StackApi: Send + Sync {
    async fn create_stack(&self, input: CreateStackInput) -> Result<(), ApiError>;

    async fn update_stack(&self, input: UpdateStackInput) -> Result<(), ApiError>;

    async fn delete_stack(&self, name: &str) -> Result<(), ApiError>;

    /// Describe stacks matching `name`. A missing stack is reported as an
    /// error, not as an empty list.
    async fn describe_stacks(&self, name: &str) -> Result<Vec<StackDescription>, ApiError>;
}
