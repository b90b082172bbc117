//! Error taxonomy for reconciliation.
//!
//! Errors are wrapped with call-site context as they travel up, but the
//! kind of the innermost cause is preserved so callers branch on
//! [`Error::kind`] instead of message text.

use std::fmt;

use strato_cloud::{ApiError, StackStatus};
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The kind of object that was missing or ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Missing {
    Stack,
    Output,
    Bucket,
    RouteTable,
    Vpc,
    AutoScalingGroup,
    LoadBalancer,
    Cluster,
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Missing::Stack => "stack",
            Missing::Output => "stack output",
            Missing::Bucket => "bucket",
            Missing::RouteTable => "route table",
            Missing::Vpc => "VPC",
            Missing::AutoScalingGroup => "autoscaling group",
            Missing::LoadBalancer => "load balancer",
            Missing::Cluster => "cluster",
        })
    }
}

/// A provider operation that can already be underway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A component was constructed with a missing or unusable dependency.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The target does not exist.
    #[error("{what} not found: {name}")]
    NotFound { what: Missing, name: String },

    /// A name resolved to more than one provider object.
    #[error("too many results for {what} '{name}': expected one, got {count}")]
    TooManyResults {
        what: Missing,
        name: String,
        count: usize,
    },

    /// The stack exists but is not in a status whose outputs can be read.
    #[error("outputs of stack {stack} not accessible in status {status}")]
    OutputsNotAccessible { stack: String, status: StackStatus },

    /// A provider operation on the target is already underway.
    #[error("{operation} of {target} already in progress")]
    InProgress {
        operation: Operation,
        target: String,
    },

    /// The stack settled in a `*_FAILED` status, or was deleted while a
    /// create or update waited on it.
    #[error("stack {stack} failed with status {status}: {reason}")]
    StackFailed {
        stack: String,
        status: StackStatus,
        reason: String,
    },

    /// A provider response violated an invariant.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Optimistic concurrency conflict on the declared object.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An external collaborator (renderer, bundle source, store) failed.
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    /// Unclassified provider error.
    #[error("provider error: {0}")]
    Provider(#[from] ApiError),

    /// Call-site annotation around another error.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// Classification of an [`Error`], with context wrappers removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfig,
    NotFound(Missing),
    TooManyResults,
    OutputsNotAccessible,
    InProgress(Operation),
    ExecutionFailed,
    Conflict,
    Collaborator,
    Provider,
}

impl ErrorKind {
    /// Short label recorded in the declared object's status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfig => "InvalidConfig",
            ErrorKind::NotFound(_) => "NotFound",
            ErrorKind::TooManyResults => "TooManyResults",
            ErrorKind::OutputsNotAccessible => "OutputsNotAccessible",
            ErrorKind::InProgress(_) => "InProgress",
            ErrorKind::ExecutionFailed => "ExecutionFailed",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Collaborator => "Collaborator",
            ErrorKind::Provider => "Provider",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn not_found(what: Missing, name: impl Into<String>) -> Self {
        Error::NotFound {
            what,
            name: name.into(),
        }
    }

    pub fn in_progress(operation: Operation, target: impl Into<String>) -> Self {
        Error::InProgress {
            operation,
            target: target.into(),
        }
    }

    /// The innermost error, past every context wrapper.
    pub fn cause(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.cause(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Context { source, .. } => source.kind(),
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::NotFound { what, .. } => ErrorKind::NotFound(*what),
            Error::TooManyResults { .. } => ErrorKind::TooManyResults,
            Error::OutputsNotAccessible { .. } => ErrorKind::OutputsNotAccessible,
            Error::InProgress { operation, .. } => ErrorKind::InProgress(*operation),
            Error::StackFailed { .. } | Error::ExecutionFailed(_) => ErrorKind::ExecutionFailed,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Collaborator { .. } => ErrorKind::Collaborator,
            Error::Provider(_) => ErrorKind::Provider,
        }
    }

    /// Whether the retry policy may try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::InvalidConfig | ErrorKind::TooManyResults | ErrorKind::ExecutionFailed
        )
    }

    /// The provider error at the root, if that is what failed.
    pub fn provider_error(&self) -> Option<&ApiError> {
        match self.cause() {
            Error::Provider(err) => Some(err),
            _ => None,
        }
    }
}

/// Adds call-site context to fallible results.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|err| Error::Context {
            context: context.into(),
            source: Box::new(err.into()),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| Error::Context {
            context: f(),
            source: Box::new(err.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_survives_context() {
        let result: Result<()> = Err(Error::not_found(Missing::Stack, "demo-main"));
        let err = result
            .context("describing stack")
            .context("resource stack-main")
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound(Missing::Stack));
        assert_eq!(
            err.to_string(),
            "resource stack-main: describing stack: stack not found: demo-main"
        );
    }

    #[test]
    fn test_retryability() {
        assert!(!Error::InvalidConfig("x".into()).is_retryable());
        assert!(!Error::TooManyResults {
            what: Missing::RouteTable,
            name: "a".into(),
            count: 2
        }
        .is_retryable());
        assert!(!Error::ExecutionFailed("nil field".into()).is_retryable());
        assert!(Error::in_progress(Operation::Delete, "demo-main").is_retryable());
        assert!(Error::Provider(ApiError::new("Throttling", "Rate exceeded")).is_retryable());
    }

    #[test]
    fn test_stack_failed_is_execution_failure() {
        let err = Error::StackFailed {
            stack: "demo-main".into(),
            status: StackStatus::UpdateRollbackFailed,
            reason: "resource limit".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_provider_error_through_context() {
        let result: std::result::Result<(), ApiError> =
            Err(ApiError::new("Throttling", "Rate exceeded"));
        let err = result.context("creating bucket").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert_eq!(err.provider_error().and_then(ApiError::code), Some("Throttling"));
    }
}
