//! Provider errors and best-effort classification of them.
//!
//! Providers report many conditions only through free text. Classification
//! therefore checks the structured error code first and falls back to a
//! substring match on the message. The fragments below are known provider
//! messages, not an exhaustive list.

use std::fmt;

/// An error returned by a provider API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    code: Option<String>,
    message: String,
}

impl ApiError {
    /// Error with a structured code.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Error that only carries free text.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// The structured error code, if the provider sent one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// The provider's free-text message.
    pub fn text(&self) -> &str {
        &self.message
    }

    /// Returns true if this error matches the given matcher.
    pub fn is(&self, matcher: &ErrorMatcher) -> bool {
        matcher.matches(self)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// Structured error codes used by the provider.
pub mod codes {
    pub const VALIDATION_ERROR: &str = "ValidationError";
    pub const ALREADY_EXISTS: &str = "AlreadyExistsException";
    pub const NO_SUCH_BUCKET: &str = "NoSuchBucket";
    pub const BUCKET_ALREADY_OWNED_BY_YOU: &str = "BucketAlreadyOwnedByYou";
    pub const BUCKET_NOT_EMPTY: &str = "BucketNotEmpty";
    pub const LOAD_BALANCER_NOT_FOUND: &str = "LoadBalancerNotFound";
    pub const AUTO_SCALING_GROUP_NOT_FOUND: &str = "AutoScalingGroupNotFound";
    pub const THROTTLING: &str = "Throttling";
}

/// Matches an [`ApiError`] by code, then by message fragments.
#[derive(Debug, Clone, Copy)]
pub struct ErrorMatcher {
    code: Option<&'static str>,
    fragments: &'static [&'static str],
}

impl ErrorMatcher {
    pub const fn new(code: Option<&'static str>, fragments: &'static [&'static str]) -> Self {
        Self { code, fragments }
    }

    pub fn matches(&self, err: &ApiError) -> bool {
        if let (Some(want), Some(got)) = (self.code, err.code()) {
            if want == got {
                return true;
            }
        }
        self.fragments
            .iter()
            .any(|fragment| err.text().contains(fragment))
    }
}

/// The named stack does not exist.
pub const STACK_NOT_FOUND: ErrorMatcher = ErrorMatcher::new(None, &["does not exist"]);

/// The create target already exists.
pub const ALREADY_EXISTS: ErrorMatcher =
    ErrorMatcher::new(Some(codes::ALREADY_EXISTS), &["already exists"]);

/// An update was submitted that would change nothing.
pub const NO_UPDATES: ErrorMatcher =
    ErrorMatcher::new(None, &["No updates are to be performed"]);

/// The stack is already being deleted.
pub const DELETE_IN_PROGRESS: ErrorMatcher = ErrorMatcher::new(None, &["DELETE_IN_PROGRESS"]);

/// The stack is being updated and rejects other operations.
pub const UPDATE_IN_PROGRESS: ErrorMatcher = ErrorMatcher::new(
    None,
    &["UPDATE_IN_PROGRESS", "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS"],
);

/// The stack is still being created and rejects other operations.
pub const CREATE_IN_PROGRESS: ErrorMatcher = ErrorMatcher::new(None, &["CREATE_IN_PROGRESS"]);

/// The bucket does not exist.
pub const NO_SUCH_BUCKET: ErrorMatcher = ErrorMatcher::new(
    Some(codes::NO_SUCH_BUCKET),
    &["The specified bucket does not exist"],
);

/// The bucket exists and belongs to the caller already.
pub const BUCKET_ALREADY_OWNED: ErrorMatcher = ErrorMatcher::new(
    Some(codes::BUCKET_ALREADY_OWNED_BY_YOU),
    &["you already own it"],
);

/// The load balancer does not exist.
pub const LOAD_BALANCER_NOT_FOUND: ErrorMatcher = ErrorMatcher::new(
    Some(codes::LOAD_BALANCER_NOT_FOUND),
    &["There is no ACTIVE Load Balancer"],
);

/// The autoscaling group does not exist.
pub const AUTO_SCALING_GROUP_NOT_FOUND: ErrorMatcher = ErrorMatcher::new(
    Some(codes::AUTO_SCALING_GROUP_NOT_FOUND),
    &["AutoScalingGroup name not found"],
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_match_wins() {
        let err = ApiError::new(codes::ALREADY_EXISTS, "something unrelated");
        assert!(err.is(&ALREADY_EXISTS));
    }

    #[test]
    fn test_substring_fallback() {
        let err = ApiError::new(
            codes::VALIDATION_ERROR,
            "Stack with id demo-main does not exist",
        );
        assert!(err.is(&STACK_NOT_FOUND));
        assert!(!err.is(&ALREADY_EXISTS));
    }

    #[test]
    fn test_codeless_error_uses_message() {
        let err = ApiError::message("Stack [demo-main] already exists");
        assert!(err.is(&ALREADY_EXISTS));
    }

    #[test]
    fn test_in_progress_tokens() {
        let err = ApiError::new(
            codes::VALIDATION_ERROR,
            "Stack [demo-main] is in DELETE_IN_PROGRESS state and can not be deleted",
        );
        assert!(err.is(&DELETE_IN_PROGRESS));
        assert!(!err.is(&UPDATE_IN_PROGRESS));
    }

    #[test]
    fn test_display() {
        let err = ApiError::new("Throttling", "Rate exceeded");
        assert_eq!(err.to_string(), "Throttling: Rate exceeded");
        assert_eq!(ApiError::message("boom").to_string(), "boom");
    }
}
