//! Typed identifiers for reconciled clusters and the stacks they own.

use crate::{define_id, define_name, IdError};

// =============================================================================
// Passes
// =============================================================================

define_id!(PassId, "pass");

// =============================================================================
// Clusters and Stacks
// =============================================================================

define_name!(ClusterId, "cluster ID", 20);
define_name!(StackName, "stack name", 64);

/// The role a stack plays for its cluster.
///
/// The role is part of the stack's name, so renaming a variant's label
/// orphans every stack created under the old label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StackRole {
    /// IAM roles the host side needs before the main stack exists.
    ControlPlanePre,
    /// The cluster's own infrastructure.
    Main,
    /// Host-side routes towards the cluster VPC, created after the main stack.
    ControlPlanePost,
}

impl StackRole {
    /// All roles in creation order.
    pub const ALL: [StackRole; 3] = [
        StackRole::ControlPlanePre,
        StackRole::Main,
        StackRole::ControlPlanePost,
    ];

    /// The label used in stack names.
    pub fn as_str(&self) -> &'static str {
        match self {
            StackRole::ControlPlanePre => "control-plane-pre",
            StackRole::Main => "main",
            StackRole::ControlPlanePost => "control-plane-post",
        }
    }
}

impl std::fmt::Display for StackRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StackRole {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StackRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| IdError::UnknownRole(s.to_string()))
    }
}

impl ClusterId {
    /// Deterministic name of the stack with the given role.
    #[must_use]
    pub fn stack_name(&self, role: StackRole) -> StackName {
        // ClusterId is at most 20 characters and every role label is a valid
        // label suffix, so the result always satisfies StackName's rules.
        StackName(format!("{}-{}", self.0, role.as_str()))
    }
}

/// Validates a lowercase DNS-label-like name.
#[doc(hidden)]
pub fn validate_label(kind: &'static str, value: &str, max: usize) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }

    let len = value.chars().count();
    if len > max {
        return Err(IdError::TooLong {
            kind,
            value: value.to_string(),
            actual: len,
            max,
        });
    }

    if let Some((position, character)) = value
        .chars()
        .enumerate()
        .find(|(_, c)| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(IdError::InvalidCharacter {
            kind,
            value: value.to_string(),
            character,
            position,
        });
    }

    let starts_with_letter = value.starts_with(|c: char| c.is_ascii_lowercase());
    if !starts_with_letter || value.ends_with('-') {
        return Err(IdError::InvalidBoundary {
            kind,
            value: value.to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
