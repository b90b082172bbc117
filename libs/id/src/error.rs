//! Error types for ID and name parsing.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs and names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The input string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID has an invalid prefix.
    #[error("invalid ID prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The ID is missing the underscore separator.
    #[error("ID missing underscore separator")]
    MissingSeparator,

    /// The ULID portion of the ID is invalid.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),

    /// The name exceeds the maximum length for its kind.
    #[error("{kind} '{value}' is {actual} characters long, maximum is {max}")]
    TooLong {
        kind: &'static str,
        value: String,
        actual: usize,
        max: usize,
    },

    /// The name contains a character outside `[a-z0-9-]`.
    #[error("{kind} '{value}' contains invalid character '{character}' at position {position}")]
    InvalidCharacter {
        kind: &'static str,
        value: String,
        character: char,
        position: usize,
    },

    /// The name must start with a lowercase letter and must not end with '-'.
    #[error("{kind} '{value}' must start with a lowercase letter and not end with '-'")]
    InvalidBoundary { kind: &'static str, value: String },

    /// The stack role is not one of the known roles.
    #[error("unknown stack role: {0}")]
    UnknownRole(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
