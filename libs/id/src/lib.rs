//! # strato-id
//!
//! Identifier types for the strato reconciliation engine.
//!
//! ## Kinds of identifiers
//!
//! - **Names** are human-assigned and stable (`ClusterId`, `StackName`). They
//!   are validated as lowercase DNS-label-like strings because they end up
//!   inside provider resource names.
//! - **IDs** are system-generated ULIDs with a prefix (`PassId`), used to
//!   correlate the log lines of one reconciliation pass.
//!
//! Stack names are never chosen freely: they derive from the cluster ID and
//! a [`StackRole`], so the same cluster always addresses the same stacks.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for the `define_id!` macro.
pub use ulid::Ulid;
