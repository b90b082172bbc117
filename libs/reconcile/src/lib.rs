//! Reconciliation engine primitives.
//!
//! A declared object is converged toward its desired infrastructure by a
//! [`Controller`] walking an ordered pipeline of [`Resource`]s. Per pass each
//! resource:
//!
//! 1. observes the **current state** at the provider,
//! 2. derives the **desired state** from the declared object and the
//!    [`ControllerContext`] scratch record,
//! 3. diffs the two into a [`Patch`] carrying at most one change,
//! 4. applies that change idempotently, retried by a [`RetryPolicy`].
//!
//! # Invariants
//!
//! - Create wins over update; delete only when nothing should exist
//!   ([`ChangeKind::decide`])
//! - Resources of one pass run strictly in order and share one context
//! - A canceled pass is not an error; the object is retried on the next tick
//! - Error kinds survive context wrapping ([`Error::kind`])

use std::time::Duration;

mod context;
mod controller;
mod error;
mod hash;
mod patch;
mod resource;
mod retry;
mod status;

pub use context::ControllerContext;
pub use controller::{Controller, ControllerBuilder, PassOutcome, PassReport};
pub use error::{Error, ErrorKind, Missing, Operation, Result, ResultExt};
pub use hash::SpecHash;
pub use patch::{ChangeKind, Patch, Snapshot};
pub use resource::{Reconcilable, Resource};
pub use retry::{RetryPolicy, RetryTracker, DEFAULT_APPLY_ATTEMPTS};
pub use status::ConvergenceStatus;

/// Default interval between passes over every declared object.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Default failed passes before an object is reported as not converged.
pub const DEFAULT_MAX_FAILED_PASSES: u32 = 5;

/// Default window over which failed passes are counted.
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(10 * 60);
