//! Pass-scoped scratch state shared between the resources of one pipeline.

use strato_id::PassId;
use tracing::info;

/// Mutable accumulator threaded through one reconciliation pass.
///
/// `S` is the declared object's scratch record: resources earlier in the
/// pipeline write identifiers they discovered into it and later resources
/// read them back instead of querying the provider again. A context is
/// created fresh for every pass and never shared between declared objects.
#[derive(Debug)]
pub struct ControllerContext<S> {
    pass_id: PassId,
    pub scratch: S,
    canceled: Option<String>,
    kept_finalizers: Option<String>,
}

impl<S: Default> ControllerContext<S> {
    pub fn new() -> Self {
        Self {
            pass_id: PassId::new(),
            scratch: S::default(),
            canceled: None,
            kept_finalizers: None,
        }
    }
}

impl<S: Default> Default for ControllerContext<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ControllerContext<S> {
    pub fn pass_id(&self) -> PassId {
        self.pass_id
    }

    /// Stop the pipeline after the current resource. Not an error: the outer
    /// scheduler retries the object later.
    pub fn cancel_pass(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        info!(pass_id = %self.pass_id, reason = %reason, "canceling reconciliation pass");
        self.canceled.get_or_insert(reason);
    }

    /// Ask the caller not to finalize deletion of the declared object yet.
    pub fn keep_finalizers(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        info!(pass_id = %self.pass_id, reason = %reason, "keeping finalizers");
        self.kept_finalizers.get_or_insert(reason);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.is_some()
    }

    /// The first reason given for canceling.
    pub fn cancel_reason(&self) -> Option<&str> {
        self.canceled.as_deref()
    }

    pub fn finalizers_kept(&self) -> bool {
        self.kept_finalizers.is_some()
    }

    pub fn into_scratch(self) -> S {
        self.scratch
    }
}
