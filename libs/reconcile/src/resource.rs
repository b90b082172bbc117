//! The contract every infrastructure-managing unit implements.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::{ControllerContext, Patch, Result};

/// A declared object the controller can reconcile.
pub trait Reconcilable: Send + Sync {
    /// Pass-scoped scratch record resources share through the context.
    type Scratch: Default + Send;

    /// Stable key for logs.
    fn key(&self) -> String;

    /// The object is marked for deletion; the pipeline runs in reverse and
    /// resources tear down what they manage.
    fn is_deleting(&self) -> bool;
}

/// One reconciliation unit managing one infrastructure concern.
///
/// Per pass the controller calls `current_state`, `desired_state` and
/// `compute_patch`, then applies at most one change. Apply methods must be
/// idempotent: creating something that already exists and deleting
/// something already gone are successes.
#[async_trait]
pub trait Resource<T: Reconcilable>: Send + Sync {
    type State: Send + Sync + Debug;
    type Create: Send + Sync + Clone + Debug;
    type Update: Send + Sync + Clone + Debug;
    type Delete: Send + Sync + Clone + Debug;

    /// Stable name used for ordering and logs.
    fn name(&self) -> &str;

    /// Observe the provider. A target that does not exist yet is an empty
    /// state, not an error.
    async fn current_state(
        &self,
        obj: &T,
        ctx: &mut ControllerContext<T::Scratch>,
    ) -> Result<Self::State>;

    /// Derive what should exist from the declared object and values earlier
    /// resources put into the context.
    async fn desired_state(
        &self,
        obj: &T,
        ctx: &mut ControllerContext<T::Scratch>,
    ) -> Result<Self::State>;

    fn compute_patch(
        &self,
        obj: &T,
        current: &Self::State,
        desired: &Self::State,
    ) -> Result<Patch<Self::Create, Self::Update, Self::Delete>>;

    async fn apply_create(
        &self,
        obj: &T,
        ctx: &mut ControllerContext<T::Scratch>,
        change: Self::Create,
    ) -> Result<()> {
        let _ = (obj, ctx, change);
        Ok(())
    }

    async fn apply_update(
        &self,
        obj: &T,
        ctx: &mut ControllerContext<T::Scratch>,
        change: Self::Update,
    ) -> Result<()> {
        let _ = (obj, ctx, change);
        Ok(())
    }

    async fn apply_delete(
        &self,
        obj: &T,
        ctx: &mut ControllerContext<T::Scratch>,
        change: Self::Delete,
    ) -> Result<()> {
        let _ = (obj, ctx, change);
        Ok(())
    }
}
