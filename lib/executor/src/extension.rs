use crate::{Context, State};
use async_trait::async_trait;

/// Hook object wrapped around every phase of a run.
///
/// Registration order is part of the contract: the `pre_*` phases visit the
/// registered extensions first-to-last, the `post_*` phases last-to-first.
/// All methods default to no-ops, so implementations override only the phases
/// they care about. Hooks receive `&self`; an extension holding mutable state
/// guards it itself, as transaction hooks may fire from any worker.
#[async_trait]
pub trait Extension<T: Send + Sync + 'static>: Send + Sync {
    async fn pre_run(&self, _state: &State<T>, _ctx: &mut Context) -> anyhow::Result<()> {
        Ok(())
    }

    /// Final hook of a run. `error` is the joined outcome of everything that
    /// came before (`None` for a clean run). Fires exactly once per
    /// extension, in reverse order, even when an earlier phase failed.
    async fn post_run(
        &self,
        _state: &State<T>,
        _ctx: &mut Context,
        _error: Option<&anyhow::Error>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn pre_block(&self, _state: &State<T>, _ctx: &mut Context) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_block(&self, _state: &State<T>, _ctx: &mut Context) -> anyhow::Result<()> {
        Ok(())
    }

    async fn pre_transaction(&self, _state: &State<T>, _ctx: &mut Context) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_transaction(&self, _state: &State<T>, _ctx: &mut Context) -> anyhow::Result<()> {
        Ok(())
    }
}
