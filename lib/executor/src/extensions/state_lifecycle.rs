use crate::{Context, Extension, State};
use async_trait::async_trait;

/// Drives the state database's block/transaction lifecycle from the hook
/// stream. Register it first, so scopes open before every other extension
/// runs and close after them.
///
/// No-op when the run has no state database attached. Note that the
/// transaction-parallel granularity fires no block hooks, so block scopes are
/// only opened under the serial and block-parallel granularities.
#[derive(Debug, Default)]
pub struct StateLifecycle;

#[async_trait]
impl<T: Send + Sync + 'static> Extension<T> for StateLifecycle {
    async fn pre_block(&self, state: &State<T>, ctx: &mut Context) -> anyhow::Result<()> {
        if let Some(db) = &ctx.state {
            db.begin_block(state.block);
        }
        Ok(())
    }

    async fn post_block(&self, _state: &State<T>, ctx: &mut Context) -> anyhow::Result<()> {
        if let Some(db) = &ctx.state {
            db.end_block();
        }
        Ok(())
    }

    async fn pre_transaction(&self, state: &State<T>, ctx: &mut Context) -> anyhow::Result<()> {
        if let Some(db) = &ctx.state {
            db.begin_transaction(state.tx_index);
        }
        Ok(())
    }

    async fn post_transaction(&self, _state: &State<T>, ctx: &mut Context) -> anyhow::Result<()> {
        if let Some(db) = &ctx.state {
            db.end_transaction();
        }
        Ok(())
    }
}
