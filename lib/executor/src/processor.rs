use crate::{Context, State};
use async_trait::async_trait;

/// Executes one transaction against the state database.
///
/// One processor instance is shared by every worker of a run, so
/// implementations must be thread-safe when used with the parallel
/// granularities. A returned error is fatal to the whole run.
#[async_trait]
pub trait Processor<T: Send + Sync + 'static>: Send + Sync {
    async fn process(&self, state: &State<T>, ctx: &mut Context) -> anyhow::Result<()>;
}
