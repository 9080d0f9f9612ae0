use crate::{Context, Extension, State};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Periodic throughput reporting.
///
/// Logs processed block/transaction counts at a fixed interval and a summary
/// at teardown. All counters live behind a mutex: transaction hooks may fire
/// from any worker.
#[derive(Debug)]
pub struct ProgressLogger {
    interval: Duration,
    inner: Mutex<ProgressInner>,
}

#[derive(Debug, Default)]
struct ProgressInner {
    started: Option<Instant>,
    last_report: Option<Instant>,
    blocks: u64,
    transactions: u64,
}

impl ProgressLogger {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            inner: Mutex::new(ProgressInner::default()),
        }
    }
}

impl Default for ProgressLogger {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Extension<T> for ProgressLogger {
    async fn pre_run(&self, state: &State<T>, _ctx: &mut Context) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.started = Some(now);
        inner.last_report = Some(now);
        tracing::info!(first_block = state.block, "progress tracking started");
        Ok(())
    }

    async fn pre_block(&self, state: &State<T>, _ctx: &mut Context) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(last) = inner.last_report
            && last.elapsed() >= self.interval
        {
            tracing::info!(
                block = state.block,
                blocks = inner.blocks,
                transactions = inner.transactions,
                "progress"
            );
            inner.last_report = Some(Instant::now());
        }
        Ok(())
    }

    async fn post_block(&self, _state: &State<T>, _ctx: &mut Context) -> anyhow::Result<()> {
        self.inner.lock().unwrap().blocks += 1;
        Ok(())
    }

    async fn post_transaction(&self, _state: &State<T>, _ctx: &mut Context) -> anyhow::Result<()> {
        self.inner.lock().unwrap().transactions += 1;
        Ok(())
    }

    async fn post_run(
        &self,
        _state: &State<T>,
        _ctx: &mut Context,
        error: Option<&anyhow::Error>,
    ) -> anyhow::Result<()> {
        let inner = self.inner.lock().unwrap();
        let elapsed = inner.started.map(|s| s.elapsed()).unwrap_or_default();
        tracing::info!(
            blocks = inner.blocks,
            transactions = inner.transactions,
            elapsed_sec = elapsed.as_secs_f64(),
            success = error.is_none(),
            "run finished"
        );
        Ok(())
    }
}
