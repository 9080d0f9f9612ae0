use crate::metrics::EXECUTOR_METRICS;
use crate::pipeline::ExtensionPipeline;
use crate::provider::TransactionInfo;
use crate::{Context, Processor, State};
use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A worker failure, pinned to the unit of work it happened in.
pub(crate) struct WorkerFailure {
    pub block: u64,
    pub tx_index: u32,
    pub source: anyhow::Error,
}

/// First panic observed by any worker. Write-once: later panics are logged
/// and dropped so the captured payload is never overwritten.
#[derive(Default)]
pub(crate) struct PanicSlot {
    slot: Mutex<Option<CaughtPanic>>,
}

pub(crate) struct CaughtPanic {
    pub payload: Box<dyn Any + Send>,
    pub message: String,
    pub backtrace: Backtrace,
}

impl PanicSlot {
    pub(crate) fn record(&self, payload: Box<dyn Any + Send>) {
        let message = panic_message(payload.as_ref());
        let mut slot = self.slot.lock().unwrap();
        if slot.is_some() {
            tracing::warn!(panic = %message, "dropping secondary worker panic");
            return;
        }
        *slot = Some(CaughtPanic {
            message,
            backtrace: Backtrace::force_capture(),
            payload,
        });
    }

    pub(crate) fn take(&self) -> Option<CaughtPanic> {
        self.slot.lock().unwrap().take()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Everything a worker needs. `state` and `ctx` are the run-level values the
/// worker copies from; the shared handles inside stay shared.
pub(crate) struct WorkerEnv<T: Send + Sync + 'static> {
    pub pipeline: Arc<ExtensionPipeline<T>>,
    pub processor: Arc<dyn Processor<T>>,
    pub state: State<T>,
    pub ctx: Context,
    pub cancel: CancellationToken,
}

impl<T: Send + Sync + 'static> Clone for WorkerEnv<T> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            processor: self.processor.clone(),
            state: self.state.clone(),
            ctx: self.ctx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

pub(crate) type SharedReceiver<I> = Arc<tokio::sync::Mutex<mpsc::Receiver<I>>>;

/// Wraps a worker body: a failure signals cancellation before it is reported,
/// a panic is parked in the shared slot so the coordinator can re-raise it
/// after the pool has quiesced.
pub(crate) fn spawn_worker<F>(
    work: F,
    cancel: CancellationToken,
    panics: Arc<PanicSlot>,
) -> JoinHandle<Result<(), WorkerFailure>>
where
    F: Future<Output = Result<(), WorkerFailure>> + Send + 'static,
{
    tokio::spawn(async move {
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(failure)) => {
                tracing::debug!(
                    block = failure.block,
                    tx_index = failure.tx_index,
                    err = %failure.source,
                    "worker failed; aborting run"
                );
                cancel.cancel();
                Err(failure)
            }
            Err(payload) => {
                panics.record(payload);
                cancel.cancel();
                Ok(())
            }
        }
    })
}

/// Next item off a shared channel. `None` means abort or end-of-stream; the
/// caller distinguishes through the token if it has to.
async fn next_item<I>(receiver: &SharedReceiver<I>, cancel: &CancellationToken) -> Option<I> {
    let mut receiver = receiver.lock().await;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        item = receiver.recv() => item,
    }
}

fn fail_at<T>(state: &State<T>, result: anyhow::Result<()>) -> Result<(), WorkerFailure> {
    result.map_err(|source| WorkerFailure {
        block: state.block,
        tx_index: state.tx_index,
        source,
    })
}

/// One transaction: pre-hook, processor, post-hook. The post-hook is not
/// reached when the processor fails.
async fn execute_transaction<T: Send + Sync + 'static>(
    env: &mut WorkerEnv<T>,
) -> Result<(), WorkerFailure> {
    fail_at(
        &env.state,
        env.pipeline.pre_transaction(&env.state, &mut env.ctx).await,
    )?;
    let latency = EXECUTOR_METRICS.transaction_latency.start();
    fail_at(
        &env.state,
        env.processor.process(&env.state, &mut env.ctx).await,
    )?;
    latency.observe();
    EXECUTOR_METRICS.processed_transactions.inc();
    fail_at(
        &env.state,
        env.pipeline.post_transaction(&env.state, &mut env.ctx).await,
    )?;
    Ok(())
}

/// Single consumer preserving provider order, with block hooks fired on every
/// block-number change. Any error stops the run; only the teardown hook fires
/// afterwards.
pub(crate) async fn serial_worker<T: Send + Sync + 'static>(
    mut records: mpsc::Receiver<TransactionInfo<T>>,
    mut env: WorkerEnv<T>,
) -> Result<(), WorkerFailure> {
    let mut in_block = false;
    loop {
        let next = tokio::select! {
            biased;
            _ = env.cancel.cancelled() => None,
            item = records.recv() => item,
        };
        let Some(info) = next else { break };

        if in_block && env.state.block != info.block {
            fail_at(
                &env.state,
                env.pipeline.post_block(&env.state, &mut env.ctx).await,
            )?;
            EXECUTOR_METRICS.processed_blocks.inc();
            EXECUTOR_METRICS.last_block.set(env.state.block);
            in_block = false;
        }
        if !in_block {
            env.state.block = info.block;
            env.state.tx_index = info.tx_index;
            fail_at(
                &env.state,
                env.pipeline.pre_block(&env.state, &mut env.ctx).await,
            )?;
            in_block = true;
        }

        env.state.tx_index = info.tx_index;
        env.state.data = Some(Arc::new(info.data));
        execute_transaction(&mut env).await?;
        env.state.data = None;
    }

    // Close the last block unless the stream was cut short by an abort.
    if in_block && !env.cancel.is_cancelled() {
        fail_at(
            &env.state,
            env.pipeline.post_block(&env.state, &mut env.ctx).await,
        )?;
        EXECUTOR_METRICS.processed_blocks.inc();
        EXECUTOR_METRICS.last_block.set(env.state.block);
    }
    Ok(())
}

/// Races over individual transactions. No block hooks fire in this shape;
/// that is part of the contract, not an omission.
pub(crate) async fn transaction_worker<T: Send + Sync + 'static>(
    records: SharedReceiver<TransactionInfo<T>>,
    env: WorkerEnv<T>,
) -> Result<(), WorkerFailure> {
    loop {
        let Some(info) = next_item(&records, &env.cancel).await else {
            return Ok(());
        };
        let mut unit = env.clone();
        unit.state.block = info.block;
        unit.state.tx_index = info.tx_index;
        unit.state.data = Some(Arc::new(info.data));
        execute_transaction(&mut unit).await?;
    }
}

/// Races over whole blocks: block hooks around each batch, transactions of a
/// batch executed in emission order by the same worker. A failing batch skips
/// its post-block hook.
pub(crate) async fn block_worker<T: Send + Sync + 'static>(
    batches: SharedReceiver<Vec<TransactionInfo<T>>>,
    env: WorkerEnv<T>,
) -> Result<(), WorkerFailure> {
    loop {
        let Some(batch) = next_item(&batches, &env.cancel).await else {
            return Ok(());
        };
        let records: Vec<(u64, u32, Arc<T>)> = batch
            .into_iter()
            .map(|info| (info.block, info.tx_index, Arc::new(info.data)))
            .collect();
        let Some((block, first_tx, first_data)) = records.first().cloned() else {
            continue;
        };

        let mut unit = env.clone();
        unit.state.block = block;
        unit.state.tx_index = first_tx;
        unit.state.data = Some(first_data);
        fail_at(
            &unit.state,
            unit.pipeline.pre_block(&unit.state, &mut unit.ctx).await,
        )?;

        for (_, tx_index, data) in records {
            if unit.cancel.is_cancelled() {
                return Ok(());
            }
            unit.state.tx_index = tx_index;
            unit.state.data = Some(data);
            execute_transaction(&mut unit).await?;
        }

        fail_at(
            &unit.state,
            unit.pipeline.post_block(&unit.state, &mut unit.ctx).await,
        )?;
        EXECUTOR_METRICS.processed_blocks.inc();
        EXECUTOR_METRICS.last_block.set(block);
    }
}
