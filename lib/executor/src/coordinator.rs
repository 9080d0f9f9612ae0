use crate::error::{is_abort, join_errors};
use crate::forwarder;
use crate::pipeline::ExtensionPipeline;
use crate::worker::{self, PanicSlot, SharedReceiver, WorkerEnv, WorkerFailure};
use crate::{Context, Extension, Granularity, Params, Processor, Provider, State};
use futures::FutureExt;
use retrace_state_api::StateDb;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Drives a state database through a block range: pulls records from the
/// provider, schedules them onto workers according to the configured
/// granularity, and wraps every phase with the registered extensions.
///
/// Single-pass, like the providers it runs: re-running means constructing a
/// new executor over a fresh provider.
pub struct Executor<P: Provider> {
    provider: P,
}

impl<P: Provider + 'static> Executor<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Runs the configured range to completion.
    ///
    /// The teardown hook fires exactly once for every extension whether the
    /// run succeeds, fails early or is cancelled. A panic is re-raised with
    /// its original payload after all workers have quiesced; teardown is
    /// skipped in that case, since it could deadlock on the broken invariant
    /// that caused the panic.
    pub async fn run(
        self,
        params: &Params,
        processor: Arc<dyn Processor<P::Payload>>,
        extensions: Vec<Box<dyn Extension<P::Payload>>>,
    ) -> anyhow::Result<()> {
        let pipeline = Arc::new(ExtensionPipeline::new(extensions));
        let mut state = State::new(params.from);
        let mut ctx = Context::new(params.state.clone());

        let body = AssertUnwindSafe(run_body(
            self.provider,
            params,
            processor,
            pipeline.clone(),
            &mut state,
            &mut ctx,
        ))
        .catch_unwind()
        .await;

        match body {
            Err(payload) => std::panic::resume_unwind(payload),
            Ok(outcome) => match pipeline.post_run(&state, &mut ctx, outcome.err()).await {
                Some(err) => Err(err),
                None => Ok(()),
            },
        }
    }
}

/// Fires the startup hook immediately followed by the teardown hook at the
/// given block, without scheduling any work. One-shot initialization flows
/// (priming a state database ahead of a run) use this instead of a full run.
pub async fn prime<T: Send + Sync + 'static>(
    block: u64,
    state_db: Option<Arc<dyn StateDb>>,
    extensions: Vec<Box<dyn Extension<T>>>,
) -> anyhow::Result<()> {
    let pipeline = ExtensionPipeline::new(extensions);
    let state = State::new(block);
    let mut ctx = Context::new(state_db);
    let outcome = pipeline.pre_run(&state, &mut ctx).await;
    match pipeline.post_run(&state, &mut ctx, outcome.err()).await {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn run_body<P: Provider + 'static>(
    provider: P,
    params: &Params,
    processor: Arc<dyn Processor<P::Payload>>,
    pipeline: Arc<ExtensionPipeline<P::Payload>>,
    state: &mut State<P::Payload>,
    ctx: &mut Context,
) -> anyhow::Result<()> {
    pipeline.pre_run(state, ctx).await?;

    let num_workers = params.num_workers.max(1);
    let capacity = 10 * num_workers;
    let cancel = CancellationToken::new();
    let panics = Arc::new(PanicSlot::default());

    tracing::info!(
        from = params.from,
        to = params.to,
        num_workers,
        granularity = ?params.granularity,
        "starting execution"
    );

    let env = WorkerEnv {
        pipeline,
        processor,
        state: state.clone(),
        ctx: ctx.clone(),
        cancel: cancel.clone(),
    };

    type Tasks = Vec<JoinHandle<Result<(), WorkerFailure>>>;
    let (forwarder_task, worker_tasks): (JoinHandle<anyhow::Result<()>>, Tasks) =
        match params.granularity {
            Granularity::Serial => {
                let (sender, receiver) = mpsc::channel(capacity);
                let forwarder = forwarder::spawn_transaction_forwarder(
                    provider,
                    params.from,
                    params.to,
                    sender,
                    cancel.clone(),
                );
                let task = worker::spawn_worker(
                    worker::serial_worker(receiver, env),
                    cancel.clone(),
                    panics.clone(),
                );
                (forwarder, vec![task])
            }
            Granularity::Transaction => {
                let (sender, receiver) = mpsc::channel(capacity);
                let forwarder = forwarder::spawn_transaction_forwarder(
                    provider,
                    params.from,
                    params.to,
                    sender,
                    cancel.clone(),
                );
                let receiver: SharedReceiver<_> = Arc::new(tokio::sync::Mutex::new(receiver));
                let tasks = (0..num_workers)
                    .map(|_| {
                        worker::spawn_worker(
                            worker::transaction_worker(receiver.clone(), env.clone()),
                            cancel.clone(),
                            panics.clone(),
                        )
                    })
                    .collect();
                (forwarder, tasks)
            }
            Granularity::Block => {
                let (sender, receiver) = mpsc::channel(capacity);
                let forwarder = forwarder::spawn_block_forwarder(
                    provider,
                    params.from,
                    params.to,
                    sender,
                    cancel.clone(),
                );
                let receiver: SharedReceiver<_> = Arc::new(tokio::sync::Mutex::new(receiver));
                let tasks = (0..num_workers)
                    .map(|_| {
                        worker::spawn_worker(
                            worker::block_worker(receiver.clone(), env.clone()),
                            cancel.clone(),
                            panics.clone(),
                        )
                    })
                    .collect();
                (forwarder, tasks)
            }
        };

    let mut errors: Vec<anyhow::Error> = Vec::new();
    let mut failed_at: Option<(u64, u32)> = None;
    for task in worker_tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => {
                if failed_at.is_none() {
                    failed_at = Some((failure.block, failure.tx_index));
                }
                errors.push(
                    failure
                        .source
                        .context(format!("block {} tx {}", failure.block, failure.tx_index)),
                );
            }
            Err(join_error) if join_error.is_panic() => {
                std::panic::resume_unwind(join_error.into_panic())
            }
            Err(join_error) => {
                errors.push(anyhow::Error::new(join_error).context("worker task failed"))
            }
        }
    }
    match forwarder_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) if is_abort(&err) => {}
        Ok(Err(err)) => errors.insert(0, err),
        Err(join_error) if join_error.is_panic() => {
            std::panic::resume_unwind(join_error.into_panic())
        }
        Err(join_error) => {
            errors.insert(0, anyhow::Error::new(join_error).context("provider task failed"))
        }
    }

    // A captured panic wins over any collected error.
    if let Some(caught) = panics.take() {
        tracing::error!(
            panic = %caught.message,
            backtrace = %caught.backtrace,
            "worker panicked; re-raising"
        );
        std::panic::resume_unwind(caught.payload);
    }

    match join_errors(errors) {
        None => {
            // The completed sentinel the teardown hooks observe.
            state.block = params.to;
            Ok(())
        }
        Some(err) => {
            if let Some((block, tx_index)) = failed_at {
                state.block = block;
                state.tx_index = tx_index;
            }
            Err(err)
        }
    }
}
