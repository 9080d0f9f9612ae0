use crate::error::{Aborted, is_abort};
use crate::provider::{Provider, TransactionInfo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Drives the provider on a blocking thread, publishing every record into the
/// bounded channel.
///
/// Publication cannot race the abort signal: a send either lands while the
/// receiving side is alive, or fails because every worker is gone, which is
/// reported as an abort. Dropping the sender at the end is the end-of-stream
/// marker for the workers.
pub(crate) fn spawn_transaction_forwarder<P>(
    mut provider: P,
    from: u64,
    to: u64,
    records: mpsc::Sender<TransactionInfo<P::Payload>>,
    cancel: CancellationToken,
) -> JoinHandle<anyhow::Result<()>>
where
    P: Provider + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = provider.run(from, to, &mut |info| {
            if cancel.is_cancelled() {
                return Err(anyhow::Error::new(Aborted));
            }
            records
                .blocking_send(info)
                .map_err(|_| anyhow::Error::new(Aborted))
        });
        if let Err(err) = &result
            && !is_abort(err)
        {
            tracing::debug!(%err, "provider stopped with an error");
        }
        result
    })
}

/// Same as [`spawn_transaction_forwarder`], but coalesces consecutive records
/// of one block into a batch: published on block change, the final non-empty
/// batch flushed at end-of-stream.
pub(crate) fn spawn_block_forwarder<P>(
    mut provider: P,
    from: u64,
    to: u64,
    batches: mpsc::Sender<Vec<TransactionInfo<P::Payload>>>,
    cancel: CancellationToken,
) -> JoinHandle<anyhow::Result<()>>
where
    P: Provider + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut batch: Vec<TransactionInfo<P::Payload>> = Vec::new();
        let result = provider.run(from, to, &mut |info| {
            if cancel.is_cancelled() {
                return Err(anyhow::Error::new(Aborted));
            }
            if let Some(last) = batch.last()
                && last.block != info.block
            {
                let full = std::mem::take(&mut batch);
                batches
                    .blocking_send(full)
                    .map_err(|_| anyhow::Error::new(Aborted))?;
            }
            batch.push(info);
            Ok(())
        });
        result?;
        if !batch.is_empty() {
            batches
                .blocking_send(batch)
                .map_err(|_| anyhow::Error::new(Aborted))?;
        }
        Ok(())
    })
}
