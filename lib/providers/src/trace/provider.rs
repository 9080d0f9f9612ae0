use super::op::Operation;
use super::reader::TraceReader;
use retrace_executor::{Consumer, Provider, TransactionInfo};
use std::path::PathBuf;

/// Streams a recorded operation trace as scheduler records.
///
/// Every decoded operation is one record carrying the current
/// `(block, tx_index)` position, updated by the block and transaction
/// markers in the stream. Blocks below `from` are decoded (the reuse queues
/// must evolve) but not emitted; the first block beyond `to` ends the
/// stream, so the trace range is inclusive of `to`, matching the recorder.
/// End-of-stream is normal termination.
pub struct TraceFileProvider {
    path: PathBuf,
}

impl TraceFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Provider for TraceFileProvider {
    type Payload = Operation;

    fn run(&mut self, from: u64, to: u64, consume: Consumer<'_, Operation>) -> anyhow::Result<()> {
        let mut reader = TraceReader::open(&self.path)?;
        let mut block = 0u64;
        let mut tx_index = 0u32;
        while let Some(operation) = reader.next_operation()? {
            match &operation {
                Operation::BeginBlock { block: next } => {
                    if *next > to {
                        return Ok(());
                    }
                    block = *next;
                    tx_index = 0;
                }
                Operation::BeginTransaction { tx_index: next } => tx_index = *next,
                _ => {}
            }
            if block < from {
                continue;
            }
            consume(TransactionInfo {
                block,
                tx_index,
                data: operation,
            })?;
        }
        Ok(())
    }
}
