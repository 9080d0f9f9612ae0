use retrace_state_api::{KvReader, StateDb, StateReader};
use retrace_types::ExecutionResult;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Position of a run, as seen by hooks and processors.
///
/// One logical value exists per run; workers clone it before mutating, so a
/// mutation never crosses worker boundaries. Field validity depends on the
/// callback: `block` is always set; `tx_index` is meaningful in the
/// transaction hooks, `post_block` and `post_run` after a failure; `data` is
/// populated for the transaction hooks.
#[derive(Debug)]
pub struct State<T> {
    pub block: u64,
    pub tx_index: u32,
    pub data: Option<Arc<T>>,
}

impl<T> State<T> {
    pub fn new(block: u64) -> Self {
        Self {
            block,
            tx_index: 0,
            data: None,
        }
    }
}

// Hand-rolled so cloning does not require `T: Clone`; the payload is behind
// an `Arc`.
impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            block: self.block,
            tx_index: self.tx_index,
            data: self.data.clone(),
        }
    }
}

/// Side channels shared between the processor and the extensions.
///
/// One value exists per run; workers take a shallow copy per unit of work, so
/// per-unit mutations (most importantly `execution_result`) never race. The
/// handles inside stay shared.
#[derive(Clone, Default)]
pub struct Context {
    pub state: Option<Arc<dyn StateDb>>,
    /// Historical, non-committable view of the state at a prior height.
    pub archive: Option<Arc<dyn StateReader>>,
    /// Location of the state database on disk, when one is materialized.
    pub state_db_path: Option<PathBuf>,
    /// Read-only chain-history store.
    pub history_db: Option<Arc<dyn KvReader>>,
    /// Recoverable errors the processor or an extension wants surfaced. The
    /// scheduling core never reads from this channel; whoever installs it
    /// must drain it.
    pub error_sink: Option<mpsc::Sender<anyhow::Error>>,
    /// Receipt of the transaction most recently processed with this context
    /// copy; set by the processor, read by the post-transaction hooks.
    pub execution_result: Option<ExecutionResult>,
}

impl Context {
    pub fn new(state: Option<Arc<dyn StateDb>>) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }
}
