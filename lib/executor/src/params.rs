use crate::error::InvalidGranularity;
use retrace_state_api::StateDb;
use std::fmt;
use std::sync::Arc;

/// Unit of scheduling for a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Granularity {
    /// One worker consuming the stream in provider order, with block hooks
    /// around every block.
    #[default]
    Serial,
    /// Workers race over individual transactions; block hooks never fire.
    Transaction,
    /// Workers race over whole blocks; block hooks fire around every batch.
    Block,
}

impl TryFrom<u8> for Granularity {
    type Error = InvalidGranularity;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Serial),
            1 => Ok(Self::Transaction),
            2 => Ok(Self::Block),
            other => Err(InvalidGranularity(other)),
        }
    }
}

/// Configuration of a single run.
#[derive(Clone)]
pub struct Params {
    /// First block of the range, inclusive.
    pub from: u64,
    /// Upper bound of the range, exclusive. [`retrace_types::LAST_BLOCK`]
    /// leaves the range open-ended for sources that support it.
    pub to: u64,
    /// Worker count for the parallel granularities. Values below one behave
    /// like one.
    pub num_workers: usize,
    pub granularity: Granularity,
    /// State database handed to processors and extensions through the run
    /// context.
    pub state: Option<Arc<dyn StateDb>>,
}

impl Params {
    pub fn new(from: u64, to: u64) -> Self {
        Self {
            from,
            to,
            num_workers: 1,
            granularity: Granularity::Serial,
            state: None,
        }
    }

    /// Transaction-parallel run with one worker per available CPU.
    pub fn parallel(from: u64, to: u64) -> Self {
        Self {
            num_workers: num_cpus::get(),
            granularity: Granularity::Transaction,
            ..Self::new(from, to)
        }
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_state(mut self, state: Arc<dyn StateDb>) -> Self {
        self.state = Some(state);
        self
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Params")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("num_workers", &self.num_workers)
            .field("granularity", &self.granularity)
            .field("state", &self.state.is_some())
            .finish()
    }
}
