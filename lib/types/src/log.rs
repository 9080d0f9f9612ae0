use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// An event emitted by a contract during transaction execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

/// Outcome of executing a single transaction against the state database.
///
/// Produced by the processor and handed to the post-transaction hooks through
/// the run context.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[default]
    Success,
    Reverted,
    Failed,
}
