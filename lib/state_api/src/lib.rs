mod in_memory;
pub use in_memory::InMemoryStateDb;

use alloy::primitives::{Address, B256, U256};
use retrace_types::Log;

/// Read-only view on account state.
///
/// Implemented both by live state databases and by archives (historical,
/// non-committable views at a fixed block height).
pub trait StateReader: Send + Sync {
    fn exists(&self, address: Address) -> bool;
    fn balance(&self, address: Address) -> U256;
    fn nonce(&self, address: Address) -> u64;
    fn code(&self, address: Address) -> Vec<u8>;
    fn code_hash(&self, address: Address) -> B256;
    fn storage(&self, address: Address, key: B256) -> B256;
}

/// The mutable state database a run executes against.
///
/// The execution core only drives the block/transaction lifecycle and passes
/// the handle through to processors and extensions; everything else is called
/// by them. Implementations must be safe to share across workers, since the
/// handle is one shared reference in the parallel scheduling modes.
pub trait StateDb: StateReader {
    fn create_account(&self, address: Address);
    fn add_balance(&self, address: Address, amount: U256);
    fn sub_balance(&self, address: Address, amount: U256);
    fn set_nonce(&self, address: Address, nonce: u64);
    fn set_code(&self, address: Address, code: Vec<u8>);
    fn set_storage(&self, address: Address, key: B256, value: B256);
    fn self_destruct(&self, address: Address);

    /// Captures the current account state and returns an id that
    /// [`StateDb::revert_to_snapshot`] accepts until the end of the
    /// enclosing transaction.
    fn snapshot(&self) -> u32;
    fn revert_to_snapshot(&self, id: u32) -> anyhow::Result<()>;

    fn add_refund(&self, gas: u64);
    fn sub_refund(&self, gas: u64);
    fn refund(&self) -> u64;

    fn add_log(&self, log: Log);
    fn logs(&self) -> Vec<Log>;

    fn begin_block(&self, block: u64);
    fn end_block(&self);
    fn begin_transaction(&self, tx_index: u32);
    fn end_transaction(&self);
}

/// Read-only key-value store.
///
/// The run context exposes the chain-history database through this contract;
/// the execution core never reads from it itself.
pub trait KvReader: Send + Sync {
    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;
}
