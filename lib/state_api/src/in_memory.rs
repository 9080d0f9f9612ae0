use crate::{StateDb, StateReader};
use alloy::primitives::{Address, B256, U256, keccak256};
use anyhow::bail;
use retrace_types::Log;
use std::collections::HashMap;
use std::sync::Mutex;

/// Map-backed state database.
///
/// Backs the synthetic transaction generator and the test suites. Snapshots
/// are full copies of the account map; cheap enough for the account counts
/// these flows see, and trivially correct.
#[derive(Debug, Default)]
pub struct InMemoryStateDb {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<Address, Account>,
    snapshots: Vec<HashMap<Address, Account>>,
    logs: Vec<Log>,
    refund: u64,
    current_block: Option<u64>,
    current_tx: Option<u32>,
}

#[derive(Clone, Debug, Default)]
struct Account {
    nonce: u64,
    balance: U256,
    code: Vec<u8>,
    storage: HashMap<B256, B256>,
}

impl InMemoryStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block the database was last positioned at via `begin_block`.
    pub fn current_block(&self) -> Option<u64> {
        self.inner.lock().unwrap().current_block
    }

    /// Transaction the database was last positioned at via
    /// `begin_transaction`.
    pub fn current_transaction(&self) -> Option<u32> {
        self.inner.lock().unwrap().current_tx
    }
}

impl StateReader for InMemoryStateDb {
    fn exists(&self, address: Address) -> bool {
        self.inner.lock().unwrap().accounts.contains_key(&address)
    }

    fn balance(&self, address: Address) -> U256 {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .get(&address)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    fn nonce(&self, address: Address) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .get(&address)
            .map(|a| a.nonce)
            .unwrap_or_default()
    }

    fn code(&self, address: Address) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .get(&address)
            .map(|a| a.code.clone())
            .unwrap_or_default()
    }

    fn code_hash(&self, address: Address) -> B256 {
        keccak256(self.code(address))
    }

    fn storage(&self, address: Address, key: B256) -> B256 {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .get(&address)
            .and_then(|a| a.storage.get(&key).copied())
            .unwrap_or_default()
    }
}

impl StateDb for InMemoryStateDb {
    fn create_account(&self, address: Address) {
        self.inner
            .lock()
            .unwrap()
            .accounts
            .insert(address, Account::default());
    }

    fn add_balance(&self, address: Address, amount: U256) {
        let mut inner = self.inner.lock().unwrap();
        let account = inner.accounts.entry(address).or_default();
        account.balance = account.balance.saturating_add(amount);
    }

    fn sub_balance(&self, address: Address, amount: U256) {
        let mut inner = self.inner.lock().unwrap();
        let account = inner.accounts.entry(address).or_default();
        account.balance = account.balance.saturating_sub(amount);
    }

    fn set_nonce(&self, address: Address, nonce: u64) {
        self.inner
            .lock()
            .unwrap()
            .accounts
            .entry(address)
            .or_default()
            .nonce = nonce;
    }

    fn set_code(&self, address: Address, code: Vec<u8>) {
        self.inner
            .lock()
            .unwrap()
            .accounts
            .entry(address)
            .or_default()
            .code = code;
    }

    fn set_storage(&self, address: Address, key: B256, value: B256) {
        self.inner
            .lock()
            .unwrap()
            .accounts
            .entry(address)
            .or_default()
            .storage
            .insert(key, value);
    }

    fn self_destruct(&self, address: Address) {
        self.inner.lock().unwrap().accounts.remove(&address);
    }

    fn snapshot(&self) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let accounts = inner.accounts.clone();
        inner.snapshots.push(accounts);
        (inner.snapshots.len() - 1) as u32
    }

    fn revert_to_snapshot(&self, id: u32) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if id as usize >= inner.snapshots.len() {
            bail!("unknown snapshot id {id}");
        }
        inner.accounts = inner.snapshots[id as usize].clone();
        inner.snapshots.truncate(id as usize);
        Ok(())
    }

    fn add_refund(&self, gas: u64) {
        self.inner.lock().unwrap().refund += gas;
    }

    fn sub_refund(&self, gas: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.refund = inner.refund.saturating_sub(gas);
    }

    fn refund(&self) -> u64 {
        self.inner.lock().unwrap().refund
    }

    fn add_log(&self, log: Log) {
        self.inner.lock().unwrap().logs.push(log);
    }

    fn logs(&self) -> Vec<Log> {
        self.inner.lock().unwrap().logs.clone()
    }

    fn begin_block(&self, block: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.current_block = Some(block);
    }

    fn end_block(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.current_block = None;
    }

    fn begin_transaction(&self, tx_index: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.current_tx = Some(tx_index);
        inner.snapshots.clear();
        inner.refund = 0;
        inner.logs.clear();
    }

    fn end_transaction(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.current_tx = None;
        inner.snapshots.clear();
    }
}
