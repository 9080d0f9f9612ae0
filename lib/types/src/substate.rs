use crate::ExecutionResult;
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Accounts touched by a transaction, keyed by address.
///
/// A `BTreeMap` keeps the encoded form deterministic, so two recordings of
/// the same transaction are byte-identical.
pub type WorldState = BTreeMap<Address, SubstateAccount>;

/// The recorded pre- and post-state of a single historical transaction plus
/// everything needed to re-execute it in isolation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substate {
    /// Account state read during execution, as it was before the transaction.
    pub pre_state: WorldState,
    /// Account state written by the transaction.
    pub post_state: WorldState,
    pub env: SubstateEnv,
    pub message: SubstateMessage,
    /// The receipt the original execution produced; re-execution is compared
    /// against it.
    pub result: ExecutionResult,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstateAccount {
    pub nonce: u64,
    pub balance: U256,
    pub code: Vec<u8>,
    pub storage: BTreeMap<B256, B256>,
}

/// Block-level execution environment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstateEnv {
    pub coinbase: Address,
    pub difficulty: U256,
    pub gas_limit: u64,
    pub number: u64,
    pub timestamp: u64,
    pub base_fee: Option<U256>,
}

/// The transaction message itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstateMessage {
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub nonce: u64,
    pub gas: u64,
    pub gas_price: U256,
    pub value: U256,
    pub input: Vec<u8>,
}
