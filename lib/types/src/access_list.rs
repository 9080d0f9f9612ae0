use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// One entry of a transaction access list: an address and the storage keys
/// that were declared for it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTuple {
    pub address: Address,
    pub storage_keys: Vec<B256>,
}
