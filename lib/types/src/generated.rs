use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// A synthetic value transfer produced by the deterministic transaction
/// generator. Carries just enough to be executed against any state database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTx {
    pub sender: Address,
    pub recipient: Address,
    pub value: U256,
    pub nonce: u64,
}
