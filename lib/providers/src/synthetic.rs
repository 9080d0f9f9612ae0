use alloy::primitives::{Address, U256};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use retrace_executor::{Consumer, Provider, TransactionInfo};
use retrace_state_api::StateDb;
use retrace_types::GeneratedTx;
use std::sync::Arc;

/// Deterministic stream of synthetic value transfers, used to smoke-test
/// schedulers and processors without any recorded data.
///
/// Every generated sender is credited in the attached state database before
/// its record is emitted, so a transfer processor can execute it right away.
/// Runs with the same seed produce the same transactions.
pub struct SyntheticTxProvider {
    state: Arc<dyn StateDb>,
    txs_per_block: u32,
    seed: u64,
}

impl SyntheticTxProvider {
    pub fn new(state: Arc<dyn StateDb>, txs_per_block: u32, seed: u64) -> Self {
        Self {
            state,
            txs_per_block,
            seed,
        }
    }
}

impl Provider for SyntheticTxProvider {
    type Payload = GeneratedTx;

    fn run(&mut self, from: u64, to: u64, consume: Consumer<'_, GeneratedTx>) -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        for block in from..to {
            for tx_index in 0..self.txs_per_block {
                let sender = Address::from(rng.random::<[u8; 20]>());
                let recipient = Address::from(rng.random::<[u8; 20]>());
                let value = U256::from(rng.random_range(1u64..=1_000_000));
                let tx = GeneratedTx {
                    sender,
                    recipient,
                    value,
                    nonce: 0,
                };

                self.state.create_account(sender);
                self.state.add_balance(sender, value);
                self.state.set_nonce(sender, tx.nonce);

                consume(TransactionInfo {
                    block,
                    tx_index,
                    data: tx,
                })?;
            }
        }
        Ok(())
    }
}
