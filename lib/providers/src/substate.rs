use crate::db::{NamedColumnFamily, TypedDb};
use anyhow::Context as _;
use retrace_executor::{Consumer, Provider, TransactionInfo};
use retrace_state_api::KvReader;
use retrace_types::Substate;
use std::path::Path;
use std::sync::Arc;

#[derive(Copy, Clone, Debug)]
pub enum SubstateColumnFamily {
    Substates,
}

impl NamedColumnFamily for SubstateColumnFamily {
    const DB_NAME: &'static str = "substate_store";
    const ALL: &'static [Self] = &[SubstateColumnFamily::Substates];

    fn name(&self) -> &'static str {
        match self {
            SubstateColumnFamily::Substates => "substates",
        }
    }
}

const KEY_PREFIX: &[u8; 2] = b"ss";
const KEY_LEN: usize = 2 + 8 + 4;

/// Big-endian `(block, tx)` key, so lexicographic key order is execution
/// order and range scans are plain seeks.
fn substate_key(block: u64, tx_index: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[..2].copy_from_slice(KEY_PREFIX);
    key[2..10].copy_from_slice(&block.to_be_bytes());
    key[10..].copy_from_slice(&tx_index.to_be_bytes());
    key
}

fn parse_key(key: &[u8]) -> Option<(u64, u32)> {
    if key.len() != KEY_LEN || &key[..2] != KEY_PREFIX {
        return None;
    }
    let block = u64::from_be_bytes(key[2..10].try_into().unwrap());
    let tx_index = u32::from_be_bytes(key[10..].try_into().unwrap());
    Some((block, tx_index))
}

/// Sorted store of recorded transaction substates.
///
/// Doubles as the read-only chain-history handle of a run context through
/// [`KvReader`].
pub struct SubstateDb {
    db: TypedDb<SubstateColumnFamily>,
}

impl SubstateDb {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            db: TypedDb::open(path)?,
        })
    }

    pub fn put_substate(
        &self,
        block: u64,
        tx_index: u32,
        substate: &Substate,
    ) -> anyhow::Result<()> {
        let value = bincode::serde::encode_to_vec(substate, bincode::config::standard())
            .context("failed to encode substate")?;
        self.db.put_cf(
            SubstateColumnFamily::Substates,
            &substate_key(block, tx_index),
            &value,
        )
    }

    pub fn get_substate(&self, block: u64, tx_index: u32) -> anyhow::Result<Option<Substate>> {
        let Some(bytes) = self.db.get_cf(
            SubstateColumnFamily::Substates,
            &substate_key(block, tx_index),
        )?
        else {
            return Ok(None);
        };
        let (substate, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .context("failed to decode substate")?;
        Ok(Some(substate))
    }
}

impl KvReader for SubstateDb {
    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.db.get_cf(SubstateColumnFamily::Substates, key)
    }
}

/// Streams stored substates for blocks in `[from, to)` via a seek into the
/// sorted key space. Lower bound inclusive, upper bound exclusive.
pub struct SubstateProvider {
    db: Arc<SubstateDb>,
}

impl SubstateProvider {
    pub fn new(db: Arc<SubstateDb>) -> Self {
        Self { db }
    }
}

impl Provider for SubstateProvider {
    type Payload = Substate;

    fn run(&mut self, from: u64, to: u64, consume: Consumer<'_, Substate>) -> anyhow::Result<()> {
        let start = substate_key(from, 0);
        for entry in self
            .db
            .db
            .iter_from(SubstateColumnFamily::Substates, &start)
        {
            let (key, value) = entry?;
            // Past the end of the substate key space.
            let Some((block, tx_index)) = parse_key(&key) else {
                break;
            };
            if block >= to {
                break;
            }
            let (data, _) = bincode::serde::decode_from_slice(&value, bincode::config::standard())
                .context("failed to decode substate")?;
            consume(TransactionInfo {
                block,
                tx_index,
                data,
            })?;
        }
        Ok(())
    }
}
