use super::op::{OpCode, Operation, OperandClass, TraceError, unpack_header};
use super::queue::OperandQueue;
use alloy::primitives::{Address, B256, U256};
use anyhow::Context as _;
use flate2::read::GzDecoder;
use retrace_types::{AccessTuple, Log};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Streaming decoder of a recorded operation trace.
///
/// Keeps one reuse queue per operand kind; the queues evolve with every
/// decoded operation, so operations must be decoded in stream order even when
/// the caller discards them.
pub struct TraceReader<R: Read> {
    input: R,
    addresses: OperandQueue<Address>,
    keys: OperandQueue<B256>,
    values: OperandQueue<B256>,
}

enum HashSlot {
    Key,
    Value,
}

impl TraceReader<BufReader<GzDecoder<File>>> {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open trace file {}", path.display()))?;
        Ok(Self::new(BufReader::new(GzDecoder::new(file))))
    }
}

impl<R: Read> TraceReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            addresses: OperandQueue::new(),
            keys: OperandQueue::new(),
            values: OperandQueue::new(),
        }
    }

    /// Next operation, or `None` at a clean end of the stream.
    pub fn next_operation(&mut self) -> anyhow::Result<Option<Operation>> {
        let mut header = [0u8; 2];
        match self.input.read_exact(&mut header) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let (op, addr_class, key_class, value_class) =
            unpack_header(u16::from_be_bytes(header))?;

        let address = self.address_operand(addr_class)?;
        let key = self.hash_operand(key_class, HashSlot::Key)?;
        let value = self.hash_operand(value_class, HashSlot::Value)?;

        let operation = match op {
            OpCode::BeginBlock => Operation::BeginBlock {
                block: self.read_u64()?,
            },
            OpCode::EndBlock => Operation::EndBlock,
            OpCode::BeginTransaction => Operation::BeginTransaction {
                tx_index: self.read_u32()?,
            },
            OpCode::EndTransaction => Operation::EndTransaction,
            OpCode::CreateAccount => Operation::CreateAccount {
                address: operand(address),
            },
            OpCode::Exist => Operation::Exist {
                address: operand(address),
            },
            OpCode::GetBalance => Operation::GetBalance {
                address: operand(address),
            },
            OpCode::AddBalance => Operation::AddBalance {
                address: operand(address),
                amount: self.read_u256_var()?,
                reason: self.read_u8()?,
            },
            OpCode::SubBalance => Operation::SubBalance {
                address: operand(address),
                amount: self.read_u256_var()?,
                reason: self.read_u8()?,
            },
            OpCode::GetNonce => Operation::GetNonce {
                address: operand(address),
            },
            OpCode::SetNonce => Operation::SetNonce {
                address: operand(address),
                nonce: self.read_u64()?,
                reason: self.read_u8()?,
            },
            OpCode::GetCode => Operation::GetCode {
                address: operand(address),
            },
            OpCode::SetCode => {
                let address = operand(address);
                let len = self.read_u32()? as usize;
                let mut code = vec![0u8; len];
                self.input.read_exact(&mut code)?;
                Operation::SetCode { address, code }
            }
            OpCode::GetCodeHash => Operation::GetCodeHash {
                address: operand(address),
            },
            OpCode::GetCodeSize => Operation::GetCodeSize {
                address: operand(address),
            },
            OpCode::GetStorage => Operation::GetStorage {
                address: operand(address),
                key: operand(key),
            },
            OpCode::SetStorage => Operation::SetStorage {
                address: operand(address),
                key: operand(key),
                value: operand(value),
            },
            OpCode::SelfDestruct => Operation::SelfDestruct {
                address: operand(address),
            },
            OpCode::Snapshot => Operation::Snapshot {
                id: self.read_u32()?,
            },
            OpCode::RevertToSnapshot => Operation::RevertToSnapshot {
                id: self.read_u32()?,
            },
            OpCode::AddRefund => Operation::AddRefund {
                gas: self.read_u64()?,
            },
            OpCode::SubRefund => Operation::SubRefund {
                gas: self.read_u64()?,
            },
            OpCode::GetRefund => Operation::GetRefund,
            OpCode::AddLog => Operation::AddLog {
                log: self.read_log()?,
            },
            OpCode::Prepare => self.read_prepare()?,
            OpCode::Commit => Operation::Commit {
                delete_empty_objects: self.read_bool()?,
                block: self.read_u64()?,
            },
        };
        Ok(Some(operation))
    }

    fn address_operand(&mut self, class: OperandClass) -> anyhow::Result<Option<Address>> {
        match class {
            OperandClass::None => Ok(None),
            OperandClass::Zero => Ok(Some(Address::ZERO)),
            OperandClass::New => {
                let raw: [u8; 20] = self.read_array()?;
                let address = Address::from(raw);
                self.addresses.push(address);
                Ok(Some(address))
            }
            OperandClass::Previous => {
                Ok(Some(self.addresses.front().ok_or(TraceError::EmptyQueue)?))
            }
            OperandClass::Recent => {
                let index = self.read_u8()?;
                let len = self.addresses.len();
                Ok(Some(
                    self.addresses
                        .recall(index)
                        .ok_or(TraceError::BadOperandIndex { index, len })?,
                ))
            }
        }
    }

    fn hash_operand(
        &mut self,
        class: OperandClass,
        slot: HashSlot,
    ) -> anyhow::Result<Option<B256>> {
        match class {
            OperandClass::None => Ok(None),
            OperandClass::Zero => Ok(Some(B256::ZERO)),
            OperandClass::New => {
                let raw: [u8; 32] = self.read_array()?;
                let hash = B256::from(raw);
                self.queue_mut(slot).push(hash);
                Ok(Some(hash))
            }
            OperandClass::Previous => Ok(Some(
                self.queue_mut(slot).front().ok_or(TraceError::EmptyQueue)?,
            )),
            OperandClass::Recent => {
                let index = self.read_u8()?;
                let queue = self.queue_mut(slot);
                let len = queue.len();
                Ok(Some(
                    queue
                        .recall(index)
                        .ok_or(TraceError::BadOperandIndex { index, len })?,
                ))
            }
        }
    }

    fn queue_mut(&mut self, slot: HashSlot) -> &mut OperandQueue<B256> {
        match slot {
            HashSlot::Key => &mut self.keys,
            HashSlot::Value => &mut self.values,
        }
    }

    fn read_prepare(&mut self) -> anyhow::Result<Operation> {
        let rules = self.read_u8()?;
        let sender = Address::from(self.read_array::<20>()?);
        let coinbase = Address::from(self.read_array::<20>()?);
        let destination = if self.read_bool()? {
            Some(Address::from(self.read_array::<20>()?))
        } else {
            None
        };
        let precompile_count = self.read_u16()?;
        let mut precompiles = Vec::with_capacity(usize::from(precompile_count));
        for _ in 0..precompile_count {
            precompiles.push(Address::from(self.read_array::<20>()?));
        }
        let tuple_count = self.read_u16()?;
        let mut access_list = Vec::with_capacity(usize::from(tuple_count));
        for _ in 0..tuple_count {
            let address = Address::from(self.read_array::<20>()?);
            let key_count = self.read_u16()?;
            let mut storage_keys = Vec::with_capacity(usize::from(key_count));
            for _ in 0..key_count {
                storage_keys.push(B256::from(self.read_array::<32>()?));
            }
            access_list.push(AccessTuple {
                address,
                storage_keys,
            });
        }
        Ok(Operation::Prepare {
            rules,
            sender,
            coinbase,
            destination,
            precompiles,
            access_list,
        })
    }

    fn read_log(&mut self) -> anyhow::Result<Log> {
        bincode::serde::decode_from_std_read(&mut self.input, bincode::config::standard())
            .context("failed to decode log payload")
    }

    fn read_array<const N: usize>(&mut self) -> anyhow::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.input.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_bool(&mut self) -> anyhow::Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u16(&mut self) -> anyhow::Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> anyhow::Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> anyhow::Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Variable-size big-endian unsigned integer: one length byte, then the
    /// minimal big-endian representation.
    fn read_u256_var(&mut self) -> anyhow::Result<U256> {
        let len = usize::from(self.read_u8()?);
        if len > 32 {
            return Err(TraceError::OversizedInteger(len).into());
        }
        let mut buf = [0u8; 32];
        self.input.read_exact(&mut buf[32 - len..])?;
        Ok(U256::from_be_bytes(buf))
    }
}

fn operand<T>(value: Option<T>) -> T {
    value.expect("operand presence is enforced by header validation")
}
