use super::op::{Operation, OperandClass, pack_header};
use super::queue::OperandQueue;
use alloy::primitives::{Address, B256, U256};
use anyhow::Context as _;
use flate2::Compression;
use flate2::write::GzEncoder;
use retrace_types::{AccessTuple, Log};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Streaming encoder of the operation-trace format.
///
/// Mirrors the decoder's reuse queues exactly: a value equal to the queue
/// front becomes `Previous`, one addressable deeper in the queue becomes
/// `Recent` (and is re-pushed, like the decoder does on recall), anything
/// else is written raw as `New`.
pub struct TraceWriter<W: Write> {
    out: W,
    addresses: OperandQueue<Address>,
    keys: OperandQueue<B256>,
    values: OperandQueue<B256>,
}

enum Encoded<V> {
    Absent,
    Zero,
    New(V),
    Previous,
    Recent(u8),
}

impl<V> Encoded<V> {
    fn class(&self) -> OperandClass {
        match self {
            Encoded::Absent => OperandClass::None,
            Encoded::Zero => OperandClass::Zero,
            Encoded::New(_) => OperandClass::New,
            Encoded::Previous => OperandClass::Previous,
            Encoded::Recent(_) => OperandClass::Recent,
        }
    }
}

fn classify<V: Copy + Eq>(queue: &mut OperandQueue<V>, operand: Option<V>, zero: V) -> Encoded<V> {
    let Some(value) = operand else {
        return Encoded::Absent;
    };
    if value == zero {
        return Encoded::Zero;
    }
    if queue.front() == Some(value) {
        return Encoded::Previous;
    }
    if let Some(index) = queue.position(value) {
        queue.push(value);
        return Encoded::Recent(index);
    }
    queue.push(value);
    Encoded::New(value)
}

impl TraceWriter<GzEncoder<BufWriter<File>>> {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create trace file {}", path.display()))?;
        Ok(Self::new(GzEncoder::new(
            BufWriter::new(file),
            Compression::default(),
        )))
    }

    pub fn finish(self) -> anyhow::Result<()> {
        self.out.finish()?.flush()?;
        Ok(())
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            addresses: OperandQueue::new(),
            keys: OperandQueue::new(),
            values: OperandQueue::new(),
        }
    }

    /// Consumes the writer, returning the underlying sink. In-memory sinks
    /// need no finishing step; the gzip-backed writer has `finish` instead.
    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn write_operation(&mut self, operation: &Operation) -> anyhow::Result<()> {
        let (address, key, value) = operation.operands();
        let address = classify(&mut self.addresses, address, Address::ZERO);
        let key = classify(&mut self.keys, key, B256::ZERO);
        let value = classify(&mut self.values, value, B256::ZERO);

        let header = pack_header(
            operation.code(),
            address.class(),
            key.class(),
            value.class(),
        );
        self.out.write_all(&header.to_be_bytes())?;
        self.write_operand(&address, |a| a.into_array().to_vec())?;
        self.write_operand(&key, |k| k.to_vec())?;
        self.write_operand(&value, |v| v.to_vec())?;

        match operation {
            Operation::BeginBlock { block } => self.write_u64(*block)?,
            Operation::BeginTransaction { tx_index } => self.write_u32(*tx_index)?,
            Operation::AddBalance { amount, reason, .. }
            | Operation::SubBalance { amount, reason, .. } => {
                self.write_u256_var(*amount)?;
                self.write_u8(*reason)?;
            }
            Operation::SetNonce { nonce, reason, .. } => {
                self.write_u64(*nonce)?;
                self.write_u8(*reason)?;
            }
            Operation::SetCode { code, .. } => {
                self.write_u32(code.len() as u32)?;
                self.out.write_all(code)?;
            }
            Operation::Snapshot { id } | Operation::RevertToSnapshot { id } => {
                self.write_u32(*id)?
            }
            Operation::AddRefund { gas } | Operation::SubRefund { gas } => self.write_u64(*gas)?,
            Operation::AddLog { log } => self.write_log(log)?,
            Operation::Prepare {
                rules,
                sender,
                coinbase,
                destination,
                precompiles,
                access_list,
            } => {
                self.write_u8(*rules)?;
                self.out.write_all(sender.as_slice())?;
                self.out.write_all(coinbase.as_slice())?;
                match destination {
                    Some(destination) => {
                        self.write_u8(1)?;
                        self.out.write_all(destination.as_slice())?;
                    }
                    None => self.write_u8(0)?,
                }
                self.write_u16(precompiles.len() as u16)?;
                for precompile in precompiles {
                    self.out.write_all(precompile.as_slice())?;
                }
                self.write_access_list(access_list)?;
            }
            Operation::Commit {
                delete_empty_objects,
                block,
            } => {
                self.write_u8(u8::from(*delete_empty_objects))?;
                self.write_u64(*block)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn write_operand<V>(
        &mut self,
        encoded: &Encoded<V>,
        raw: impl Fn(&V) -> Vec<u8>,
    ) -> anyhow::Result<()> {
        match encoded {
            Encoded::New(value) => self.out.write_all(&raw(value))?,
            Encoded::Recent(index) => self.write_u8(*index)?,
            Encoded::Absent | Encoded::Zero | Encoded::Previous => {}
        }
        Ok(())
    }

    fn write_access_list(&mut self, access_list: &[AccessTuple]) -> anyhow::Result<()> {
        self.write_u16(access_list.len() as u16)?;
        for tuple in access_list {
            self.out.write_all(tuple.address.as_slice())?;
            self.write_u16(tuple.storage_keys.len() as u16)?;
            for key in &tuple.storage_keys {
                self.out.write_all(key.as_slice())?;
            }
        }
        Ok(())
    }

    fn write_log(&mut self, log: &Log) -> anyhow::Result<()> {
        bincode::serde::encode_into_std_write(log, &mut self.out, bincode::config::standard())
            .context("failed to encode log payload")?;
        Ok(())
    }

    fn write_u8(&mut self, value: u8) -> anyhow::Result<()> {
        Ok(self.out.write_all(&[value])?)
    }

    fn write_u16(&mut self, value: u16) -> anyhow::Result<()> {
        Ok(self.out.write_all(&value.to_be_bytes())?)
    }

    fn write_u32(&mut self, value: u32) -> anyhow::Result<()> {
        Ok(self.out.write_all(&value.to_be_bytes())?)
    }

    fn write_u64(&mut self, value: u64) -> anyhow::Result<()> {
        Ok(self.out.write_all(&value.to_be_bytes())?)
    }

    /// Minimal big-endian representation behind one length byte.
    fn write_u256_var(&mut self, value: U256) -> anyhow::Result<()> {
        let bytes = value.to_be_bytes::<32>();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        self.write_u8((32 - skip) as u8)?;
        Ok(self.out.write_all(&bytes[skip..])?)
    }
}
