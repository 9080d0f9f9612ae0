use alloy::primitives::{Address, B256, U256};
use retrace_types::{AccessTuple, Log};

/// Number of operand-reuse classes; the packing base of the header.
pub(crate) const CLASS_COUNT: u16 = 5;

/// How an operand slot of an operation is materialized in the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandClass {
    /// The operation does not use this slot.
    None = 0,
    /// The zero value; nothing is read.
    Zero = 1,
    /// Raw bytes follow; the value is pushed into the reuse queue.
    New = 2,
    /// The most recently queued value.
    Previous = 3,
    /// One index byte follows; the value at that queue position is reused and
    /// re-pushed.
    Recent = 4,
}

impl OperandClass {
    fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::Zero,
            2 => Self::New,
            3 => Self::Previous,
            4 => Self::Recent,
            _ => unreachable!("raw class is reduced modulo CLASS_COUNT"),
        }
    }
}

/// Identifier of one recorded operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    BeginBlock,
    EndBlock,
    BeginTransaction,
    EndTransaction,
    CreateAccount,
    Exist,
    GetBalance,
    AddBalance,
    SubBalance,
    GetNonce,
    SetNonce,
    GetCode,
    SetCode,
    GetCodeHash,
    GetCodeSize,
    GetStorage,
    SetStorage,
    SelfDestruct,
    Snapshot,
    RevertToSnapshot,
    AddRefund,
    SubRefund,
    GetRefund,
    AddLog,
    Prepare,
    Commit,
}

impl OpCode {
    pub(crate) const ALL: [OpCode; 26] = [
        OpCode::BeginBlock,
        OpCode::EndBlock,
        OpCode::BeginTransaction,
        OpCode::EndTransaction,
        OpCode::CreateAccount,
        OpCode::Exist,
        OpCode::GetBalance,
        OpCode::AddBalance,
        OpCode::SubBalance,
        OpCode::GetNonce,
        OpCode::SetNonce,
        OpCode::GetCode,
        OpCode::SetCode,
        OpCode::GetCodeHash,
        OpCode::GetCodeSize,
        OpCode::GetStorage,
        OpCode::SetStorage,
        OpCode::SelfDestruct,
        OpCode::Snapshot,
        OpCode::RevertToSnapshot,
        OpCode::AddRefund,
        OpCode::SubRefund,
        OpCode::GetRefund,
        OpCode::AddLog,
        OpCode::Prepare,
        OpCode::Commit,
    ];

    fn from_raw(raw: u16) -> Option<Self> {
        Self::ALL.get(usize::from(raw)).copied()
    }

    fn raw(self) -> u16 {
        Self::ALL
            .iter()
            .position(|&op| op == self)
            .expect("every op code is listed in ALL") as u16
    }

    /// Which operand slots this operation uses: `(address, key, value)`.
    pub(crate) fn operand_slots(self) -> (bool, bool, bool) {
        match self {
            OpCode::CreateAccount
            | OpCode::Exist
            | OpCode::GetBalance
            | OpCode::AddBalance
            | OpCode::SubBalance
            | OpCode::GetNonce
            | OpCode::SetNonce
            | OpCode::GetCode
            | OpCode::SetCode
            | OpCode::GetCodeHash
            | OpCode::GetCodeSize
            | OpCode::SelfDestruct => (true, false, false),
            OpCode::GetStorage => (true, true, false),
            OpCode::SetStorage => (true, true, true),
            _ => (false, false, false),
        }
    }
}

/// Decode failures of the trace stream.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("unknown operation header {0:#06x}")]
    UnknownHeader(u16),
    #[error("operand index {index} outside reuse queue of length {len}")]
    BadOperandIndex { index: u8, len: usize },
    #[error("operand reuse against an empty queue")]
    EmptyQueue,
    #[error("oversized integer payload of {0} bytes")]
    OversizedInteger(usize),
}

/// Packs `(op, addr, key, value)` into the 16-bit big-endian header by
/// Horner's scheme over the class count.
pub(crate) fn pack_header(
    op: OpCode,
    addr: OperandClass,
    key: OperandClass,
    value: OperandClass,
) -> u16 {
    let mut header = op.raw();
    header = header * CLASS_COUNT + addr as u16;
    header = header * CLASS_COUNT + key as u16;
    header * CLASS_COUNT + value as u16
}

pub(crate) fn unpack_header(
    header: u16,
) -> Result<(OpCode, OperandClass, OperandClass, OperandClass), TraceError> {
    let value = OperandClass::from_raw(header % CLASS_COUNT);
    let key = OperandClass::from_raw(header / CLASS_COUNT % CLASS_COUNT);
    let addr = OperandClass::from_raw(header / (CLASS_COUNT * CLASS_COUNT) % CLASS_COUNT);
    let op = OpCode::from_raw(header / (CLASS_COUNT * CLASS_COUNT * CLASS_COUNT))
        .ok_or(TraceError::UnknownHeader(header))?;

    // A class on a slot the operation does not use, or a missing class on one
    // it does, makes the whole header invalid.
    let (uses_addr, uses_key, uses_value) = op.operand_slots();
    let classes_valid = (uses_addr != (addr == OperandClass::None))
        && (uses_key != (key == OperandClass::None))
        && (uses_value != (value == OperandClass::None));
    if !classes_valid {
        return Err(TraceError::UnknownHeader(header));
    }
    Ok((op, addr, key, value))
}

/// A decoded state-transition operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    BeginBlock {
        block: u64,
    },
    EndBlock,
    BeginTransaction {
        tx_index: u32,
    },
    EndTransaction,
    CreateAccount {
        address: Address,
    },
    Exist {
        address: Address,
    },
    GetBalance {
        address: Address,
    },
    AddBalance {
        address: Address,
        amount: U256,
        reason: u8,
    },
    SubBalance {
        address: Address,
        amount: U256,
        reason: u8,
    },
    GetNonce {
        address: Address,
    },
    SetNonce {
        address: Address,
        nonce: u64,
        reason: u8,
    },
    GetCode {
        address: Address,
    },
    SetCode {
        address: Address,
        code: Vec<u8>,
    },
    GetCodeHash {
        address: Address,
    },
    GetCodeSize {
        address: Address,
    },
    GetStorage {
        address: Address,
        key: B256,
    },
    SetStorage {
        address: Address,
        key: B256,
        value: B256,
    },
    SelfDestruct {
        address: Address,
    },
    Snapshot {
        id: u32,
    },
    RevertToSnapshot {
        id: u32,
    },
    AddRefund {
        gas: u64,
    },
    SubRefund {
        gas: u64,
    },
    GetRefund,
    AddLog {
        log: Log,
    },
    Prepare {
        rules: u8,
        sender: Address,
        coinbase: Address,
        destination: Option<Address>,
        precompiles: Vec<Address>,
        access_list: Vec<AccessTuple>,
    },
    Commit {
        delete_empty_objects: bool,
        block: u64,
    },
}

impl Operation {
    pub fn code(&self) -> OpCode {
        match self {
            Operation::BeginBlock { .. } => OpCode::BeginBlock,
            Operation::EndBlock => OpCode::EndBlock,
            Operation::BeginTransaction { .. } => OpCode::BeginTransaction,
            Operation::EndTransaction => OpCode::EndTransaction,
            Operation::CreateAccount { .. } => OpCode::CreateAccount,
            Operation::Exist { .. } => OpCode::Exist,
            Operation::GetBalance { .. } => OpCode::GetBalance,
            Operation::AddBalance { .. } => OpCode::AddBalance,
            Operation::SubBalance { .. } => OpCode::SubBalance,
            Operation::GetNonce { .. } => OpCode::GetNonce,
            Operation::SetNonce { .. } => OpCode::SetNonce,
            Operation::GetCode { .. } => OpCode::GetCode,
            Operation::SetCode { .. } => OpCode::SetCode,
            Operation::GetCodeHash { .. } => OpCode::GetCodeHash,
            Operation::GetCodeSize { .. } => OpCode::GetCodeSize,
            Operation::GetStorage { .. } => OpCode::GetStorage,
            Operation::SetStorage { .. } => OpCode::SetStorage,
            Operation::SelfDestruct { .. } => OpCode::SelfDestruct,
            Operation::Snapshot { .. } => OpCode::Snapshot,
            Operation::RevertToSnapshot { .. } => OpCode::RevertToSnapshot,
            Operation::AddRefund { .. } => OpCode::AddRefund,
            Operation::SubRefund { .. } => OpCode::SubRefund,
            Operation::GetRefund => OpCode::GetRefund,
            Operation::AddLog { .. } => OpCode::AddLog,
            Operation::Prepare { .. } => OpCode::Prepare,
            Operation::Commit { .. } => OpCode::Commit,
        }
    }

    /// The operand-slot values of this operation, in `(address, key, value)`
    /// order. Payload fields are not operands.
    pub(crate) fn operands(&self) -> (Option<Address>, Option<B256>, Option<B256>) {
        match self {
            Operation::CreateAccount { address }
            | Operation::Exist { address }
            | Operation::GetBalance { address }
            | Operation::AddBalance { address, .. }
            | Operation::SubBalance { address, .. }
            | Operation::GetNonce { address }
            | Operation::SetNonce { address, .. }
            | Operation::GetCode { address }
            | Operation::SetCode { address, .. }
            | Operation::GetCodeHash { address }
            | Operation::GetCodeSize { address }
            | Operation::SelfDestruct { address } => (Some(*address), None, None),
            Operation::GetStorage { address, key } => (Some(*address), Some(*key), None),
            Operation::SetStorage {
                address,
                key,
                value,
            } => (Some(*address), Some(*key), Some(*value)),
            _ => (None, None, None),
        }
    }
}
