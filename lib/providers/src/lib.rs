mod db;
pub use db::{NamedColumnFamily, TypedDb};

mod rpc;
pub use rpc::{
    RpcCall, RpcErrorResponse, RpcRecord, RpcRecordingProvider, RpcRecordingWriter, RpcResponse,
};

mod substate;
pub use substate::{SubstateDb, SubstateProvider};

mod synthetic;
pub use synthetic::SyntheticTxProvider;

pub mod trace;
