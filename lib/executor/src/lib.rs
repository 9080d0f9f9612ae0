mod error;
pub use error::{Aborted, AggregateError, InvalidGranularity, join_errors};

mod params;
pub use params::{Granularity, Params};

mod state;
pub use state::{Context, State};

mod provider;
pub use provider::{Consumer, Provider, TransactionInfo};

mod processor;
pub use processor::Processor;

mod extension;
pub use extension::Extension;

pub mod extensions;

mod coordinator;
pub use coordinator::{Executor, prime};

mod forwarder;
mod metrics;
mod pipeline;
mod worker;
