mod log;
pub use log::{ExecutionResult, ExecutionStatus, Log};

mod substate;
pub use substate::{Substate, SubstateAccount, SubstateEnv, SubstateMessage, WorldState};

mod access_list;
pub use access_list::AccessTuple;

mod generated;
pub use generated::GeneratedTx;

/// Upper-bound sentinel meaning "until the source is exhausted".
///
/// Not every record source can serve an open-ended range; those that cannot
/// reject it up front.
pub const LAST_BLOCK: u64 = u64::MAX;
