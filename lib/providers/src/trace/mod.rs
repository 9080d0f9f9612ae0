//! Compressed operation-trace format: packed headers, operand-reuse queues,
//! the reader/writer pair and the provider over them.

mod op;
pub use op::{OpCode, Operation, OperandClass, TraceError};

mod provider;
pub use provider::TraceFileProvider;

mod queue;

mod reader;
pub use reader::TraceReader;

mod writer;
pub use writer::TraceWriter;
