//! Stock extensions shipped with the scheduler.

mod progress;
pub use progress::ProgressLogger;

mod state_lifecycle;
pub use state_lifecycle::StateLifecycle;
