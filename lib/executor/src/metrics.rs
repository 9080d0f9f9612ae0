use std::time::Duration;
use vise::{Buckets, Counter, Gauge, Histogram, Metrics, Unit};

const LATENCIES_FAST: Buckets = Buckets::exponential(0.0000001..=1.0, 2.0);

#[derive(Debug, Metrics)]
#[metrics(prefix = "retrace_executor")]
pub(crate) struct ExecutorMetrics {
    /// Transactions handed to the processor.
    pub processed_transactions: Counter,
    /// Blocks whose post-block hook completed.
    pub processed_blocks: Counter,
    /// Highest block a worker finished.
    pub last_block: Gauge<u64>,
    /// Wall time of a single processor call.
    #[metrics(unit = Unit::Seconds, buckets = LATENCIES_FAST)]
    pub transaction_latency: Histogram<Duration>,
}

#[vise::register]
pub(crate) static EXECUTOR_METRICS: vise::Global<ExecutorMetrics> = vise::Global::new();
