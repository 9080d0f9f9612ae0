//! End-to-end scheduling behavior of [`Executor::run`] over an in-memory
//! record source.

use async_trait::async_trait;
use futures::FutureExt;
use retrace_executor::{
    Consumer, Context, Executor, Extension, Granularity, Params, Processor, Provider, State,
    TransactionInfo, prime,
};
use retrace_types::ExecutionResult;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type EventLog = Arc<Mutex<Vec<String>>>;

fn record(log: &EventLog, event: impl Into<String>) {
    log.lock().unwrap().push(event.into());
}

fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn index_of(events: &[String], event: &str) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("event {event:?} not found in {events:?}"))
}

/// Emits a fixed record list, ignoring the requested range, then optionally
/// fails like a broken backing store would.
struct VecProvider {
    records: Vec<TransactionInfo<u64>>,
    error: Option<&'static str>,
}

impl VecProvider {
    fn new(records: &[(u64, u32)]) -> Self {
        Self {
            records: records
                .iter()
                .map(|&(block, tx_index)| TransactionInfo {
                    block,
                    tx_index,
                    data: block * 1000 + u64::from(tx_index),
                })
                .collect(),
            error: None,
        }
    }

    fn failing(records: &[(u64, u32)], error: &'static str) -> Self {
        Self {
            error: Some(error),
            ..Self::new(records)
        }
    }
}

impl Provider for VecProvider {
    type Payload = u64;

    fn run(&mut self, _from: u64, _to: u64, consume: Consumer<'_, u64>) -> anyhow::Result<()> {
        for info in self.records.drain(..) {
            consume(info)?;
        }
        if let Some(message) = self.error {
            anyhow::bail!("{message}");
        }
        Ok(())
    }
}

struct Recorder {
    name: &'static str,
    log: EventLog,
}

impl Recorder {
    fn new(name: &'static str, log: &EventLog) -> Box<Self> {
        Box::new(Self {
            name,
            log: log.clone(),
        })
    }
}

#[async_trait]
impl Extension<u64> for Recorder {
    async fn pre_run(&self, state: &State<u64>, _ctx: &mut Context) -> anyhow::Result<()> {
        record(&self.log, format!("{}:pre_run(b={})", self.name, state.block));
        Ok(())
    }

    async fn post_run(
        &self,
        state: &State<u64>,
        _ctx: &mut Context,
        error: Option<&anyhow::Error>,
    ) -> anyhow::Result<()> {
        record(
            &self.log,
            format!(
                "{}:post_run(err={}, b={})",
                self.name,
                error.is_some(),
                state.block
            ),
        );
        Ok(())
    }

    async fn pre_block(&self, state: &State<u64>, _ctx: &mut Context) -> anyhow::Result<()> {
        record(
            &self.log,
            format!("{}:pre_block(b={})", self.name, state.block),
        );
        Ok(())
    }

    async fn post_block(&self, state: &State<u64>, _ctx: &mut Context) -> anyhow::Result<()> {
        record(
            &self.log,
            format!("{}:post_block(b={})", self.name, state.block),
        );
        Ok(())
    }

    async fn pre_transaction(&self, state: &State<u64>, _ctx: &mut Context) -> anyhow::Result<()> {
        record(
            &self.log,
            format!("{}:pre_tx({},{})", self.name, state.block, state.tx_index),
        );
        Ok(())
    }

    async fn post_transaction(&self, state: &State<u64>, _ctx: &mut Context) -> anyhow::Result<()> {
        record(
            &self.log,
            format!("{}:post_tx({},{})", self.name, state.block, state.tx_index),
        );
        Ok(())
    }
}

struct CountingProcessor {
    log: EventLog,
    processed: Arc<AtomicUsize>,
    fail_at: Option<usize>,
    panic_at: Option<usize>,
}

impl CountingProcessor {
    fn new(log: &EventLog) -> (Arc<Self>, Arc<AtomicUsize>) {
        let processed = Arc::new(AtomicUsize::new(0));
        let processor = Arc::new(Self {
            log: log.clone(),
            processed: processed.clone(),
            fail_at: None,
            panic_at: None,
        });
        (processor, processed)
    }

    fn failing_at(log: &EventLog, fail_at: usize) -> (Arc<Self>, Arc<AtomicUsize>) {
        let (mut processor, _) = Self::new(log);
        Arc::get_mut(&mut processor).unwrap().fail_at = Some(fail_at);
        let processed = processor.processed.clone();
        (processor, processed)
    }

    fn panicking_at(log: &EventLog, panic_at: usize) -> (Arc<Self>, Arc<AtomicUsize>) {
        let (mut processor, _) = Self::new(log);
        Arc::get_mut(&mut processor).unwrap().panic_at = Some(panic_at);
        let processed = processor.processed.clone();
        (processor, processed)
    }
}

#[async_trait]
impl Processor<u64> for CountingProcessor {
    async fn process(&self, state: &State<u64>, ctx: &mut Context) -> anyhow::Result<()> {
        // A unit of work takes nonzero time, like a real processor's would;
        // the cancellation assertions below depend on that.
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let unit = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        record(
            &self.log,
            format!("process({},{})", state.block, state.tx_index),
        );
        if self.panic_at == Some(unit) {
            panic!("processor blew up");
        }
        if self.fail_at == Some(unit) {
            anyhow::bail!("processor failed at unit {unit}");
        }
        ctx.execution_result = Some(ExecutionResult::default());
        Ok(())
    }
}

#[test_log::test(tokio::test)]
async fn empty_range_fires_only_run_hooks() -> anyhow::Result<()> {
    let log = EventLog::default();
    let (processor, _) = CountingProcessor::new(&log);
    Executor::new(VecProvider::new(&[]))
        .run(&Params::new(10, 10), processor, vec![Recorder::new("e", &log)])
        .await?;
    assert_eq!(
        events(&log),
        vec!["e:pre_run(b=10)", "e:post_run(err=false, b=10)"],
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn serial_run_preserves_emission_order() -> anyhow::Result<()> {
    let log = EventLog::default();
    let (processor, _) = CountingProcessor::new(&log);
    Executor::new(VecProvider::new(&[(10, 7), (10, 9)]))
        .run(&Params::new(0, 20), processor, vec![Recorder::new("e", &log)])
        .await?;
    assert_eq!(
        events(&log),
        vec![
            "e:pre_run(b=0)",
            "e:pre_block(b=10)",
            "e:pre_tx(10,7)",
            "process(10,7)",
            "e:post_tx(10,7)",
            "e:pre_tx(10,9)",
            "process(10,9)",
            "e:post_tx(10,9)",
            "e:post_block(b=10)",
            "e:post_run(err=false, b=20)",
        ],
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn serial_run_fires_block_hooks_on_every_transition() -> anyhow::Result<()> {
    let log = EventLog::default();
    let (processor, processed) = CountingProcessor::new(&log);
    let records = [(1, 0), (1, 1), (2, 0), (5, 3)];
    Executor::new(VecProvider::new(&records))
        .run(&Params::new(0, 10), processor, vec![Recorder::new("e", &log)])
        .await?;

    let events = events(&log);
    assert_eq!(processed.load(Ordering::SeqCst), records.len());
    // Processor order equals provider emission order.
    let processed_order: Vec<_> = events.iter().filter(|e| e.starts_with("process")).collect();
    assert_eq!(
        processed_order,
        vec!["process(1,0)", "process(1,1)", "process(2,0)", "process(5,3)"],
    );
    for block in [1, 2, 5] {
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == format!("e:pre_block(b={block})"))
                .count(),
            1
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == format!("e:post_block(b={block})"))
                .count(),
            1
        );
    }
    Ok(())
}

#[test_log::test(tokio::test)]
async fn hooks_interleave_forward_then_reverse() -> anyhow::Result<()> {
    let log = EventLog::default();
    let (processor, _) = CountingProcessor::new(&log);
    Executor::new(VecProvider::new(&[(3, 0)]))
        .run(
            &Params::new(0, 10),
            processor,
            vec![Recorder::new("a", &log), Recorder::new("b", &log)],
        )
        .await?;
    assert_eq!(
        events(&log),
        vec![
            "a:pre_run(b=0)",
            "b:pre_run(b=0)",
            "a:pre_block(b=3)",
            "b:pre_block(b=3)",
            "a:pre_tx(3,0)",
            "b:pre_tx(3,0)",
            "process(3,0)",
            "b:post_tx(3,0)",
            "a:post_tx(3,0)",
            "b:post_block(b=3)",
            "a:post_block(b=3)",
            "b:post_run(err=false, b=10)",
            "a:post_run(err=false, b=10)",
        ],
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn transaction_parallel_error_cancels_run() {
    let log = EventLog::default();
    let records: Vec<(u64, u32)> = (0..100u32).map(|i| (10 + u64::from(i / 10), i % 10)).collect();
    let (processor, processed) = CountingProcessor::failing_at(&log, 37);
    let params = Params::new(0, 100)
        .with_workers(4)
        .with_granularity(Granularity::Transaction);
    let err = Executor::new(VecProvider::new(&records))
        .run(&params, processor, vec![Recorder::new("e", &log)])
        .await
        .unwrap_err();

    assert!(
        format!("{err:#}").contains("processor failed at unit 37"),
        "{err:#}"
    );
    // In-flight workers may drain what they already picked up, nothing more.
    let total = processed.load(Ordering::SeqCst);
    assert!((37..=41).contains(&total), "processed {total} units");

    let events = events(&log);
    assert!(events.iter().all(|e| !e.contains("block")), "{events:?}");
    let teardowns: Vec<_> = events.iter().filter(|e| e.starts_with("e:post_run")).collect();
    assert_eq!(teardowns.len(), 1);
    assert!(teardowns[0].starts_with("e:post_run(err=true"), "{teardowns:?}");
}

#[test_log::test(tokio::test)]
async fn block_parallel_with_one_worker_is_deterministic() -> anyhow::Result<()> {
    let log = EventLog::default();
    let (processor, _) = CountingProcessor::new(&log);
    let params = Params::new(0, 20).with_granularity(Granularity::Block);
    Executor::new(VecProvider::new(&[(10, 0), (10, 1), (11, 0)]))
        .run(&params, processor, vec![Recorder::new("e", &log)])
        .await?;
    assert_eq!(
        events(&log),
        vec![
            "e:pre_run(b=0)",
            "e:pre_block(b=10)",
            "e:pre_tx(10,0)",
            "process(10,0)",
            "e:post_tx(10,0)",
            "e:pre_tx(10,1)",
            "process(10,1)",
            "e:post_tx(10,1)",
            "e:post_block(b=10)",
            "e:pre_block(b=11)",
            "e:pre_tx(11,0)",
            "process(11,0)",
            "e:post_tx(11,0)",
            "e:post_block(b=11)",
            "e:post_run(err=false, b=20)",
        ],
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn block_parallel_brackets_every_batch() -> anyhow::Result<()> {
    let log = EventLog::default();
    let (processor, processed) = CountingProcessor::new(&log);
    let records: Vec<(u64, u32)> = (10..15u64).flat_map(|b| [(b, 0), (b, 1)]).collect();
    let params = Params::new(0, 100)
        .with_workers(3)
        .with_granularity(Granularity::Block);
    Executor::new(VecProvider::new(&records))
        .run(&params, processor, vec![Recorder::new("e", &log)])
        .await?;

    assert_eq!(processed.load(Ordering::SeqCst), records.len());
    let events = events(&log);
    for block in 10..15u64 {
        let pre = index_of(&events, &format!("e:pre_block(b={block})"));
        let post = index_of(&events, &format!("e:post_block(b={block})"));
        let first_tx = index_of(&events, &format!("e:pre_tx({block},0)"));
        let second_tx = index_of(&events, &format!("e:pre_tx({block},1)"));
        assert!(pre < first_tx && first_tx < second_tx && second_tx < post);
    }
    Ok(())
}

#[test_log::test(tokio::test)]
async fn serial_processor_error_skips_remaining_hooks() {
    let log = EventLog::default();
    let (processor, _) = CountingProcessor::failing_at(&log, 1);
    let err = Executor::new(VecProvider::new(&[(10, 0), (10, 1)]))
        .run(
            &Params::new(0, 20),
            processor,
            vec![Recorder::new("e", &log)],
        )
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("processor failed at unit 1"));

    let events = events(&log);
    assert!(!events.iter().any(|e| e.starts_with("e:post_tx")), "{events:?}");
    assert!(!events.iter().any(|e| e.starts_with("e:post_block")), "{events:?}");
    // The failing position is what teardown observes.
    assert_eq!(events.last().unwrap(), "e:post_run(err=true, b=10)");
}

/// Records the phase, then reports the phase as failed.
struct FailingExtension {
    log: EventLog,
    fail_pre_run: bool,
}

#[async_trait]
impl Extension<u64> for FailingExtension {
    async fn pre_run(&self, state: &State<u64>, _ctx: &mut Context) -> anyhow::Result<()> {
        record(&self.log, format!("f:pre_run(b={})", state.block));
        if self.fail_pre_run {
            anyhow::bail!("setup refused");
        }
        Ok(())
    }

    async fn pre_transaction(&self, state: &State<u64>, _ctx: &mut Context) -> anyhow::Result<()> {
        record(
            &self.log,
            format!("f:pre_tx({},{})", state.block, state.tx_index),
        );
        if !self.fail_pre_run {
            anyhow::bail!("transaction vetoed");
        }
        Ok(())
    }

    async fn post_run(
        &self,
        state: &State<u64>,
        _ctx: &mut Context,
        error: Option<&anyhow::Error>,
    ) -> anyhow::Result<()> {
        record(
            &self.log,
            format!("f:post_run(err={}, b={})", error.is_some(), state.block),
        );
        Ok(())
    }
}

#[test_log::test(tokio::test)]
async fn phase_error_does_not_short_circuit_peers() {
    let log = EventLog::default();
    let (processor, processed) = CountingProcessor::new(&log);
    let failing = Box::new(FailingExtension {
        log: log.clone(),
        fail_pre_run: false,
    });
    let err = Executor::new(VecProvider::new(&[(10, 0)]))
        .run(
            &Params::new(0, 20),
            processor,
            vec![failing, Recorder::new("r", &log)],
        )
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("transaction vetoed"));

    let events = events(&log);
    // The peer after the failing extension still saw the phase.
    assert!(events.contains(&"f:pre_tx(10,0)".to_string()));
    assert!(events.contains(&"r:pre_tx(10,0)".to_string()));
    // The joined phase error stops the unit before the processor.
    assert_eq!(processed.load(Ordering::SeqCst), 0);
    // Teardown still runs in reverse order for everyone.
    let n = events.len();
    assert_eq!(events[n - 2], "r:post_run(err=true, b=10)");
    assert_eq!(events[n - 1], "f:post_run(err=true, b=10)");
}

#[test_log::test(tokio::test)]
async fn setup_error_returns_early_but_teardown_runs() {
    let log = EventLog::default();
    let (processor, processed) = CountingProcessor::new(&log);
    let failing = Box::new(FailingExtension {
        log: log.clone(),
        fail_pre_run: true,
    });
    let err = Executor::new(VecProvider::new(&[(10, 0)]))
        .run(
            &Params::new(5, 20),
            processor,
            vec![failing, Recorder::new("r", &log)],
        )
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("setup refused"));

    let events = events(&log);
    // The peer's setup hook still fired despite the failure.
    assert!(events.contains(&"r:pre_run(b=5)".to_string()));
    assert_eq!(processed.load(Ordering::SeqCst), 0);
    assert_eq!(
        events[events.len() - 2..],
        [
            "r:post_run(err=true, b=5)".to_string(),
            "f:post_run(err=true, b=5)".to_string(),
        ],
    );
}

#[test_log::test(tokio::test)]
async fn provider_error_surfaces_after_drain() {
    let log = EventLog::default();
    let (processor, processed) = CountingProcessor::new(&log);
    let provider = VecProvider::failing(&[(10, 0), (10, 1)], "backing store exploded");
    let err = Executor::new(provider)
        .run(
            &Params::new(0, 20),
            processor,
            vec![Recorder::new("e", &log)],
        )
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("backing store exploded"));
    // Records emitted before the failure were still executed.
    assert_eq!(processed.load(Ordering::SeqCst), 2);
    assert!(events(&log).last().unwrap().starts_with("e:post_run(err=true"));
}

struct PanickyTeardown;

#[async_trait]
impl Extension<u64> for PanickyTeardown {
    async fn post_run(
        &self,
        _state: &State<u64>,
        _ctx: &mut Context,
        _error: Option<&anyhow::Error>,
    ) -> anyhow::Result<()> {
        panic!("teardown hook exploded");
    }
}

#[test_log::test(tokio::test)]
async fn teardown_panic_is_reported_as_error() {
    let log = EventLog::default();
    let (processor, _) = CountingProcessor::new(&log);
    let err = Executor::new(VecProvider::new(&[(10, 0)]))
        .run(
            &Params::new(0, 20),
            processor,
            vec![Recorder::new("e", &log), Box::new(PanickyTeardown)],
        )
        .await
        .unwrap_err();
    assert!(
        format!("{err:#}").contains("extension panicked during run teardown: teardown hook exploded"),
        "{err:#}"
    );
    // The peer's teardown still ran after the panicking one.
    assert!(events(&log).last().unwrap().starts_with("e:post_run"));
}

#[test_log::test(tokio::test)]
async fn worker_panic_skips_teardown_and_resurfaces() {
    let log = EventLog::default();
    let (processor, _) = CountingProcessor::panicking_at(&log, 2);
    let params = Params::new(0, 20)
        .with_workers(2)
        .with_granularity(Granularity::Block);
    let run = Executor::new(VecProvider::new(&[(10, 0), (10, 1)])).run(
        &params,
        processor,
        vec![Recorder::new("e", &log)],
    );
    let payload = AssertUnwindSafe(run).catch_unwind().await.unwrap_err();
    assert_eq!(
        payload.downcast_ref::<&'static str>(),
        Some(&"processor blew up"),
    );

    let events = events(&log);
    assert!(!events.iter().any(|e| e.starts_with("e:post_block")), "{events:?}");
    assert!(!events.iter().any(|e| e.starts_with("e:post_run")), "{events:?}");
}

#[test_log::test(tokio::test)]
async fn processor_result_reaches_post_transaction() -> anyhow::Result<()> {
    struct ResultAsserter;

    #[async_trait]
    impl Extension<u64> for ResultAsserter {
        async fn post_transaction(
            &self,
            _state: &State<u64>,
            ctx: &mut Context,
        ) -> anyhow::Result<()> {
            anyhow::ensure!(ctx.execution_result.is_some(), "missing execution result");
            Ok(())
        }
    }

    let log = EventLog::default();
    let (processor, _) = CountingProcessor::new(&log);
    Executor::new(VecProvider::new(&[(10, 0)]))
        .run(&Params::new(0, 20), processor, vec![Box::new(ResultAsserter)])
        .await
}

#[test_log::test(tokio::test)]
async fn state_lifecycle_drives_db_scopes() -> anyhow::Result<()> {
    use retrace_executor::extensions::StateLifecycle;
    use retrace_state_api::InMemoryStateDb;

    /// Observes the scopes the lifecycle extension (registered before it)
    /// opened on the shared database.
    struct ScopeAsserter {
        db: Arc<InMemoryStateDb>,
    }

    #[async_trait]
    impl Extension<u64> for ScopeAsserter {
        async fn pre_transaction(
            &self,
            state: &State<u64>,
            _ctx: &mut Context,
        ) -> anyhow::Result<()> {
            anyhow::ensure!(self.db.current_block() == Some(state.block));
            anyhow::ensure!(self.db.current_transaction() == Some(state.tx_index));
            Ok(())
        }
    }

    let log = EventLog::default();
    let (processor, _) = CountingProcessor::new(&log);
    let db = Arc::new(InMemoryStateDb::new());
    let params = Params::new(0, 20).with_state(db.clone());
    Executor::new(VecProvider::new(&[(10, 0), (10, 1)]))
        .run(
            &params,
            processor,
            vec![
                Box::new(StateLifecycle),
                Box::new(ScopeAsserter { db: db.clone() }),
            ],
        )
        .await?;

    // Every scope was closed again on the way out.
    assert_eq!(db.current_block(), None);
    assert_eq!(db.current_transaction(), None);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn progress_logger_counts_without_interfering() -> anyhow::Result<()> {
    use retrace_executor::extensions::ProgressLogger;
    use std::time::Duration;

    let log = EventLog::default();
    let (processor, processed) = CountingProcessor::new(&log);
    Executor::new(VecProvider::new(&[(1, 0), (2, 0), (3, 0)]))
        .run(
            &Params::new(0, 10),
            processor,
            vec![
                Box::new(ProgressLogger::new(Duration::ZERO)),
                Recorder::new("e", &log),
            ],
        )
        .await?;
    assert_eq!(processed.load(Ordering::SeqCst), 3);
    assert!(events(&log).last().unwrap().starts_with("e:post_run(err=false"));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn prime_fires_setup_and_teardown_only() -> anyhow::Result<()> {
    let log = EventLog::default();
    prime::<u64>(42, None, vec![Recorder::new("e", &log)]).await?;
    assert_eq!(
        events(&log),
        vec!["e:pre_run(b=42)", "e:post_run(err=false, b=42)"],
    );
    Ok(())
}
