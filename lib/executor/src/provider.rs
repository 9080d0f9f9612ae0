/// One record emitted by a provider: a payload positioned at
/// `(block, tx_index)`. Created by the provider, consumed exactly once by a
/// worker. Indices are passed through as reported; the scheduler never
/// renumbers them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInfo<T> {
    pub block: u64,
    pub tx_index: u32,
    pub data: T,
}

/// Callback a provider feeds records into. A returned error tells the
/// provider to stop promptly and propagate that error unchanged.
pub type Consumer<'a, T> = &'a mut dyn FnMut(TransactionInfo<T>) -> anyhow::Result<()>;

/// Lazy, single-pass source of transaction records over a block range.
///
/// `run` streams records with `block ≥ from` in block/tx order, bounded above
/// by `to` (exclusive for the store-backed sources; the trace stream's bound
/// is inclusive, matching its recorder). Implementations are not required to
/// be reentrant or thread-safe; restarting means constructing a new provider.
/// Backing resources are released on drop.
pub trait Provider: Send {
    type Payload: Send + Sync + 'static;

    fn run(
        &mut self,
        from: u64,
        to: u64,
        consume: Consumer<'_, Self::Payload>,
    ) -> anyhow::Result<()>;
}

impl<T: Send + Sync + 'static> Provider for Box<dyn Provider<Payload = T>> {
    type Payload = T;

    fn run(&mut self, from: u64, to: u64, consume: Consumer<'_, T>) -> anyhow::Result<()> {
        (**self).run(from, to, consume)
    }
}
