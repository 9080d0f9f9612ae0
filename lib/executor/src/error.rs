use std::fmt;

/// Marker for components stopped by the shared abort signal rather than by a
/// failure of their own. Dropped when the run error is assembled.
#[derive(Debug, thiserror::Error)]
#[error("execution aborted")]
pub struct Aborted;

pub(crate) fn is_abort(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<Aborted>().is_some())
}

/// A numeric scheduling-mode id that does not name a known granularity.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("incorrect parallelism type: {0}")]
pub struct InvalidGranularity(pub u8);

/// Every component failure of a run, one per line. Components keep their
/// original messages so callers can match on them.
#[derive(Debug)]
pub struct AggregateError(Vec<anyhow::Error>);

impl AggregateError {
    pub fn components(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.0.iter()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{err:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Joins component errors into one: `None` for an empty set, the error itself
/// for a single entry, an [`AggregateError`] otherwise.
pub fn join_errors(mut errors: Vec<anyhow::Error>) -> Option<anyhow::Error> {
    match errors.len() {
        0 => None,
        1 => Some(errors.remove(0)),
        _ => Some(anyhow::Error::new(AggregateError(errors))),
    }
}
