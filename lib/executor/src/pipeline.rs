use crate::error::join_errors;
use crate::worker::panic_message;
use crate::{Context, Extension, State};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;

/// Ordered extension stack with the phase-delivery rules applied.
///
/// Forward phases visit the stack front-to-back, reverse phases back-to-front.
/// Within one phase an extension error never short-circuits its peers: every
/// extension is visited and the collected errors are joined afterwards.
/// Panics inside the forward and mid-run reverse phases propagate to the
/// caller; only `post_run` converts them, since it is itself the cleanup path.
pub(crate) struct ExtensionPipeline<T: Send + Sync + 'static> {
    extensions: Vec<Box<dyn Extension<T>>>,
}

impl<T: Send + Sync + 'static> ExtensionPipeline<T> {
    pub(crate) fn new(extensions: Vec<Box<dyn Extension<T>>>) -> Self {
        Self { extensions }
    }

    pub(crate) async fn pre_run(&self, state: &State<T>, ctx: &mut Context) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        for extension in &self.extensions {
            if let Err(err) = extension.pre_run(state, ctx).await {
                errors.push(err);
            }
        }
        join_errors(errors).map_or(Ok(()), Err)
    }

    pub(crate) async fn pre_block(&self, state: &State<T>, ctx: &mut Context) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        for extension in &self.extensions {
            if let Err(err) = extension.pre_block(state, ctx).await {
                errors.push(err);
            }
        }
        join_errors(errors).map_or(Ok(()), Err)
    }

    pub(crate) async fn pre_transaction(
        &self,
        state: &State<T>,
        ctx: &mut Context,
    ) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        for extension in &self.extensions {
            if let Err(err) = extension.pre_transaction(state, ctx).await {
                errors.push(err);
            }
        }
        join_errors(errors).map_or(Ok(()), Err)
    }

    pub(crate) async fn post_block(&self, state: &State<T>, ctx: &mut Context) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        for extension in self.extensions.iter().rev() {
            if let Err(err) = extension.post_block(state, ctx).await {
                errors.push(err);
            }
        }
        join_errors(errors).map_or(Ok(()), Err)
    }

    pub(crate) async fn post_transaction(
        &self,
        state: &State<T>,
        ctx: &mut Context,
    ) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        for extension in self.extensions.iter().rev() {
            if let Err(err) = extension.post_transaction(state, ctx).await {
                errors.push(err);
            }
        }
        join_errors(errors).map_or(Ok(()), Err)
    }

    /// Runs the teardown phase and folds its failures into `error`.
    ///
    /// A panicking teardown hook is caught and reported as an error: the run
    /// is already being dismantled and must not be taken down with it.
    pub(crate) async fn post_run(
        &self,
        state: &State<T>,
        ctx: &mut Context,
        error: Option<anyhow::Error>,
    ) -> Option<anyhow::Error> {
        let mut errors = Vec::new();
        for extension in self.extensions.iter().rev() {
            let hook = AssertUnwindSafe(extension.post_run(state, ctx, error.as_ref()));
            match hook.catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push(err),
                Err(payload) => errors.push(anyhow::anyhow!(
                    "extension panicked during run teardown: {}",
                    panic_message(payload.as_ref()),
                )),
            }
        }
        let mut joined: Vec<anyhow::Error> = error.into_iter().collect();
        joined.extend(errors);
        join_errors(joined)
    }
}
