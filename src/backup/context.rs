//! Pipeline context: state shared by the enumerator, the workers and the writer.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::imap::{MailClient, MailSession};
use crate::retry::with_retry;
use crate::types::Event;

/// Shared context for one run, reducing parameter passing between stages.
pub(crate) struct PipelineContext {
    pub(crate) config: Arc<Config>,
    pub(crate) client: Arc<dyn MailClient>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) cancel: CancellationToken,
}

impl PipelineContext {
    /// Connect and authenticate, retrying transient connection failures.
    pub(super) async fn open_session(&self) -> Result<Box<dyn MailSession>> {
        let client = &self.client;
        self.guard(with_retry(&self.config.retry, || client.open_session()))
            .await
    }

    /// Run `fut` unless the run is cancelled first.
    pub(super) async fn guard<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = fut => result,
        }
    }

    /// Record a stage failure; a root-cause failure cancels every other stage.
    pub(super) fn fail(&self, stage: &str, err: &Error) {
        if err.is_root_cause() {
            tracing::error!(stage, error = %err, "Fatal error, aborting backup");
            self.cancel.cancel();
        } else {
            tracing::debug!(stage, "Stage stopped after cancellation");
        }
    }

    /// Broadcast an event; nobody listening is fine.
    pub(super) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
