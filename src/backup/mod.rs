//! Backup pipeline: enumerator → folder queue → worker pool → message queue → writer.
//!
//! Split into focused submodules:
//! - [`context`] - Shared state, session setup with retry, cancellation guard
//! - [`queue`] - Bounded folder and message queues
//! - [`enumerator`] - Folder listing stage
//! - [`policy`] - Folder exclusion and display names
//! - [`worker`] - Download worker pool and per-folder fetch
//! - [`writer`] - Archive writer stage
//!
//! Completion only flows forward. The enumerator drops the folder sender when it is
//! done; the pool drops its message sender after the last worker exits; the writer
//! finalizes the archive once the message queue is drained. A fatal error in any
//! stage cancels the shared token and the run returns that error.

mod context;
mod enumerator;
mod policy;
mod queue;
mod worker;
mod writer;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveSink, MaildirNamer, ZipSink};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::imap::{ImapClient, MailClient};
use crate::types::{BackupSummary, Event};

use context::PipelineContext;
use worker::WorkerPool;
use writer::ArchiveWriter;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// A configured, ready-to-run account backup
///
/// Cheap to share by reference: [`Backup::run`] takes `&self`, so one task can run
/// the backup while another holds on to it for [`Backup::cancel`].
pub struct Backup {
    config: Arc<Config>,
    client: Arc<dyn MailClient>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl Backup {
    /// Create a backup against the IMAP server named in `config`.
    ///
    /// Fails with [`Error::Config`] if the configuration is incomplete; nothing is
    /// sent over the network here.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = ImapClient::new(&config.server)?;
        Self::with_client(config, Arc::new(client))
    }

    /// Create a backup using a custom [`MailClient`]
    pub fn with_client(config: Config, client: Arc<dyn MailClient>) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            config: Arc::new(config),
            client,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Stop a running backup at its next suspension point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Configuration this backup runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the backup into a ZIP file at the configured output path
    pub async fn run(&self) -> Result<BackupSummary> {
        let sink = ZipSink::create(&self.config.output)?;
        self.run_with_sink(Box::new(sink)).await
    }

    /// Run the backup into a caller-provided archive sink
    pub async fn run_with_sink(&self, sink: Box<dyn ArchiveSink>) -> Result<BackupSummary> {
        let output = sink.location().to_path_buf();
        let ctx = Arc::new(PipelineContext {
            config: Arc::clone(&self.config),
            client: Arc::clone(&self.client),
            event_tx: self.event_tx.clone(),
            cancel: self.cancel.child_token(),
        });

        let (folder_tx, folder_rx) = queue::folder_queue(self.config.queues.folder_capacity);
        let (message_tx, message_rx) = queue::message_queue(self.config.queues.message_capacity);

        let enumerator: JoinHandle<Result<usize>> = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            async move {
                let result = enumerator::run_enumerator(&ctx, &folder_tx).await;
                match &result {
                    Ok(folders) => {
                        tracing::debug!(folders, "enumeration done, closing folder queue");
                        ctx.emit(Event::EnumerationComplete { folders: *folders });
                        drop(folder_tx);
                    }
                    Err(e) => ctx.fail("enumerate", e),
                }
                result
            }
        });

        let pool: JoinHandle<Result<worker::WorkerStats>> = tokio::spawn(
            WorkerPool::new(Arc::clone(&ctx), self.config.workers).run(folder_rx, message_tx),
        );

        let writer = ArchiveWriter::new(sink, MaildirNamer::new());
        let written = writer.run(&ctx, message_rx).await;
        if let Err(e) = &written {
            ctx.fail("write", e);
        }

        let enumerated = join_stage("enumerator", enumerator).await;
        let downloaded = join_stage("download pool", pool).await;

        let (folders, stats, messages) = first_root_cause(enumerated, downloaded, written)?;
        if stats.failed_folders > 0 {
            tracing::warn!(
                failed_folders = stats.failed_folders,
                "some folders were only partially retrieved"
            );
        }

        Ok(BackupSummary {
            folders,
            messages,
            output,
        })
    }
}

async fn join_stage<T>(stage: &str, handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .await
        .unwrap_or_else(|e| Err(Error::Other(format!("{} task panicked: {}", stage, e))))
}

/// Combine the stage results, preferring the error that caused the others.
fn first_root_cause(
    enumerated: Result<usize>,
    downloaded: Result<worker::WorkerStats>,
    written: Result<u64>,
) -> Result<(usize, worker::WorkerStats, u64)> {
    match (enumerated, downloaded, written) {
        (Ok(folders), Ok(stats), Ok(messages)) => Ok((folders, stats, messages)),
        (enumerated, downloaded, written) => {
            let errors = [enumerated.err(), downloaded.err(), written.err()];
            let mut errors = errors.into_iter().flatten();
            let first = errors.next().unwrap_or(Error::Cancelled);
            if first.is_root_cause() {
                return Err(first);
            }
            Err(errors.find(Error::is_root_cause).unwrap_or(first))
        }
    }
}
