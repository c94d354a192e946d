//! Download worker pool: N long-lived tasks draining the folder queue.
//!
//! Each worker owns at most one session, opened the first time it needs to select a
//! folder. Per-folder failures (select, fetch) are logged and the worker moves on;
//! only session establishment and cancellation end a worker with an error. A session
//! that lost its connection is dropped, never reused.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinSet;

use crate::error::{Error, FetchError, Result};
use crate::imap::MailSession;
use crate::types::{Event, Folder, MailboxMeta, MessageRecord, SequenceRange, SkipReason};

use super::context::PipelineContext;
use super::policy;
use super::queue::{FolderReceiver, MessageSender};

/// Counters reported by a finished worker (or summed over the pool)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct WorkerStats {
    /// Sessions this worker opened
    pub(crate) sessions: usize,
    /// Folders dequeued, skipped ones included
    pub(crate) folders: usize,
    /// Message records pushed to the writer
    pub(crate) messages: u64,
    /// Folders whose fetch ended early
    pub(crate) failed_folders: usize,
}

impl WorkerStats {
    fn add(&mut self, other: WorkerStats) {
        self.sessions += other.sessions;
        self.folders += other.folders;
        self.messages += other.messages;
        self.failed_folders += other.failed_folders;
    }
}

/// Result of fetching one folder
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct FetchOutcome {
    /// Records pushed to the message queue
    pub(crate) delivered: u64,
    /// Why the fetch stopped early, if it did
    pub(crate) failure: Option<FetchError>,
}

/// Fixed-size pool of download workers
pub(crate) struct WorkerPool {
    ctx: Arc<PipelineContext>,
    size: usize,
}

impl WorkerPool {
    pub(crate) fn new(ctx: Arc<PipelineContext>, size: usize) -> Self {
        Self { ctx, size }
    }

    /// Run every worker to completion.
    ///
    /// `messages` is the pool's own handle on the message queue; it is dropped only
    /// after the last worker has finished, which is what closes the queue for the
    /// writer.
    pub(crate) async fn run(
        self,
        folders: FolderReceiver,
        messages: MessageSender,
    ) -> Result<WorkerStats> {
        let mut workers = JoinSet::new();
        for id in 0..self.size {
            let worker = Worker {
                id,
                ctx: Arc::clone(&self.ctx),
                folders: folders.clone(),
                messages: messages.clone(),
                session: None,
                stats: WorkerStats::default(),
            };
            workers.spawn(worker.run());
        }
        drop(folders);

        let mut totals = WorkerStats::default();
        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined
                .unwrap_or_else(|e| Err(Error::Other(format!("download worker panicked: {}", e))));
            match result {
                Ok(stats) => totals.add(stats),
                Err(e) => {
                    self.ctx.fail("download", &e);
                    // Keep the root cause over the cancellations it triggered
                    if first_error.as_ref().is_none_or(|prev: &Error| !prev.is_root_cause()) {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        tracing::debug!(
            sessions = totals.sessions,
            folders = totals.folders,
            messages = totals.messages,
            "download done, closing message queue"
        );
        self.ctx.emit(Event::DownloadComplete);
        drop(messages);
        Ok(totals)
    }
}

struct Worker {
    id: usize,
    ctx: Arc<PipelineContext>,
    folders: FolderReceiver,
    messages: MessageSender,
    session: Option<Box<dyn MailSession>>,
    stats: WorkerStats,
}

impl Worker {
    async fn run(mut self) -> Result<WorkerStats> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => return Err(Error::Cancelled),
                next = self.folders.recv() => next,
            };
            let Some(folder) = next else { break };
            self.stats.folders += 1;
            self.download_folder(folder).await?;
        }

        if let Some(mut session) = self.session.take()
            && let Err(e) = session.logout(self.ctx.config.server.logout_timeout).await
        {
            tracing::warn!(worker = self.id, error = %e, "worker logout failed");
        }
        tracing::trace!(worker = self.id, "worker finished");
        Ok(self.stats)
    }

    /// Download one folder. Only fatal errors are returned.
    async fn download_folder(&mut self, folder: Folder) -> Result<()> {
        let name = policy::display_name(&folder).to_string();

        if let Some(reason) = policy::skip_reason(&folder) {
            tracing::debug!(worker = self.id, folder = %folder.name, ?reason, "skipping folder");
            self.skipped(&folder, reason);
            return Ok(());
        }

        let Some((mut session, meta)) = self.select(&folder).await? else {
            return Ok(());
        };

        tracing::info!(worker = self.id, folder = %name, "{} - {} messages", name, meta.exists);
        let Some(range) = SequenceRange::all(meta.exists) else {
            self.session = Some(session);
            self.skipped(&folder, SkipReason::Empty);
            return Ok(());
        };

        self.ctx.emit(Event::FolderStarted {
            folder: name.clone(),
            messages: meta.exists,
        });

        let outcome = fetch_folder(
            &self.ctx,
            session.as_mut(),
            &name,
            range,
            &self.messages,
        )
        .await?;
        self.stats.messages += outcome.delivered;

        match outcome.failure {
            None => {
                tracing::debug!(worker = self.id, folder = %name, messages = outcome.delivered, "folder complete");
                self.session = Some(session);
                self.ctx.emit(Event::FolderCompleted {
                    folder: name,
                    messages: outcome.delivered,
                });
            }
            Some(failure) => {
                self.stats.failed_folders += 1;
                match &failure {
                    FetchError::Aborted => {
                        tracing::error!(
                            worker = self.id,
                            folder = %name,
                            delivered = outcome.delivered,
                            expected = range.len(),
                            "Fetch command aborted"
                        );
                        // The connection is gone; the next folder reconnects
                    }
                    FetchError::Server(info) => {
                        tracing::error!(
                            worker = self.id,
                            folder = %name,
                            delivered = outcome.delivered,
                            expected = range.len(),
                            "Fetch error: {}",
                            info
                        );
                        self.session = Some(session);
                    }
                }
                self.ctx.emit(Event::FolderFailed {
                    folder: name,
                    delivered: outcome.delivered,
                    error: failure.to_string(),
                });
            }
        }
        Ok(())
    }

    /// This worker's session, connecting first if it has none
    async fn take_session(&mut self) -> Result<Box<dyn MailSession>> {
        match self.session.take() {
            Some(session) => Ok(session),
            None => {
                let session = self.ctx.open_session().await?;
                self.stats.sessions += 1;
                Ok(session)
            }
        }
    }

    /// EXAMINE `folder`. A session found dead is dropped and the select retried once
    /// on a fresh one. `Ok(None)` means the folder was skipped.
    async fn select(
        &mut self,
        folder: &Folder,
    ) -> Result<Option<(Box<dyn MailSession>, MailboxMeta)>> {
        let mut reconnected = false;
        loop {
            let mut session = self.take_session().await?;
            let error = match self
                .ctx
                .guard(session.select_folder(&folder.name, true))
                .await
            {
                Ok(meta) => return Ok(Some((session, meta))),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => e,
            };

            let disconnected = matches!(error, Error::Disconnected(_));
            if disconnected && !reconnected {
                tracing::warn!(
                    worker = self.id,
                    folder = %folder.name,
                    error = %error,
                    "session lost while selecting, reconnecting"
                );
                reconnected = true;
                continue;
            }

            tracing::error!(
                worker = self.id,
                folder = %folder.name,
                error = %error,
                "Error selecting mailbox '{}'",
                folder.name
            );
            if !disconnected {
                self.session = Some(session);
            }
            self.skipped(folder, SkipReason::SelectFailed);
            return Ok(None);
        }
    }

    fn skipped(&self, folder: &Folder, reason: SkipReason) {
        self.ctx.emit(Event::FolderSkipped {
            folder: folder.name.clone(),
            reason,
        });
    }
}

/// Stream every body of the selected folder onto the message queue.
///
/// Each body is forwarded as soon as it arrives; sending awaits while the queue is
/// full. A fetch failure ends the folder but is not an error: records already sent
/// stay valid. Only cancellation (or the writer going away) is returned as `Err`.
pub(crate) async fn fetch_folder(
    ctx: &PipelineContext,
    session: &mut dyn MailSession,
    folder: &str,
    range: SequenceRange,
    messages: &MessageSender,
) -> Result<FetchOutcome> {
    let mut delivered = 0;

    let fetched = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
        fetched = session.fetch_bodies(range) => fetched,
    };
    let mut bodies = match fetched {
        Ok(bodies) => bodies,
        Err(failure) => {
            return Ok(FetchOutcome {
                delivered,
                failure: Some(failure),
            });
        }
    };

    loop {
        let item = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            item = bodies.next() => item,
        };

        match item {
            None => break,
            Some(Ok(fetched)) => {
                tracing::trace!(folder, seq = fetched.seq, bytes = fetched.body.len(), "message fetched");
                let record = MessageRecord {
                    folder: folder.to_string(),
                    body: fetched.body,
                };
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                    sent = messages.send(record) => sent.map_err(|_| Error::Cancelled)?,
                }
                delivered += 1;
            }
            Some(Err(failure)) => {
                return Ok(FetchOutcome {
                    delivered,
                    failure: Some(failure),
                });
            }
        }
    }

    Ok(FetchOutcome {
        delivered,
        failure: None,
    })
}
