//! Enumerator stage: list every folder once and feed the folder queue.

use crate::error::{Error, Result};
use crate::types::Event;

use super::context::PipelineContext;
use super::queue::FolderSender;

/// LIST reference and pattern covering the whole account
const LIST_REFERENCE: &str = "";
const LIST_PATTERN: &str = "*";

/// List all folders and push them onto the folder queue.
///
/// Sending awaits while the queue is full, so listing never runs far ahead of the
/// workers. The caller closes the queue by dropping `folders` once this returns.
/// Connect, login and LIST failures are fatal.
///
/// Returns the number of folders listed.
pub(crate) async fn run_enumerator(ctx: &PipelineContext, folders: &FolderSender) -> Result<usize> {
    tracing::info!(
        server = %ctx.config.server.address,
        user = %ctx.config.server.username,
        "connecting to {} as user {}",
        ctx.config.server.address,
        ctx.config.server.username
    );

    let mut session = ctx.open_session().await?;
    let listed = ctx
        .guard(session.list_folders(LIST_REFERENCE, LIST_PATTERN))
        .await?;

    let count = listed.len();
    if count == 0 {
        tracing::warn!("server listed no folders");
    } else {
        tracing::debug!(folders = count, "folder listing complete");
    }

    for folder in listed {
        let name = folder.name.clone();
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            sent = folders.send(folder) => sent.map_err(|_| Error::Cancelled)?,
        }
        tracing::trace!(folder = %name, "folder queued");
        ctx.emit(Event::FolderQueued { folder: name });
    }

    if let Err(e) = session.logout(ctx.config.server.logout_timeout).await {
        tracing::warn!(error = %e, "enumerator logout failed");
    }

    Ok(count)
}
