//! Remote mail store abstraction.
//!
//! The pipeline only talks to [`MailClient`] and [`MailSession`]; the production
//! implementation over `async-imap` lives in [`client`], tests plug in scripted
//! sessions instead.

mod client;


pub use client::{ImapClient, ImapSession};

use std::time::Duration;

use futures::stream::BoxStream;

use crate::error::{FetchError, Result};
use crate::types::{FetchedBody, Folder, MailboxMeta, SequenceRange};

/// Lazily produced message bodies; an `Err` item ends the fetch.
pub type BodyStream<'a> = BoxStream<'a, std::result::Result<FetchedBody, FetchError>>;

/// Factory for authenticated sessions.
#[async_trait::async_trait]
pub trait MailClient: Send + Sync {
    /// Connect and authenticate.
    ///
    /// Connection failures are reported as [`crate::Error::Connect`], rejected
    /// credentials as [`crate::Error::Auth`].
    async fn open_session(&self) -> Result<Box<dyn MailSession>>;
}

/// One authenticated connection, owned by exactly one task.
#[async_trait::async_trait]
pub trait MailSession: Send {
    /// LIST `reference` `pattern`
    async fn list_folders(&mut self, reference: &str, pattern: &str) -> Result<Vec<Folder>>;

    /// SELECT (or EXAMINE when `read_only`) a folder by its server-side name
    async fn select_folder(&mut self, name: &str, read_only: bool) -> Result<MailboxMeta>;

    /// FETCH the full body of every message in `range` of the selected folder.
    ///
    /// Bodies are yielded as the server sends them; nothing is buffered beyond the
    /// current response.
    async fn fetch_bodies<'a>(
        &'a mut self,
        range: SequenceRange,
    ) -> std::result::Result<BodyStream<'a>, FetchError>;

    /// LOGOUT, giving up after `timeout`
    async fn logout(&mut self, timeout: Duration) -> Result<()>;
}
