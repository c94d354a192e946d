//! # imap-backup
//!
//! Dump an entire IMAP account into a single ZIP archive laid out as a Maildir
//! tree: one directory per folder, one file per message under `<folder>/cur/`.
//!
//! ## Pipeline
//!
//! A backup runs three stages concurrently:
//! - an **enumerator** lists every folder over its own session and feeds a bounded
//!   folder queue
//! - a fixed pool of **download workers** each pull folders, select them read-only
//!   and stream their bodies onto a bounded message queue
//! - a single **archive writer** drains the message queue into the archive
//!
//! Full queues hold producers back, so memory stays bounded however large the
//! account is. Per-folder problems are logged and skipped; failing to connect or log
//! in aborts the run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use imap_backup::{Backup, Config, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         server: ServerConfig {
//!             address: "imaps://mail.example.com".to_string(),
//!             username: "me@example.com".to_string(),
//!             password: "secret".to_string(),
//!             ..Default::default()
//!         },
//!         output: "backup.zip".into(),
//!         ..Default::default()
//!     };
//!
//!     let backup = Backup::new(config)?;
//!
//!     let mut events = backup.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = backup.run().await?;
//!     println!("{} messages in {}", summary.messages, summary.output.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive sinks and Maildir entry naming
pub mod archive;
/// Backup pipeline (enumerator, download workers, archive writer)
pub mod backup;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// IMAP client and session abstraction
pub mod imap;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use archive::{ArchiveSink, MaildirNamer, ZipSink};
pub use backup::Backup;
pub use config::{Config, QueueConfig, RetryConfig, Security, ServerConfig, StartTls};
pub use error::{Error, FetchError, Result};
pub use imap::{ImapClient, MailClient, MailSession};
pub use types::{BackupSummary, Event, Folder, SkipReason};

/// Run a backup, cancelling it on SIGTERM/SIGINT (Ctrl+C elsewhere).
///
/// After a signal the run is cancelled and awaited, so every session is dropped
/// before this returns [`Error::Cancelled`]. The partial archive is not finalized.
///
/// # Example
///
/// ```no_run
/// use imap_backup::{Backup, Config, run_until_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_toml_file(std::path::Path::new("backup.toml"))?;
///     let backup = Backup::new(config)?;
///
///     let summary = run_until_signal(&backup).await?;
///     println!("{} messages", summary.messages);
///     Ok(())
/// }
/// ```
pub async fn run_until_signal(backup: &Backup) -> Result<BackupSummary> {
    let run = backup.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = wait_for_signal() => {
            tracing::warn!("Interrupted, cancelling backup");
            backup.cancel();
            run.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Could not register every signal handler");
            only.recv().await;
            tracing::info!("Received termination signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
