//! Archive output: the container sink and Maildir-style entry naming.

mod naming;
mod zip;

pub use self::naming::MaildirNamer;
pub use self::zip::ZipSink;

use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Append-only container of named entries.
///
/// Exactly one writer owns a sink. Each entry is opened with [`ArchiveSink::new_entry`]
/// and written through the returned handle until the next entry is opened.
pub trait ArchiveSink: Send {
    /// Start a new entry at `path` (forward-slash separated, relative)
    fn new_entry(&mut self, path: &str) -> Result<&mut dyn Write>;

    /// Finalize the container. Called exactly once, after the last entry.
    fn finish(self: Box<Self>) -> Result<()>;

    /// Where the container lives, for log messages
    fn location(&self) -> &Path;
}
