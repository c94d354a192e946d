//! Core types and events

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One remote mail folder as reported by LIST
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Server-side name, used verbatim for SELECT/EXAMINE
    pub name: String,
    /// Hierarchy delimiter, if the server reported one
    pub delimiter: Option<String>,
    /// Server flagged the folder `\Noselect` (a pure hierarchy node)
    pub no_select: bool,
}

impl Folder {
    /// A selectable folder with the usual `/` delimiter
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delimiter: Some("/".to_string()),
            no_select: false,
        }
    }
}

/// State reported by the server when a folder is selected
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MailboxMeta {
    /// Number of messages in the folder (EXISTS)
    pub exists: u32,
}

/// Inclusive range of message sequence numbers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceRange {
    /// First sequence number (1-based)
    pub start: u32,
    /// Last sequence number, inclusive
    pub end: u32,
}

impl SequenceRange {
    /// Every message of a folder holding `count` messages, or `None` when empty
    pub fn all(count: u32) -> Option<Self> {
        (count > 0).then_some(Self {
            start: 1,
            end: count,
        })
    }

    /// Number of messages covered
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start) + 1
    }

    /// Never true for ranges built with [`SequenceRange::all`]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

impl std::fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// One message body as streamed by a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedBody {
    /// Message sequence number within the selected folder
    pub seq: u32,
    /// Raw RFC 5322 bytes
    pub body: Vec<u8>,
}

/// A fetched message on its way to the archive writer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    /// Display name of the folder (prefix already stripped)
    pub folder: String,
    /// Raw message bytes
    pub body: Vec<u8>,
}

/// Why a folder produced no messages
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Name is on the fixed exclusion list
    Excluded,
    /// Server marked the folder `\Noselect`
    NotSelectable,
    /// SELECT/EXAMINE failed
    SelectFailed,
    /// Folder holds no messages
    Empty,
}

/// Event emitted during a backup run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Folder listed and placed on the folder queue
    FolderQueued {
        /// Server-side folder name
        folder: String,
    },

    /// Folder picked up by a worker but not fetched
    FolderSkipped {
        /// Server-side folder name
        folder: String,
        /// Why it was skipped
        reason: SkipReason,
    },

    /// Worker started fetching a folder
    FolderStarted {
        /// Display name
        folder: String,
        /// Messages the server reported
        messages: u32,
    },

    /// All messages of a folder were fetched
    FolderCompleted {
        /// Display name
        folder: String,
        /// Messages pushed to the writer
        messages: u64,
    },

    /// Fetch ended early; messages already pushed are still archived
    FolderFailed {
        /// Display name
        folder: String,
        /// Messages pushed before the failure
        delivered: u64,
        /// Error message
        error: String,
    },

    /// Enumeration finished; the folder queue is closed
    EnumerationComplete {
        /// Folders listed by the server
        folders: usize,
    },

    /// Every worker finished; the message queue is closed
    DownloadComplete,

    /// Archive finalized
    Complete {
        /// Messages written
        messages: u64,
        /// Archive path
        path: PathBuf,
    },
}

/// Outcome of a successful run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    /// Folders listed by the server
    pub folders: usize,
    /// Messages written to the archive
    pub messages: u64,
    /// Archive path
    pub output: PathBuf,
}
