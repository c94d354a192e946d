//! Maildir-style file names for archived messages.
//!
//! Names look like `<unix-seconds>.<counter>_1.<hostname>:2,S`: unique within a
//! run thanks to the counter, and recognisable by Maildir tools as seen messages
//! in `cur/`.

use chrono::Utc;
use gethostname::gethostname;

/// Fixed info suffix: version 2 flags, Seen
const STATUS_SUFFIX: &str = ":2,S";

/// Generates unique entry names for one run.
///
/// Owned by the archive writer, which is the only caller, so the counter needs no
/// synchronization.
#[derive(Debug)]
pub struct MaildirNamer {
    hostname: String,
    counter: u64,
}

impl MaildirNamer {
    /// Namer using the local host name
    pub fn new() -> Self {
        // The hostname is ASCII in practice; fall back rather than fail
        let hostname = gethostname()
            .into_string()
            .unwrap_or_else(|_| "localhost".to_string());
        Self::with_hostname(&hostname)
    }

    /// Namer with an explicit origin identifier
    pub fn with_hostname(hostname: &str) -> Self {
        Self {
            hostname: sanitize_hostname(hostname),
            counter: 0,
        }
    }

    /// Number of names handed out so far
    pub fn issued(&self) -> u64 {
        self.counter
    }

    /// Next file name, stamped with the current time
    pub fn next_name(&mut self) -> String {
        self.next_name_at(Utc::now().timestamp())
    }

    /// Next file name for an explicit unix timestamp
    pub fn next_name_at(&mut self, unix_seconds: i64) -> String {
        self.counter += 1;
        format!(
            "{}.{}_1.{}{}",
            unix_seconds, self.counter, self.hostname, STATUS_SUFFIX
        )
    }

    /// Archive path for a message of `folder`
    pub fn next_path(&mut self, folder: &str) -> String {
        format!("{}/cur/{}", folder, self.next_name())
    }
}

impl Default for MaildirNamer {
    fn default() -> Self {
        Self::new()
    }
}

/// `/` would split the path and `:` would start the info section
fn sanitize_hostname(hostname: &str) -> String {
    let cleaned = hostname.replace('/', "\\057").replace(':', "\\072");
    if cleaned.is_empty() {
        "localhost".to_string()
    } else {
        cleaned
    }
}
