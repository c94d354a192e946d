//! Static folder policy: which folders are backed up and under what name.

use crate::types::{Folder, SkipReason};

/// Parent some servers put every folder under
const INBOX: &str = "INBOX";

/// Delimiter assumed when LIST reported none
const DEFAULT_DELIMITER: &str = "/";

/// Display names that never hold mail worth keeping (exact, case-sensitive)
const EXCLUDED_FOLDERS: &[&str] = &["dovecot.sieve", "Spam", "Trash", "Junk"];

/// Name used inside the archive: the server name without the `INBOX` parent,
/// split on the delimiter the server reported for the folder.
pub(crate) fn display_name(folder: &Folder) -> &str {
    let delimiter = folder
        .delimiter
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DELIMITER);
    folder
        .name
        .strip_prefix(INBOX)
        .and_then(|rest| rest.strip_prefix(delimiter))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(&folder.name)
}

/// Decide whether a folder is downloaded, before any network activity for it.
pub(crate) fn skip_reason(folder: &Folder) -> Option<SkipReason> {
    if EXCLUDED_FOLDERS.contains(&display_name(folder)) {
        Some(SkipReason::Excluded)
    } else if folder.no_select {
        Some(SkipReason::NotSelectable)
    } else {
        None
    }
}
