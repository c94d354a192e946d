//! Shared test helpers: a scripted mail server and an in-memory archive.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveSink;
use crate::config::{Config, RetryConfig, ServerConfig};
use crate::error::{Error, FetchError, Result};
use crate::imap::{BodyStream, MailClient, MailSession};
use crate::types::{Event, FetchedBody, Folder, MailboxMeta, SequenceRange};

use super::Backup;
use super::context::PipelineContext;

/// One folder on the scripted server
#[derive(Clone, Debug)]
pub(crate) struct MockFolder {
    pub(crate) name: String,
    pub(crate) no_select: bool,
    pub(crate) messages: Vec<Vec<u8>>,
    pub(crate) select_fails: bool,
    pub(crate) select_drops_connection: bool,
    pub(crate) fail_after: Option<(usize, FetchError)>,
}

impl MockFolder {
    /// Folder holding `count` distinct messages
    pub(crate) fn new(name: &str, count: usize) -> Self {
        Self {
            name: name.to_string(),
            no_select: false,
            messages: (1..=count)
                .map(|i| format!("Subject: {name} #{i}\r\n\r\nbody {i}").into_bytes())
                .collect(),
            select_fails: false,
            select_drops_connection: false,
            fail_after: None,
        }
    }

    /// FETCH yields the first `delivered` bodies, then `error`
    pub(crate) fn failing_after(mut self, delivered: usize, error: FetchError) -> Self {
        self.fail_after = Some((delivered, error));
        self
    }

    /// EXAMINE answers NO
    pub(crate) fn unselectable(mut self) -> Self {
        self.select_fails = true;
        self
    }

    /// Every EXAMINE of this folder kills the connection
    pub(crate) fn dropping_connection(mut self) -> Self {
        self.select_drops_connection = true;
        self
    }

    /// Listed with `\Noselect`
    pub(crate) fn no_select(mut self) -> Self {
        self.no_select = true;
        self
    }
}

/// Behaviour of the scripted server
#[derive(Clone, Debug, Default)]
pub(crate) struct MockScript {
    pub(crate) folders: Vec<MockFolder>,
    /// The first N connection attempts fail with a transient error
    pub(crate) transient_connect_failures: usize,
    /// Every connection attempt fails permanently
    pub(crate) refuse_connect: bool,
    /// LOGIN is rejected
    pub(crate) reject_auth: bool,
    /// LIST answers NO
    pub(crate) list_fails: bool,
    /// Sessions beyond this many are rejected at login
    pub(crate) session_limit: Option<usize>,
    /// Latency of every EXAMINE
    pub(crate) select_delay: Duration,
    /// The first N EXAMINEs, whatever the folder, kill the connection
    pub(crate) lost_connections_on_select: usize,
}

impl MockScript {
    pub(crate) fn with_folders(folders: Vec<MockFolder>) -> Self {
        Self {
            folders,
            ..Self::default()
        }
    }
}

/// What the scripted server saw
#[derive(Debug, Default)]
pub(crate) struct MockLog {
    pub(crate) connect_attempts: AtomicUsize,
    pub(crate) sessions: AtomicUsize,
    pub(crate) logouts: AtomicUsize,
    pub(crate) lost_connections: AtomicUsize,
    pub(crate) selects: Mutex<Vec<String>>,
    pub(crate) fetches: Mutex<Vec<String>>,
}

impl MockLog {
    pub(crate) fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn lost_connections(&self) -> usize {
        self.lost_connections.load(Ordering::SeqCst)
    }

    pub(crate) fn selects(&self) -> Vec<String> {
        self.selects.lock().unwrap().clone()
    }

    pub(crate) fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

/// [`MailClient`] backed by a [`MockScript`]
pub(crate) struct MockClient {
    script: Arc<MockScript>,
    pub(crate) log: Arc<MockLog>,
}

impl MockClient {
    pub(crate) fn new(script: MockScript) -> Self {
        Self {
            script: Arc::new(script),
            log: Arc::new(MockLog::default()),
        }
    }
}

#[async_trait::async_trait]
impl MailClient for MockClient {
    async fn open_session(&self) -> Result<Box<dyn MailSession>> {
        let attempt = self.log.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.script.transient_connect_failures {
            return Err(Error::Connect {
                address: "imap.test:143".into(),
                reason: "connection refused".into(),
                transient: true,
            });
        }
        if self.script.refuse_connect {
            return Err(Error::Connect {
                address: "imap.test:143".into(),
                reason: "no route to host".into(),
                transient: false,
            });
        }
        if self.script.reject_auth {
            return Err(Error::Auth {
                username: "user".into(),
                reason: "[AUTHENTICATIONFAILED] invalid credentials".into(),
            });
        }
        if let Some(limit) = self.script.session_limit
            && self.log.sessions() >= limit
        {
            return Err(Error::Auth {
                username: "user".into(),
                reason: "too many connections".into(),
            });
        }

        self.log.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            script: Arc::clone(&self.script),
            log: Arc::clone(&self.log),
            selected: None,
            dead: false,
        }))
    }
}

struct MockSession {
    script: Arc<MockScript>,
    log: Arc<MockLog>,
    selected: Option<usize>,
    dead: bool,
}

impl MockSession {
    fn lose_connection(&mut self) -> Error {
        self.dead = true;
        self.selected = None;
        self.log.lost_connections.fetch_add(1, Ordering::SeqCst);
        Error::Disconnected("connection reset by peer".into())
    }
}

#[async_trait::async_trait]
impl MailSession for MockSession {
    async fn list_folders(&mut self, _reference: &str, pattern: &str) -> Result<Vec<Folder>> {
        assert_eq!(pattern, "*");
        if self.script.list_fails {
            return Err(Error::Imap("LIST: NO [SERVERBUG] internal error".into()));
        }
        Ok(self
            .script
            .folders
            .iter()
            .map(|f| Folder {
                no_select: f.no_select,
                ..Folder::new(f.name.clone())
            })
            .collect())
    }

    async fn select_folder(&mut self, name: &str, read_only: bool) -> Result<MailboxMeta> {
        assert!(read_only, "backups must not modify the mailbox");
        if self.dead {
            return Err(Error::Disconnected("broken pipe".into()));
        }
        self.log.selects.lock().unwrap().push(name.to_string());
        if !self.script.select_delay.is_zero() {
            tokio::time::sleep(self.script.select_delay).await;
        }
        if self.log.lost_connections() < self.script.lost_connections_on_select {
            return Err(self.lose_connection());
        }

        let index = self
            .script
            .folders
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| Error::Imap(format!("NO Mailbox doesn't exist: {name}")))?;
        let folder = &self.script.folders[index];
        if folder.select_drops_connection {
            return Err(self.lose_connection());
        }
        if folder.select_fails {
            return Err(Error::Imap(format!("NO Mailbox not selectable: {name}")));
        }

        self.selected = Some(index);
        Ok(MailboxMeta {
            exists: folder.messages.len() as u32,
        })
    }

    async fn fetch_bodies<'a>(
        &'a mut self,
        range: SequenceRange,
    ) -> std::result::Result<BodyStream<'a>, FetchError> {
        let index = self
            .selected
            .ok_or_else(|| FetchError::Server("BAD No mailbox selected".into()))?;
        let folder = &self.script.folders[index];
        self.log.fetches.lock().unwrap().push(folder.name.clone());
        assert_eq!(range.start, 1);
        assert_eq!(range.end as usize, folder.messages.len());

        let limit = folder
            .fail_after
            .as_ref()
            .map_or(folder.messages.len(), |(delivered, _)| *delivered);
        let mut items: Vec<std::result::Result<FetchedBody, FetchError>> = folder
            .messages
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, body)| {
                Ok(FetchedBody {
                    seq: i as u32 + 1,
                    body: body.clone(),
                })
            })
            .collect();
        if let Some((_, error)) = &folder.fail_after {
            items.push(Err(error.clone()));
        }

        Ok(futures::stream::iter(items).boxed())
    }

    async fn logout(&mut self, _timeout: Duration) -> Result<()> {
        self.log.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Contents of a [`MemorySink`], shared with the test
#[derive(Debug, Default)]
pub(crate) struct MemoryArchive {
    pub(crate) entries: Vec<(String, Vec<u8>)>,
    pub(crate) finished: bool,
}

impl MemoryArchive {
    pub(crate) fn paths(&self) -> Vec<String> {
        self.entries.iter().map(|(path, _)| path.clone()).collect()
    }
}

/// [`ArchiveSink`] keeping entries in memory
pub(crate) struct MemorySink {
    path: PathBuf,
    cursor: EntryCursor,
    fail_on_entry: Option<usize>,
}

struct EntryCursor {
    shared: Arc<Mutex<MemoryArchive>>,
}

impl Write for EntryCursor {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut archive = self.shared.lock().unwrap();
        let (_, data) = archive
            .entries
            .last_mut()
            .ok_or_else(|| std::io::Error::other("write before first entry"))?;
        data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl MemorySink {
    pub(crate) fn new() -> (Self, Arc<Mutex<MemoryArchive>>) {
        let shared = Arc::new(Mutex::new(MemoryArchive::default()));
        let sink = Self {
            path: PathBuf::from("memory.zip"),
            cursor: EntryCursor {
                shared: Arc::clone(&shared),
            },
            fail_on_entry: None,
        };
        (sink, shared)
    }

    /// The `n`th entry (1-based) fails to open
    pub(crate) fn failing_on_entry(mut self, n: usize) -> Self {
        self.fail_on_entry = Some(n);
        self
    }
}

impl ArchiveSink for MemorySink {
    fn new_entry(&mut self, path: &str) -> Result<&mut dyn Write> {
        let mut archive = self.cursor.shared.lock().unwrap();
        if self.fail_on_entry == Some(archive.entries.len() + 1) {
            return Err(Error::Archive {
                path: self.path.clone(),
                reason: "disk full".into(),
            });
        }
        archive.entries.push((path.to_string(), Vec::new()));
        drop(archive);
        Ok(&mut self.cursor)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let mut archive = self.cursor.shared.lock().unwrap();
        assert!(!archive.finished, "finish called twice");
        archive.finished = true;
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

/// Valid configuration with fast retries
pub(crate) fn test_config(workers: usize) -> Config {
    Config {
        server: ServerConfig {
            address: "imap.test:143".into(),
            username: "user".into(),
            password: "pw".into(),
            logout_timeout: Duration::from_secs(1),
            ..ServerConfig::default()
        },
        output: PathBuf::from("memory.zip"),
        workers,
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..Config::default()
    }
}

/// Backup against a scripted server, plus the server's log
pub(crate) fn mock_backup(script: MockScript, workers: usize) -> (Backup, Arc<MockLog>) {
    mock_backup_with_config(script, test_config(workers))
}

pub(crate) fn mock_backup_with_config(
    script: MockScript,
    config: Config,
) -> (Backup, Arc<MockLog>) {
    let client = MockClient::new(script);
    let log = Arc::clone(&client.log);
    let backup = Backup::with_client(config, Arc::new(client)).unwrap();
    (backup, log)
}

/// Drain every event already broadcast
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Pipeline context for driving a single stage directly
pub(crate) fn test_context(
    client: MockClient,
    config: Config,
) -> (Arc<PipelineContext>, broadcast::Receiver<Event>) {
    let (event_tx, event_rx) = broadcast::channel(1000);
    let ctx = PipelineContext {
        config: Arc::new(config),
        client: Arc::new(client),
        event_tx,
        cancel: CancellationToken::new(),
    };
    (Arc::new(ctx), event_rx)
}
