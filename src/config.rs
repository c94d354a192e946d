//! Configuration types for imap-backup

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default IMAP server, kept for compatibility with existing invocations
pub const DEFAULT_SERVER: &str = "mail.autistici.org:143";

/// Port that implies implicit TLS when no scheme is given
pub const IMAPS_PORT: u16 = 993;

/// Port appended when the address has none
pub const IMAP_PORT: u16 = 143;

/// How the transport to the server is secured
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte (imaps)
    Tls,
    /// Plain TCP, upgraded with STARTTLS before login; fails if the server refuses
    StartTls,
    /// Plain TCP, upgraded with STARTTLS when the server advertises it
    Opportunistic,
    /// Plain TCP, never upgraded
    Plain,
}

/// When to upgrade a plain connection with STARTTLS
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartTls {
    /// Upgrade if the server lists STARTTLS in its capabilities
    #[default]
    Auto,
    /// Always upgrade, without asking for capabilities
    Always,
    /// Stay on plain TCP
    Never,
}

/// IMAP server and account settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server address: `host`, `host:port`, `imaps://host[:port]` or `imap://host[:port]`
    #[serde(default = "default_server")]
    pub address: String,

    /// Login user name
    #[serde(default)]
    pub username: String,

    /// Login password
    #[serde(default)]
    pub password: String,

    /// STARTTLS policy for plain connections (default: auto)
    #[serde(default)]
    pub starttls: StartTls,

    /// How long to wait for the server to acknowledge LOGOUT (default: 30 seconds)
    #[serde(default = "default_logout_timeout", with = "duration_serde")]
    pub logout_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server(),
            username: String::new(),
            password: String::new(),
            starttls: StartTls::Auto,
            logout_timeout: default_logout_timeout(),
        }
    }
}

/// Resolved server endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name, also used for TLS certificate verification
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Transport security
    pub security: Security,
}

impl Endpoint {
    /// `host:port` form used for dialing and logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ServerConfig {
    /// Resolve the configured address into host, port and transport security.
    ///
    /// `imaps://` or a bare port 993 means implicit TLS. Anything else is plain TCP
    /// upgraded according to the STARTTLS policy.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let raw = self.address.trim();
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, raw),
        };
        let rest = rest.trim_end_matches('/');

        let default_port = match scheme.as_deref() {
            Some("imaps") => IMAPS_PORT,
            Some("imap") | None => IMAP_PORT,
            Some(other) => {
                return Err(Error::config(
                    "address",
                    format!("unsupported scheme '{}', expected imap or imaps", other),
                ));
            }
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::config("address", format!("invalid port in '{}'", self.address))
                })?;
                (host, port)
            }
            None => (rest, default_port),
        };

        if host.is_empty() {
            return Err(Error::config(
                "address",
                format!("missing host in '{}'", self.address),
            ));
        }

        let implicit_tls = match scheme.as_deref() {
            Some("imaps") => true,
            Some(_) => false,
            None => port == IMAPS_PORT,
        };
        let security = match (implicit_tls, self.starttls) {
            (true, _) => Security::Tls,
            (false, StartTls::Auto) => Security::Opportunistic,
            (false, StartTls::Always) => Security::StartTls,
            (false, StartTls::Never) => Security::Plain,
        };

        Ok(Endpoint {
            host: host.to_string(),
            port,
            security,
        })
    }
}

/// Queue capacities between the pipeline stages
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Folders waiting for a download worker (default: 5)
    #[serde(default = "default_folder_capacity")]
    pub folder_capacity: usize,

    /// Fetched messages waiting for the archive writer (default: 100)
    ///
    /// This bounds how many message bodies are held in memory at once.
    #[serde(default = "default_message_capacity")]
    pub message_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            folder_capacity: default_folder_capacity(),
            message_capacity: default_message_capacity(),
        }
    }
}

/// Retry configuration for session establishment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for a backup run
///
/// Every field has a serde default, so a TOML file only needs the settings that
/// differ:
///
/// ```toml
/// output = "backup.zip"
/// workers = 4
///
/// [server]
/// address = "imaps://mail.example.com"
/// username = "me@example.com"
/// password = "hunter2"
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Server and account settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Output ZIP file
    #[serde(default)]
    pub output: PathBuf,

    /// Number of concurrent download sessions (default: 3)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Queue capacities
    #[serde(default)]
    pub queues: QueueConfig,

    /// Session establishment retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            output: PathBuf::new(),
            workers: default_workers(),
            queues: QueueConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })
    }

    /// Check that everything needed for a run is present.
    ///
    /// Called before any network activity so a bad invocation never touches the
    /// server.
    pub fn validate(&self) -> Result<()> {
        if self.server.username.is_empty() || self.server.password.is_empty() {
            return Err(Error::config(
                "username",
                "you must specify both a user name and a password",
            ));
        }
        if self.output.as_os_str().is_empty() {
            return Err(Error::config("output", "you must specify an output file"));
        }
        if self.workers == 0 {
            return Err(Error::config("workers", "at least one worker is required"));
        }
        if self.queues.folder_capacity == 0 || self.queues.message_capacity == 0 {
            return Err(Error::config("queues", "queue capacities must be non-zero"));
        }
        self.server.endpoint()?;
        Ok(())
    }
}

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}

fn default_logout_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_workers() -> usize {
    3
}

fn default_folder_capacity() -> usize {
    5
}

fn default_message_capacity() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
