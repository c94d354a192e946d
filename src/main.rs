//! Command-line entry point: back up one IMAP account into a ZIP file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use imap_backup::{Backup, Config, StartTls, run_until_signal};

/// Dump every folder of an IMAP account into a Maildir-layout ZIP archive
#[derive(Debug, Parser)]
#[command(name = "imap-backup", version, about)]
struct Cli {
    /// IMAP server as host[:port], optionally prefixed with imap:// or imaps://
    #[arg(long)]
    server: Option<String>,

    /// Login user name
    #[arg(long)]
    user: Option<String>,

    /// Login password
    #[arg(long, env = "IMAP_BACKUP_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Output ZIP file
    #[arg(long)]
    outfile: Option<PathBuf>,

    /// Number of concurrent download sessions
    #[arg(long)]
    workers: Option<usize>,

    /// Require STARTTLS on plain connections, even if the server does not advertise it
    #[arg(long, conflicts_with = "no_starttls")]
    starttls: bool,

    /// Never upgrade plain connections (by default STARTTLS is used when offered)
    #[arg(long)]
    no_starttls: bool,

    /// TOML configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> imap_backup::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_toml_file(path)?,
            None => Config::default(),
        };

        if let Some(server) = self.server {
            config.server.address = server;
        }
        if let Some(user) = self.user {
            config.server.username = user;
        }
        if let Some(password) = self.password {
            config.server.password = password;
        }
        if let Some(outfile) = self.outfile {
            config.output = outfile;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.starttls {
            config.server.starttls = StartTls::Always;
        } else if self.no_starttls {
            config.server.starttls = StartTls::Never;
        }
        Ok(config)
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let backup = match cli.into_config().and_then(Backup::new) {
        Ok(backup) => backup,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    match run_until_signal(&backup).await {
        Ok(summary) => {
            tracing::debug!(folders = summary.folders, "backup finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "backup failed");
            ExitCode::FAILURE
        }
    }
}
