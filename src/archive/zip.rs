use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::ArchiveSink;

/// [`ArchiveSink`] writing a deflate-compressed ZIP file
pub struct ZipSink {
    path: PathBuf,
    writer: ZipWriter<BufWriter<File>>,
    options: FileOptions,
}

impl ZipSink {
    /// Create (or truncate) the ZIP file at `path`
    pub fn create(path: &Path) -> Result<Self> {
        debug!(?path, "creating ZIP archive");

        let file = File::create(path).map_err(|e| Error::Archive {
            path: path.to_path_buf(),
            reason: format!("failed to create file: {}", e),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: ZipWriter::new(BufWriter::new(file)),
            options: FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(0o644),
        })
    }

    fn archive_error(&self, action: &str, err: impl std::fmt::Display) -> Error {
        Error::Archive {
            path: self.path.clone(),
            reason: format!("{}: {}", action, err),
        }
    }
}

impl ArchiveSink for ZipSink {
    fn new_entry(&mut self, path: &str) -> Result<&mut dyn Write> {
        if let Err(e) = self.writer.start_file(path, self.options) {
            return Err(self.archive_error(&format!("failed to add entry {}", path), e));
        }
        Ok(&mut self.writer)
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        let mut inner = match self.writer.finish() {
            Ok(inner) => inner,
            Err(e) => return Err(self.archive_error("failed to finalize", e)),
        };
        inner
            .flush()
            .map_err(|e| self.archive_error("failed to flush", e))?;
        inner
            .get_ref()
            .sync_all()
            .map_err(|e| self.archive_error("failed to sync", e))?;
        debug!(path = ?self.path, "ZIP archive finalized");
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}
