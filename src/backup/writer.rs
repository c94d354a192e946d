//! Archive writer stage: the single consumer of the message queue.

use crate::archive::{ArchiveSink, MaildirNamer};
use crate::error::{Error, Result};
use crate::types::{Event, MessageRecord};

use super::context::PipelineContext;
use super::queue::MessageReceiver;

/// Owns the sink and the naming counter for the whole run.
pub(crate) struct ArchiveWriter {
    sink: Box<dyn ArchiveSink>,
    namer: MaildirNamer,
}

impl ArchiveWriter {
    pub(crate) fn new(sink: Box<dyn ArchiveSink>, namer: MaildirNamer) -> Self {
        Self { sink, namer }
    }

    /// Drain the message queue into the archive, then finalize it.
    ///
    /// Returns the number of messages written. On cancellation or a write failure the
    /// sink is dropped without being finalized.
    pub(crate) async fn run(
        mut self,
        ctx: &PipelineContext,
        mut messages: MessageReceiver,
    ) -> Result<u64> {
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                next = messages.recv() => next,
            };
            let Some(record) = next else { break };
            self.append(&record)?;
            written += 1;
        }

        let path = self.sink.location().to_path_buf();
        self.sink.finish()?;

        tracing::info!(
            messages = written,
            output = %path.display(),
            "retrieved {} messages, output written to {}",
            written,
            path.display()
        );
        ctx.emit(Event::Complete {
            messages: written,
            path,
        });
        Ok(written)
    }

    fn append(&mut self, record: &MessageRecord) -> Result<()> {
        let entry_path = self.namer.next_path(&record.folder);
        let entry = self.sink.new_entry(&entry_path)?;
        entry.write_all(&record.body).map_err(|e| Error::Archive {
            path: self.sink.location().to_path_buf(),
            reason: format!("failed to write entry {}: {}", entry_path, e),
        })?;
        tracing::trace!(entry = %entry_path, bytes = record.body.len(), "message archived");
        Ok(())
    }
}
