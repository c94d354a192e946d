//! Bounded queues between the pipeline stages.
//!
//! The folder queue has many consumers (one per worker) so its receiving end is
//! shared behind a mutex; the message queue is a plain mpsc channel drained by the
//! single archive writer. Both close when their last sender is dropped.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::types::{Folder, MessageRecord};

/// Sending end of the folder queue, owned by the enumerator
pub(crate) type FolderSender = mpsc::Sender<Folder>;

/// Sending end of the message queue, cloned into every worker
pub(crate) type MessageSender = mpsc::Sender<MessageRecord>;

/// Receiving end of the message queue, owned by the archive writer
pub(crate) type MessageReceiver = mpsc::Receiver<MessageRecord>;

/// Receiving end of the folder queue, shared by all workers
#[derive(Clone)]
pub(crate) struct FolderReceiver {
    inner: Arc<Mutex<mpsc::Receiver<Folder>>>,
}

impl FolderReceiver {
    /// Next folder, or `None` once the enumerator is done and the queue is drained.
    ///
    /// Each folder is handed to exactly one caller.
    pub(crate) async fn recv(&self) -> Option<Folder> {
        let mut rx = self.inner.lock().await;
        rx.recv().await
    }
}

/// Create the folder queue
pub(crate) fn folder_queue(capacity: usize) -> (FolderSender, FolderReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        tx,
        FolderReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Create the message queue
pub(crate) fn message_queue(capacity: usize) -> (MessageSender, MessageReceiver) {
    mpsc::channel(capacity)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn every_folder_is_delivered_once_across_consumers() {
        let (tx, rx) = folder_queue(2);

        let producer = tokio::spawn(async move {
            for i in 0..20 {
                tx.send(Folder::new(format!("F{i}"))).await.unwrap();
            }
        });

        let mut consumers = Vec::new();
        for _ in 0..3 {
            let rx = rx.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(folder) = rx.recv().await {
                    seen.push(folder.name);
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        producer.await.unwrap();
        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }

        assert_eq!(all.len(), 20, "no folder lost or duplicated");
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 20);
    }

    #[tokio::test]
    async fn folder_queue_closes_when_sender_dropped() {
        let (tx, rx) = folder_queue(5);
        tx.send(Folder::new("INBOX")).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.map(|f| f.name), Some("INBOX".to_string()));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn enumerator_send_waits_until_a_worker_takes_one() {
        use tokio_test::{assert_pending, assert_ready, task};

        let (tx, rx) = folder_queue(1);
        let mut first = task::spawn(tx.send(Folder::new("A")));
        assert_ready!(first.poll()).unwrap();

        let mut second = task::spawn(tx.send(Folder::new("B")));
        assert_pending!(second.poll());

        let mut recv = task::spawn(rx.recv());
        assert_eq!(assert_ready!(recv.poll()).map(|f| f.name), Some("A".to_string()));
        assert!(second.is_woken());
        assert_ready!(second.poll()).unwrap();
    }

    #[tokio::test]
    async fn message_queue_applies_backpressure() {
        let (tx, mut rx) = message_queue(1);
        let record = MessageRecord {
            folder: "INBOX".into(),
            body: b"x".to_vec(),
        };

        tx.send(record.clone()).await.unwrap();
        assert!(
            tx.try_send(record.clone()).is_err(),
            "second send must wait for the writer"
        );
        assert_eq!(rx.recv().await, Some(record.clone()));
        tx.try_send(record).unwrap();
    }
}
