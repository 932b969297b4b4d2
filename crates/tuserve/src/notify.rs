//! Fan-out of upload lifecycle events to external consumers.
//!
//! Created, completed and terminated events go over unbounded channels and
//! are never dropped while a consumer exists. Progress snapshots go over a
//! broadcast channel; a consumer that falls behind loses old snapshots
//! rather than stalling the append path.

use std::fmt;
use std::sync::Mutex;

use tokio::sync::{broadcast, mpsc};

use crate::stores::UploadInfo;

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct Slot(Mutex<Option<mpsc::UnboundedSender<UploadInfo>>>);

impl Slot {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<UploadInfo> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.0.lock().expect("event slot poisoned") = Some(tx);
        rx
    }

    fn emit(&self, info: UploadInfo) {
        let mut slot = self.0.lock().expect("event slot poisoned");
        if let Some(tx) = slot.as_ref()
            && tx.send(info).is_err()
        {
            // Consumer went away; stop buffering until someone resubscribes.
            *slot = None;
        }
    }
}

/// Production side of the notification streams.
///
/// Streams are lazy and restartable: nothing is buffered until a consumer
/// subscribes, and subscribing again replaces the previous stream.
pub struct Notifier {
    created: Slot,
    completed: Slot,
    terminated: Slot,
    progress: broadcast::Sender<UploadInfo>,
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier {
            created: Slot::default(),
            completed: Slot::default(),
            terminated: Slot::default(),
            progress: broadcast::channel(PROGRESS_CHANNEL_CAPACITY).0,
        }
    }
}

impl Notifier {
    /// Descriptor snapshots for every newly created upload.
    pub fn created_uploads(&self) -> mpsc::UnboundedReceiver<UploadInfo> {
        self.created.subscribe()
    }

    /// Descriptor snapshots for uploads whose offset reached their size.
    /// Partial uploads never appear here; they complete only through the
    /// final upload that concatenates them.
    pub fn completed_uploads(&self) -> mpsc::UnboundedReceiver<UploadInfo> {
        self.completed.subscribe()
    }

    /// Descriptor snapshots for terminated uploads.
    pub fn terminated_uploads(&self) -> mpsc::UnboundedReceiver<UploadInfo> {
        self.terminated.subscribe()
    }

    /// Periodic descriptor snapshots while a body is being appended,
    /// offset-monotonic per upload. Lagging receivers skip snapshots.
    pub fn upload_progress(&self) -> broadcast::Receiver<UploadInfo> {
        self.progress.subscribe()
    }

    pub(crate) fn notify_created(&self, info: UploadInfo) {
        self.created.emit(info);
    }

    pub(crate) fn notify_completed(&self, info: UploadInfo) {
        self.completed.emit(info);
    }

    pub(crate) fn notify_terminated(&self, info: UploadInfo) {
        self.terminated.emit(info);
    }

    pub(crate) fn notify_progress(&self, info: UploadInfo) {
        let _ = self.progress.send(info);
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, offset: u64) -> UploadInfo {
        let mut info = UploadInfo::new(id);
        info.size = Some(100);
        info.offset = offset;
        info
    }

    #[tokio::test]
    async fn events_reach_a_subscriber() {
        let notifier = Notifier::default();
        let mut created = notifier.created_uploads();
        let mut completed = notifier.completed_uploads();

        notifier.notify_created(snapshot("a", 0));
        notifier.notify_completed(snapshot("a", 100));

        assert_eq!(created.recv().await.unwrap().id, "a");
        let done = completed.recv().await.unwrap();
        assert_eq!(done.offset, 100);
    }

    #[tokio::test]
    async fn emitting_without_a_subscriber_does_not_block() {
        let notifier = Notifier::default();
        notifier.notify_created(snapshot("a", 0));
        notifier.notify_completed(snapshot("a", 100));
        notifier.notify_terminated(snapshot("a", 100));
        notifier.notify_progress(snapshot("a", 50));
    }

    #[tokio::test]
    async fn resubscribing_restarts_the_stream() {
        let notifier = Notifier::default();
        let first = notifier.completed_uploads();
        drop(first);

        // The dead consumer is noticed and detached on the next emit.
        notifier.notify_completed(snapshot("a", 100));

        let mut second = notifier.completed_uploads();
        notifier.notify_completed(snapshot("b", 100));
        assert_eq!(second.recv().await.unwrap().id, "b");
    }

    #[tokio::test]
    async fn progress_snapshots_arrive_in_offset_order() {
        let notifier = Notifier::default();
        let mut progress = notifier.upload_progress();

        for offset in [10, 20, 30] {
            notifier.notify_progress(snapshot("a", offset));
        }

        let mut last = 0;
        for _ in 0..3 {
            let snap = progress.recv().await.unwrap();
            assert!(snap.offset > last);
            last = snap.offset;
        }
    }

    #[tokio::test]
    async fn completed_events_are_buffered_while_consumer_is_slow() {
        let notifier = Notifier::default();
        let mut completed = notifier.completed_uploads();

        for i in 0..1000 {
            notifier.notify_completed(snapshot(&format!("u{i}"), 100));
        }
        for i in 0..1000 {
            assert_eq!(completed.recv().await.unwrap().id, format!("u{i}"));
        }
    }
}
