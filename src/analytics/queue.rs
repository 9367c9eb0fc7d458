use flume::{Receiver, Sender, TryRecvError};

use crate::analytics::models::VideoRef;

/// Unordered, thread-safe queue of videos waiting for a report.
///
/// Backed by an unbounded flume channel whose sending and receiving halves are
/// both kept here, so the channel never disconnects while the queue is alive.
/// Each operation is atomic on its own:
/// * [`WorkQueue::push`] appends one item,
/// * [`WorkQueue::try_pop`] removes one item or reports empty without blocking,
/// * [`WorkQueue::len`] is a snapshot and may be stale as soon as it returns.
///
/// Clones share the same underlying queue.
#[derive(Debug, Clone)]
pub(crate) struct WorkQueue {
    sender: Sender<VideoRef>,
    receiver: Receiver<VideoRef>,
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self { sender, receiver }
    }

    pub(crate) fn push(&self, video: VideoRef) {
        // Both halves are owned by `self`, so the channel cannot be disconnected here.
        if let Err(flume::SendError(video)) = self.sender.send(video) {
            error!("Work queue disconnected, dropping {}", video);
        }
    }

    pub(crate) fn try_pop(&self) -> Option<VideoRef> {
        match self.receiver.try_recv() {
            Ok(video) => Some(video),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Removes and returns everything currently queued.
    pub(crate) fn drain(&self) -> Vec<VideoRef> {
        self.receiver.drain().collect()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<VideoRef> for WorkQueue {
    fn from_iter<I: IntoIterator<Item = VideoRef>>(iter: I) -> Self {
        let queue = WorkQueue::new();
        for video in iter {
            queue.push(video);
        }
        queue
    }
}
