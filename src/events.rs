//! In-process change notifications, produced by the model and consumed
//! by the AMQP surface.

use bytes::Bytes;
use tokio::sync::mpsc;

/// How far the AMQP surface may fall behind before updates are dropped.
/// Delivery is best-effort; subscribers re-read over HTTP after a gap.
const EVENT_QUEUE_DEPTH: usize = 256;

/// A change notification for a single node, captured at emit time so the
/// consumer never has to re-read the model.
#[derive(Debug, Clone)]
pub struct ObjectUpdate {
    /// Event path of the node, e.g. `events/repos/app/branches/main`.
    pub path: String,

    /// Node kind: `repo`, `branch`, `tag`, or `artifact`.
    pub type_name: &'static str,

    /// CRC32 of the canonical JSON below.
    pub digest: u32,

    /// Canonical JSON of the node at the time of the change.
    pub json: Bytes,
}

pub type EventReceiver = mpsc::Receiver<ObjectUpdate>;

#[derive(Debug, Clone)]
pub struct EventSender {
    inner: mpsc::Sender<ObjectUpdate>,
}

pub fn channel() -> (EventSender, EventReceiver) {
    let (sender, receiver) = mpsc::channel(EVENT_QUEUE_DEPTH);
    (EventSender { inner: sender }, receiver)
}

impl EventSender {
    /// Emits one update without blocking the model lock holder. A full
    /// queue or a missing consumer drops the update.
    pub fn emit(&self, update: ObjectUpdate) {
        use mpsc::error::TrySendError;

        match self.inner.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                log::warn!("Event queue is full, dropping update for {}", update.path);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
