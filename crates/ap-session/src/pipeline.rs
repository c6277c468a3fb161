use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, warn};

use crate::output_buffer::OutputBuffer;

/// One item delivered to pipeline subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// A chunk of raw shell output, exactly as read from the PTY.
    Data(Vec<u8>),
    /// The shell is gone. Always the last event a subscriber sees.
    Exited { code: Option<u32> },
}

struct Subscriber {
    id: u64,
    tx: flume::Sender<OutputEvent>,
}

struct PipelineState {
    subscribers: Vec<Subscriber>,
    buffer: OutputBuffer,
    exited: Option<Option<u32>>,
}

/// Fan-out point for a shell's output.
///
/// The PTY reader thread is the only producer. Each chunk goes to every
/// subscriber in registration order and then into the rolling buffer, all
/// under one lock, so every consumer sees the same byte order.
pub struct OutputPipeline {
    state: Mutex<PipelineState>,
    next_id: AtomicU64,
}

impl OutputPipeline {
    pub fn new(buffer_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PipelineState {
                subscribers: Vec::new(),
                buffer: OutputBuffer::new(buffer_capacity),
                exited: None,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("pipeline lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Register a new subscriber. If the shell already exited the
    /// subscription yields `Exited` immediately.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = flume::unbounded();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        match state.exited {
            Some(code) => {
                let _ = tx.send(OutputEvent::Exited { code });
            }
            None => state.subscribers.push(Subscriber { id, tx }),
        }
        debug!(subscriber = id, "pipeline subscriber attached");
        Subscription {
            id,
            rx,
            pipeline: Arc::downgrade(self),
        }
    }

    /// Remove a subscriber. Its receiver drains what was already queued and
    /// then reports the channel as closed.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut state = self.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id != id);
        let removed = state.subscribers.len() != before;
        if removed {
            debug!(subscriber = id, "pipeline subscriber detached");
        }
        removed
    }

    /// Deliver a chunk to subscribers, then append it to the buffer.
    pub fn publish(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let mut state = self.lock();
        if state.exited.is_some() {
            return;
        }
        state
            .subscribers
            .retain(|s| s.tx.send(OutputEvent::Data(chunk.to_vec())).is_ok());
        state.buffer.append(chunk);
    }

    /// Mark the stream finished and notify every subscriber. Idempotent.
    pub fn close(&self, code: Option<u32>) {
        let mut state = self.lock();
        if state.exited.is_some() {
            return;
        }
        state.exited = Some(code);
        for sub in state.subscribers.drain(..) {
            let _ = sub.tx.send(OutputEvent::Exited { code });
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().exited.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().buffer.snapshot()
    }

    pub fn snapshot_lossy(&self) -> String {
        self.lock().buffer.snapshot_lossy()
    }

    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn clear_buffer(&self) {
        self.lock().buffer.clear();
    }
}

impl std::fmt::Debug for OutputPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("OutputPipeline")
            .field("subscribers", &state.subscribers.len())
            .field("buffered", &state.buffer.len())
            .field("exited", &state.exited)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving end of a pipeline subscription. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    rx: flume::Receiver<OutputEvent>,
    pipeline: Weak<OutputPipeline>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the subscription is detached
    /// and drained.
    pub async fn recv(&self) -> Option<OutputEvent> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<OutputEvent> {
        self.rx.try_recv().ok()
    }

    /// Detach from the pipeline without dropping the receiver.
    pub fn unsubscribe(&self) {
        if let Some(pipeline) = self.pipeline.upgrade() {
            pipeline.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
