//! Streaming sessions between a UI surface and the dispatcher.
//!
//! Each session is a background task pumping dispatcher events into a bounded
//! channel. A surface owns at most one session: opening another aborts the
//! previous task, which drops its in-flight HTTP request.

use crate::dispatcher::{DispatchEvent, Dispatcher};
use crate::error::{DispatchError, TransportError};
use crate::prompts::ActionRequest;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 32;

/// What the caller receives. Serialized as `{"type": "chunk", "chunk": ...}` etc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportEvent {
    Chunk { chunk: String },
    Done,
    Error { error: String },
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportEvent::Chunk { .. })
    }

    fn disconnected() -> Self {
        TransportEvent::Error {
            error: TransportError::Disconnected.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Completed,
    Failed,
}

struct SessionSlot {
    id: u64,
    task: JoinHandle<()>,
}

type Slots = Arc<Mutex<HashMap<String, SessionSlot>>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct StreamTransport {
    dispatcher: Dispatcher,
    sessions: Slots,
    next_id: Arc<AtomicU64>,
}

impl StreamTransport {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Start streaming `req` for `surface`, replacing any open session there.
    pub fn open(&self, surface: &str, req: &ActionRequest) -> StreamSession {
        let original = req.text.clone().unwrap_or_default();
        self.open_stream(surface, self.dispatcher.handle_streaming(req), original)
    }

    /// Like [`open`](Self::open) for an arbitrary dispatch stream.
    pub fn open_stream(
        &self,
        surface: &str,
        events: BoxStream<'static, Result<DispatchEvent, DispatchError>>,
        original_text: String,
    ) -> StreamSession {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Hold the lock across spawn so the pump cannot clear its slot before it exists.
        let mut sessions = lock(&self.sessions);
        if let Some(old) = sessions.remove(surface) {
            tracing::debug!(surface, replaced = old.id, "tearing down previous stream session");
            old.task.abort();
        }
        let task = tokio::spawn(pump(events, tx, self.sessions.clone(), surface.to_string(), id));
        sessions.insert(surface.to_string(), SessionSlot { id, task });
        tracing::debug!(surface, session = id, "stream session opened");

        StreamSession::new(rx, original_text)
    }

    /// Tear down the surface's session, if any. Returns whether one was open.
    pub fn close(&self, surface: &str) -> bool {
        match lock(&self.sessions).remove(surface) {
            Some(slot) => {
                slot.task.abort();
                tracing::debug!(surface, session = slot.id, "stream session closed");
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self, surface: &str) -> bool {
        lock(&self.sessions).contains_key(surface)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

async fn pump(
    mut events: BoxStream<'static, Result<DispatchEvent, DispatchError>>,
    tx: mpsc::Sender<TransportEvent>,
    sessions: Slots,
    surface: String,
    id: u64,
) {
    let terminal = loop {
        let event = match events.next().await {
            Some(Ok(DispatchEvent::Chunk(chunk))) if chunk.is_empty() => continue,
            Some(Ok(DispatchEvent::Chunk(chunk))) => TransportEvent::Chunk { chunk },
            Some(Ok(DispatchEvent::Done(_))) => break Some(TransportEvent::Done),
            Some(Err(e)) => break Some(TransportEvent::Error { error: e.to_string() }),
            None => break Some(TransportEvent::disconnected()),
        };
        if tx.send(event).await.is_err() {
            tracing::debug!(surface = %surface, session = id, "caller went away; discarding stream");
            break None;
        }
    };
    drop(events);

    {
        let mut slots = lock(&sessions);
        if slots.get(&surface).is_some_and(|s| s.id == id) {
            slots.remove(&surface);
        }
    }

    if let Some(event) = terminal {
        let _ = tx.send(event).await;
    }
}

/// Caller side of one streaming exchange.
pub struct StreamSession {
    rx: mpsc::Receiver<TransportEvent>,
    state: SessionState,
    accumulated: String,
    original_text: String,
}

impl StreamSession {
    fn new(rx: mpsc::Receiver<TransportEvent>, original_text: String) -> Self {
        Self {
            rx,
            state: SessionState::Open,
            accumulated: String::new(),
            original_text,
        }
    }

    /// Next event, or `None` once a terminal event has been delivered.
    /// A channel that closes early produces a "Connection lost" error.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.state != SessionState::Open {
            return None;
        }
        let event = self.rx.recv().await.unwrap_or_else(TransportEvent::disconnected);
        match &event {
            TransportEvent::Chunk { chunk } => self.accumulated.push_str(chunk),
            TransportEvent::Done => self.state = SessionState::Completed,
            TransportEvent::Error { .. } => self.state = SessionState::Failed,
        }
        if event.is_terminal() {
            self.rx.close();
        }
        Some(event)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Text received so far.
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    /// The input to put back into the field after a failure.
    pub fn restore_text(&self) -> &str {
        &self.original_text
    }

    pub fn into_events(self) -> BoxStream<'static, TransportEvent> {
        stream::unfold(self, |mut session| async move {
            let event = session.next_event().await?;
            Some((event, session))
        })
        .boxed()
    }
}
