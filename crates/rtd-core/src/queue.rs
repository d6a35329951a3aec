//! Messages and the bounded delivery queue between coordinator and workers.

use std::collections::VecDeque;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use rtd_common::{ArchiveRecord, Snapshot};

use crate::aggregates::PeriodicStats;

/// Everything a generator worker can be sent.
///
/// `Loop` and `Archive` travel on the delivery queue; `Stats` and `Shutdown`
/// on the control channel.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Loop(Snapshot),
    Archive(ArchiveRecord),
    Stats(PeriodicStats),
    Shutdown,
}

impl WorkerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Loop(_) => "loop",
            WorkerMessage::Archive(_) => "archive",
            WorkerMessage::Stats(_) => "stats",
            WorkerMessage::Shutdown => "shutdown",
        }
    }
}

/// Result of offering a message to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued; `dropped` older loop snapshots were discarded to make room.
    Queued { dropped: usize },
    /// The consuming worker has gone away.
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<WorkerMessage>,
    closed: bool,
}

/// Per-worker queue that never blocks the producer.
///
/// When a worker falls behind, the oldest loop snapshots are discarded so at
/// most `backlog` items wait. Archive records are never discarded.
#[derive(Debug)]
pub struct DeliveryQueue {
    name: String,
    backlog: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DeliveryQueue {
    pub fn new(name: impl Into<String>, backlog: usize) -> Self {
        Self {
            name: name.into(),
            backlog: backlog.max(1),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, message: WorkerMessage) -> PushOutcome {
        let mut state = self.state.lock().await;
        if state.closed {
            return PushOutcome::Closed;
        }
        state.items.push_back(message);

        let mut dropped = 0;
        while state.items.len() > self.backlog {
            let oldest_loop = state
                .items
                .iter()
                .position(|m| matches!(m, WorkerMessage::Loop(_)));
            match oldest_loop {
                Some(idx) => {
                    state.items.remove(idx);
                    dropped += 1;
                }
                None => break,
            }
        }
        drop(state);

        if dropped > 0 {
            counter!("rtd_queue_trimmed_total", "worker" => self.name.clone())
                .increment(dropped as u64);
            debug!(worker = %self.name, dropped, "Trimmed delivery queue");
        }
        self.notify.notify_one();
        PushOutcome::Queued { dropped }
    }

    /// Next message, waiting up to `wait`. `None` on timeout or once the
    /// queue is closed and drained.
    pub async fn pop(&self, wait: Duration) -> Option<WorkerMessage> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(message) = state.items.pop_front() {
                    return Some(message);
                }
                if state.closed {
                    return None;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Refuse further messages. Pending ones are discarded.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.items.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
