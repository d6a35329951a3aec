//! Generator workers.
//!
//! Each worker owns one [`Generator`], its own [`DeliveryQueue`] and a
//! control channel. It drains control messages without blocking, waits up to
//! the poll interval for the next delivery, and turns loop snapshots into
//! artifacts no more often than the generator's minimum interval.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use rtd_common::{ArchiveRecord, Snapshot};

use crate::aggregates::PeriodicStats;
use crate::buffer::SharedBuffer;
use crate::error::CoreResult;
use crate::queue::{DeliveryQueue, PushOutcome, WorkerMessage};
use crate::sink::{Artifact, SnapshotSink};

/// How long a worker waits on its delivery queue before rechecking control.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Turns snapshots plus buffer statistics into an output artifact.
#[async_trait]
pub trait Generator: Send {
    fn name(&self) -> &str;

    /// Minimum time between two successful generations.
    fn min_interval(&self) -> Option<Duration> {
        None
    }

    fn apply_stats(&mut self, _stats: &PeriodicStats) {}

    fn on_archive(&mut self, _record: &ArchiveRecord) {}

    /// `Ok(None)` means there was nothing worth publishing.
    async fn generate(
        &mut self,
        snapshot: &Snapshot,
        buffer: &SharedBuffer,
    ) -> CoreResult<Option<Artifact>>;
}

/// Rate limiter keyed on the last successful write.
#[derive(Debug, Clone, Copy)]
pub struct IntervalGate {
    min_interval: Option<Duration>,
    last_write: Option<Instant>,
}

impl IntervalGate {
    pub fn new(min_interval: Option<Duration>) -> Self {
        Self {
            min_interval,
            last_write: None,
        }
    }

    pub fn ready(&self, now: Instant) -> bool {
        match (self.min_interval, self.last_write) {
            (Some(min), Some(last)) => now.saturating_duration_since(last) >= min,
            _ => true,
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last_write = Some(now);
    }
}

/// Publishes each snapshot as plain JSON.
#[derive(Debug, Clone)]
pub struct SnapshotPublisher {
    name: String,
    file_name: String,
    min_interval: Option<Duration>,
}

impl SnapshotPublisher {
    pub fn new(name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            min_interval: None,
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = Some(min_interval);
        self
    }
}

#[async_trait]
impl Generator for SnapshotPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    async fn generate(
        &mut self,
        snapshot: &Snapshot,
        _buffer: &SharedBuffer,
    ) -> CoreResult<Option<Artifact>> {
        let body = snapshot.to_json()?;
        Ok(Some(Artifact::json(
            self.file_name.clone(),
            body,
            snapshot.date_time,
        )))
    }
}

enum Step {
    Continue,
    Stop,
}

/// The running side of a worker.
pub struct GeneratorWorker {
    name: String,
    generator: Box<dyn Generator>,
    sinks: Vec<Arc<dyn SnapshotSink>>,
    buffer: SharedBuffer,
    queue: Arc<DeliveryQueue>,
    control: mpsc::UnboundedReceiver<WorkerMessage>,
    gate: IntervalGate,
    poll_interval: Duration,
}

impl GeneratorWorker {
    pub async fn run(mut self) {
        info!(worker = %self.name, sinks = self.sinks.len(), "Worker started");
        loop {
            match AssertUnwindSafe(self.step()).catch_unwind().await {
                Ok(Step::Continue) => {}
                Ok(Step::Stop) => break,
                Err(panic) => {
                    counter!("rtd_worker_panics_total", "worker" => self.name.clone()).increment(1);
                    error!(
                        worker = %self.name,
                        panic = %panic_message(panic.as_ref()),
                        "Critical generator failure, worker exiting"
                    );
                    break;
                }
            }
        }
        self.queue.close().await;
        info!(worker = %self.name, "Worker stopped");
    }

    async fn step(&mut self) -> Step {
        loop {
            match self.control.try_recv() {
                Ok(message) => {
                    if let Step::Stop = self.handle(message).await {
                        return Step::Stop;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!(worker = %self.name, "Control channel closed");
                    return Step::Stop;
                }
            }
        }
        match self.queue.pop(self.poll_interval).await {
            Some(message) => self.handle(message).await,
            None => Step::Continue,
        }
    }

    async fn handle(&mut self, message: WorkerMessage) -> Step {
        match message {
            WorkerMessage::Loop(snapshot) => self.process(&snapshot).await,
            WorkerMessage::Archive(record) => self.generator.on_archive(&record),
            WorkerMessage::Stats(stats) => self.generator.apply_stats(&stats),
            WorkerMessage::Shutdown => {
                info!(worker = %self.name, "Shutdown requested");
                return Step::Stop;
            }
        }
        Step::Continue
    }

    async fn process(&mut self, snapshot: &Snapshot) {
        let now = Instant::now();
        if !self.gate.ready(now) {
            debug!(worker = %self.name, ts = snapshot.date_time, "Skipping snapshot inside min interval");
            return;
        }

        let artifact = match self.generator.generate(snapshot, &self.buffer).await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => return,
            Err(e) => {
                counter!("rtd_generation_failures_total", "worker" => self.name.clone()).increment(1);
                warn!(worker = %self.name, ts = snapshot.date_time, error = %e, "Generation failed");
                return;
            }
        };
        counter!("rtd_generations_total", "worker" => self.name.clone()).increment(1);

        let mut published = 0;
        for sink in &self.sinks {
            match sink.publish(&artifact).await {
                Ok(()) => published += 1,
                Err(e) => {
                    counter!("rtd_sink_failures_total", "sink" => sink.name().to_string()).increment(1);
                    warn!(
                        worker = %self.name,
                        sink = sink.name(),
                        artifact = %artifact.name,
                        error = %e,
                        "Publish failed"
                    );
                }
            }
        }
        // a write only counts once some sink has taken it
        if published > 0 || self.sinks.is_empty() {
            self.gate.mark(now);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Coordinator-side handle to a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    queue: Arc<DeliveryQueue>,
    control: mpsc::UnboundedSender<WorkerMessage>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }

    /// Put a loop snapshot or archive record on the delivery queue.
    pub async fn deliver(&self, message: WorkerMessage) -> PushOutcome {
        if !self.is_alive() {
            return PushOutcome::Closed;
        }
        self.queue.push(message).await
    }

    /// Send a stats update or shutdown request. `false` once the worker is gone.
    pub fn send_control(&self, message: WorkerMessage) -> bool {
        self.control.send(message).is_ok()
    }

    /// Control sender that can outlive a borrow of this handle.
    pub fn control_sender(&self) -> mpsc::UnboundedSender<WorkerMessage> {
        self.control.clone()
    }

    /// Wait for the worker to exit. `false` if it is still running at `timeout`.
    pub async fn join(self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(worker = %self.name, error = %e, "Worker task failed");
                true
            }
            Err(_) => false,
        }
    }
}

/// Spawn a worker for `generator` on the current runtime.
pub fn spawn_worker(
    generator: Box<dyn Generator>,
    sinks: Vec<Arc<dyn SnapshotSink>>,
    buffer: SharedBuffer,
    backlog: usize,
) -> WorkerHandle {
    spawn_worker_with_poll(generator, sinks, buffer, backlog, DEFAULT_POLL_INTERVAL)
}

pub fn spawn_worker_with_poll(
    generator: Box<dyn Generator>,
    sinks: Vec<Arc<dyn SnapshotSink>>,
    buffer: SharedBuffer,
    backlog: usize,
    poll_interval: Duration,
) -> WorkerHandle {
    let name = generator.name().to_string();
    let queue = Arc::new(DeliveryQueue::new(name.clone(), backlog));
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let worker = GeneratorWorker {
        name: name.clone(),
        gate: IntervalGate::new(generator.min_interval()),
        generator,
        sinks,
        buffer,
        queue: queue.clone(),
        control: control_rx,
        poll_interval,
    };
    let join = tokio::spawn(worker.run());
    WorkerHandle {
        name,
        queue,
        control: control_tx,
        join,
    }
}
