//! Packet fan-out between the host loop and the generator workers.
//!
//! The coordinator is the single writer of the statistics buffer and the
//! packet cache. Packets are applied in arrival order; each one becomes a
//! field-complete snapshot on every live worker's delivery queue.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use rtd_common::{ArchiveRecord, DayZone, LoopPacket, Snapshot, Timestamp};

use crate::aggregates::{compute_periodic_stats, PeriodicStats};
use crate::archive::ArchiveStore;
use crate::buffer::{SharedBuffer, StatisticsBuffer};
use crate::cache::PacketCache;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::queue::{PushOutcome, WorkerMessage};
use crate::sink::SnapshotSink;
use crate::worker::{spawn_worker, Generator, WorkerHandle};

/// A generator and the sinks its artifacts go to.
pub struct WorkerSpec {
    pub generator: Box<dyn Generator>,
    pub sinks: Vec<Arc<dyn SnapshotSink>>,
}

impl WorkerSpec {
    pub fn new(generator: Box<dyn Generator>, sinks: Vec<Arc<dyn SnapshotSink>>) -> Self {
        Self { generator, sinks }
    }
}

/// Input accepted by [`SnapshotCoordinator::run`].
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    Packet(LoopPacket),
    Archive(ArchiveRecord),
}

pub struct SnapshotCoordinator {
    config: CoreConfig,
    zone: DayZone,
    buffer: SharedBuffer,
    cache: Arc<RwLock<PacketCache>>,
    archive: Arc<dyn ArchiveStore>,
    stats: Arc<RwLock<Option<PeriodicStats>>>,
    workers: Vec<WorkerHandle>,
    refresh: Option<JoinHandle<()>>,
}

impl SnapshotCoordinator {
    /// Seed state from the archive and spawn one worker per spec.
    ///
    /// An archive that cannot produce today's summary is fatal. A missing
    /// latest record or failed aggregate query only costs a warning.
    pub async fn start(
        config: CoreConfig,
        archive: Arc<dyn ArchiveStore>,
        specs: Vec<WorkerSpec>,
        now: Timestamp,
    ) -> CoreResult<Self> {
        config.validate()?;
        if specs.is_empty() {
            return Err(CoreError::Config("at least one generator is required".into()));
        }
        let zone = config.day_zone()?;

        let mut buffer = StatisticsBuffer::new(&config, now)?;
        let today = buffer.active_day_span();
        match archive.daily_summary(today).await {
            Ok(Some(summary)) => buffer.seed(&summary)?,
            Ok(None) => debug!(day = %today, "No archive data for today"),
            Err(e) => return Err(CoreError::ArchiveUnavailable(e.to_string())),
        }

        let mut cache = PacketCache::new(&config);
        match archive.latest_record().await {
            Ok(Some(record)) => cache.prime(&record)?,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not prime packet cache"),
        }

        let stats = match compute_periodic_stats(archive.as_ref(), &config, zone, now).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Initial periodic stats unavailable");
                None
            }
        };

        let buffer = SharedBuffer::new(buffer);
        let workers: Vec<WorkerHandle> = specs
            .into_iter()
            .map(|spec| spawn_worker(spec.generator, spec.sinks, buffer.clone(), config.queue_backlog))
            .collect();
        if let Some(stats) = &stats {
            for worker in &workers {
                worker.send_control(WorkerMessage::Stats(stats.clone()));
            }
        }
        info!(
            workers = workers.len(),
            day = %today,
            "Snapshot coordinator started"
        );

        Ok(Self {
            config,
            zone,
            buffer,
            cache: Arc::new(RwLock::new(cache)),
            archive,
            stats: Arc::new(RwLock::new(stats)),
            workers,
            refresh: None,
        })
    }

    /// Apply one loop packet and fan its snapshot out.
    ///
    /// A bad packet is logged and dropped. The only error returned is
    /// [`CoreError::NoLiveWorkers`].
    pub async fn on_packet(&mut self, packet: LoopPacket) -> CoreResult<()> {
        let ts = packet.date_time;
        if let Err(e) = self.ingest(&packet).await {
            counter!("rtd_packets_dropped_total").increment(1);
            if !e.is_transient() {
                return Err(e);
            }
            warn!(ts, error = %e, "Dropping packet");
            return Ok(());
        }
        counter!("rtd_packets_processed_total").increment(1);

        let snapshot = self.get_snapshot(ts).await;
        self.dispatch(WorkerMessage::Loop(snapshot)).await
    }

    async fn ingest(&self, packet: &LoopPacket) -> CoreResult<()> {
        self.buffer.add_packet(packet).await?;
        self.cache.write().await.update(packet, packet.date_time)
    }

    /// Forward a new archive record and start refreshing the periodic
    /// aggregates. Packets keep flowing while the archive queries run.
    pub async fn on_archive_boundary(&mut self, record: ArchiveRecord) -> CoreResult<()> {
        if let Err(e) = record.validate() {
            warn!(ts = record.date_time, error = %e, "Ignoring invalid archive record");
            return Ok(());
        }
        let ts = record.date_time;
        self.dispatch(WorkerMessage::Archive(record)).await?;
        self.refresh_stats(ts);
        Ok(())
    }

    /// Recompute the periodic aggregates on a separate task. A refresh still
    /// running for an earlier boundary is superseded.
    fn refresh_stats(&mut self, ts: Timestamp) {
        if let Some(previous) = self.refresh.take() {
            previous.abort();
        }
        let archive = self.archive.clone();
        let config = self.config.clone();
        let zone = self.zone;
        let stats = self.stats.clone();
        let controls: Vec<_> = self.workers.iter().map(WorkerHandle::control_sender).collect();

        self.refresh = Some(tokio::spawn(async move {
            match compute_periodic_stats(archive.as_ref(), &config, zone, ts).await {
                Ok(fresh) => {
                    *stats.write().await = Some(fresh.clone());
                    for control in &controls {
                        control.send(WorkerMessage::Stats(fresh.clone())).ok();
                    }
                    debug!(ts, "Periodic stats refreshed");
                }
                Err(e) => warn!(ts, error = %e, "Periodic stats not refreshed"),
            }
        }));
    }

    async fn dispatch(&self, message: WorkerMessage) -> CoreResult<()> {
        let mut delivered = 0;
        for worker in &self.workers {
            match worker.deliver(message.clone()).await {
                PushOutcome::Queued { .. } => delivered += 1,
                PushOutcome::Closed => debug!(worker = worker.name(), "Worker no longer running"),
            }
        }
        if delivered == 0 {
            error!(kind = message.kind(), "No live worker left");
            return Err(CoreError::NoLiveWorkers);
        }
        Ok(())
    }

    /// Snapshot of the cache as of `as_of`.
    pub async fn get_snapshot(&self, as_of: Timestamp) -> Snapshot {
        self.cache
            .read()
            .await
            .get_snapshot(as_of, self.config.max_cache_age_secs)
    }

    pub fn buffer(&self) -> SharedBuffer {
        self.buffer.clone()
    }

    pub async fn latest_stats(&self) -> Option<PeriodicStats> {
        self.stats.read().await.clone()
    }

    pub fn live_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_alive()).count()
    }

    /// Handle for producers plus the receiver to pass to [`run`](Self::run).
    pub fn event_channel(&self, capacity: usize) -> (CoordinatorHandle, mpsc::Receiver<CoordinatorEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = CoordinatorHandle {
            events: tx,
            buffer: self.buffer.clone(),
            cache: self.cache.clone(),
            stats: self.stats.clone(),
            max_cache_age: self.config.max_cache_age_secs,
        };
        (handle, rx)
    }

    /// Process events until the channel closes, a shutdown signal arrives,
    /// or a fatal error occurs. Workers are shut down on every exit path.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<CoordinatorEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> CoreResult<()> {
        let mut result = Ok(());
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Coordinator received shutdown signal");
                    break;
                }
                event = events.recv() => {
                    let outcome = match event {
                        Some(CoordinatorEvent::Packet(packet)) => self.on_packet(packet).await,
                        Some(CoordinatorEvent::Archive(record)) => self.on_archive_boundary(record).await,
                        None => {
                            debug!("Event channel closed");
                            break;
                        }
                    };
                    if let Err(e) = outcome {
                        error!(error = %e, "Coordinator stopping on fatal error");
                        result = Err(e);
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
        result
    }

    /// Ask every worker to stop and wait for each up to the shutdown timeout.
    pub async fn shutdown(self) {
        if let Some(refresh) = &self.refresh {
            refresh.abort();
        }
        info!(workers = self.workers.len(), "Shutting down workers");
        for worker in &self.workers {
            worker.send_control(WorkerMessage::Shutdown);
        }
        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        for worker in self.workers {
            let name = worker.name().to_string();
            if !worker.join(timeout).await {
                error!(worker = %name, timeout_secs = timeout.as_secs(), "Unable to shut down worker");
            }
        }
    }
}

/// Cloneable producer side of a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    events: mpsc::Sender<CoordinatorEvent>,
    buffer: SharedBuffer,
    cache: Arc<RwLock<PacketCache>>,
    stats: Arc<RwLock<Option<PeriodicStats>>>,
    max_cache_age: i64,
}

impl CoordinatorHandle {
    pub async fn submit_packet(&self, packet: LoopPacket) -> CoreResult<()> {
        self.events
            .send(CoordinatorEvent::Packet(packet))
            .await
            .map_err(|_| CoreError::CoordinatorStopped)
    }

    pub async fn submit_archive(&self, record: ArchiveRecord) -> CoreResult<()> {
        self.events
            .send(CoordinatorEvent::Archive(record))
            .await
            .map_err(|_| CoreError::CoordinatorStopped)
    }

    pub async fn get_snapshot(&self, as_of: Timestamp) -> Snapshot {
        self.cache.read().await.get_snapshot(as_of, self.max_cache_age)
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub async fn latest_stats(&self) -> Option<PeriodicStats> {
        self.stats.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }
}
