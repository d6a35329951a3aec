//! Realtime statistics engine for weather loop packets.
//!
//! Maintains per-day rolling statistics, a last-known-good packet cache and
//! archive-derived aggregates, and fans field-complete snapshots out to
//! independent generator workers.

pub mod accumulator;
pub mod aggregates;
pub mod archive;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod sink;
pub mod worker;

pub use accumulator::{Accumulator, AccumulatorKind, ObservationStats, Sample};
pub use aggregates::{calc_trend, calc_windrose, compute_periodic_stats, PeriodicStats};
pub use archive::{ArchiveStore, Bucketing, DailySummary, MemoryArchive, ObservationSummary, Reducer};
pub use buffer::{SharedBuffer, StatisticsBuffer};
pub use cache::{CachedValue, PacketCache};
pub use config::CoreConfig;
pub use coordinator::{CoordinatorEvent, CoordinatorHandle, SnapshotCoordinator, WorkerSpec};
pub use error::{CoreError, CoreResult};
pub use queue::{DeliveryQueue, PushOutcome, WorkerMessage};
pub use sink::{Artifact, MemorySink, SnapshotSink};
pub use worker::{spawn_worker, Generator, IntervalGate, SnapshotPublisher, WorkerHandle};
