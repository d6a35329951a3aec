//! Error types for the statistics engine and its workers.

use rtd_common::{RtdError, Timestamp};
use thiserror::Error;

/// Result type alias using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the buffer, cache, archive adapters and workers.
#[derive(Debug, Error)]
pub enum CoreError {
    // === Packet Errors ===
    #[error(transparent)]
    Packet(#[from] RtdError),

    #[error("Packet at {ts} precedes the active day starting {day_start}")]
    StalePacket { ts: Timestamp, day_start: Timestamp },

    // === Archive Errors ===
    #[error("Archive unavailable: {0}")]
    ArchiveUnavailable(String),

    #[error("Archive query failed: {0}")]
    ArchiveQuery(String),

    // === Worker Errors ===
    #[error("Generator {generator} failed: {message}")]
    Generation { generator: String, message: String },

    #[error("Sink {sink} failed: {message}")]
    Sink { sink: String, message: String },

    #[error("No live worker left to receive output")]
    NoLiveWorkers,

    #[error("Coordinator is not running")]
    CoordinatorStopped,

    // === Configuration Errors ===
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    /// Transient errors cost one packet or one generation; the loop carries on.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Packet(_)
                | CoreError::StalePacket { .. }
                | CoreError::ArchiveQuery(_)
                | CoreError::Generation { .. }
                | CoreError::Sink { .. }
        )
    }

    pub fn generation(generator: impl Into<String>, message: impl ToString) -> Self {
        CoreError::Generation {
            generator: generator.into(),
            message: message.to_string(),
        }
    }

    pub fn sink(sink: impl Into<String>, message: impl ToString) -> Self {
        CoreError::Sink {
            sink: sink.into(),
            message: message.to_string(),
        }
    }
}
