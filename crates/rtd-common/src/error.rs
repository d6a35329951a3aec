//! Error types for realtime data processing.

use thiserror::Error;

use crate::units::Unit;

/// Result type alias using RtdError.
pub type RtdResult<T> = Result<T, RtdError>;

/// Primary error type for packet and unit handling.
#[derive(Debug, Error)]
pub enum RtdError {
    // === Unit Errors ===
    #[error("Unknown unit system code: {0}")]
    UnknownUnitSystem(i64),

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Cannot convert {from:?} to {to:?}")]
    IncompatibleUnits { from: Unit, to: Unit },

    // === Packet Errors ===
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),
}

impl From<serde_json::Error> for RtdError {
    fn from(err: serde_json::Error) -> Self {
        RtdError::InvalidPacket(format!("JSON error: {}", err))
    }
}
