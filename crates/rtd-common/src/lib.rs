//! Common types and utilities shared across the realtime data crates.

pub mod error;
pub mod packet;
pub mod time;
pub mod units;

pub use error::{RtdError, RtdResult};
pub use packet::{ArchiveRecord, LoopPacket, Snapshot, Timestamp};
pub use time::{DayZone, TimeSpan};
pub use units::{
    degree_to_compass, StandardUnits, Unit, UnitConversion, UnitGroup, UnitSystem, UnitValue,
    VectorValue,
};
