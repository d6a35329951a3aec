//! Last-known-good value cache used to complete partial packets.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use rtd_common::packet::{is_metadata, Observations};
use rtd_common::{
    ArchiveRecord, LoopPacket, Snapshot, StandardUnits, Timestamp, UnitConversion, UnitSystem,
};

use crate::config::CoreConfig;
use crate::error::CoreResult;

/// A cached observation and the packet time it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CachedValue {
    pub value: f64,
    pub timestamp: Timestamp,
}

/// Field cache that never resets; staleness is judged at read time.
pub struct PacketCache {
    manifest: Vec<String>,
    units: Arc<dyn UnitConversion>,
    unit_system: Option<UnitSystem>,
    entries: BTreeMap<String, CachedValue>,
}

impl std::fmt::Debug for PacketCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCache")
            .field("unit_system", &self.unit_system)
            .field("entries", &self.entries)
            .finish()
    }
}

impl PacketCache {
    pub fn new(config: &CoreConfig) -> Self {
        Self::with_manifest(config.cache_manifest.clone())
    }

    pub fn with_manifest(manifest: Vec<String>) -> Self {
        Self {
            manifest,
            units: Arc::new(StandardUnits),
            unit_system: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn with_units(mut self, units: Arc<dyn UnitConversion>) -> Self {
        self.units = units;
        self
    }

    /// Cache every non-null field of `packet` as seen at `timestamp`.
    ///
    /// Nulls never displace a cached value.
    pub fn update(&mut self, packet: &LoopPacket, timestamp: Timestamp) -> CoreResult<()> {
        let system = *self.unit_system.get_or_insert(packet.unit_system);
        let packet = packet.to_unit_system(system, self.units.as_ref())?;
        for (name, value) in packet.observations {
            if is_metadata(&name) {
                continue;
            }
            if let Some(value) = value {
                self.entries.insert(name, CachedValue { value, timestamp });
            }
        }
        Ok(())
    }

    /// Start from a historical record so early snapshots are not all null.
    pub fn prime(&mut self, record: &ArchiveRecord) -> CoreResult<()> {
        self.update(&record.as_loop_packet(), record.date_time)?;
        debug!(ts = record.date_time, fields = self.entries.len(), "Primed packet cache");
        Ok(())
    }

    /// Cached value if it is no older than `max_age` at `as_of`.
    pub fn get_value(&self, observation: &str, as_of: Timestamp, max_age: i64) -> Option<f64> {
        self.entries
            .get(observation)
            .filter(|cached| as_of - cached.timestamp <= max_age)
            .map(|cached| cached.value)
    }

    pub fn get(&self, observation: &str) -> Option<CachedValue> {
        self.entries.get(observation).copied()
    }

    /// Field-complete packet over the manifest. Stale or unseen fields are null.
    pub fn get_snapshot(&self, as_of: Timestamp, max_age: i64) -> Snapshot {
        let observations: Observations = self
            .manifest
            .iter()
            .map(|name| (name.clone(), self.get_value(name, as_of, max_age)))
            .collect();
        Snapshot {
            date_time: as_of,
            unit_system: self.unit_system,
            observations,
        }
    }

    pub fn unit_system(&self) -> Option<UnitSystem> {
        self.unit_system
    }
}
