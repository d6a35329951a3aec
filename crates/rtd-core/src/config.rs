//! Configuration for the statistics engine.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use rtd_common::DayZone;

/// Engine configuration, passed explicitly to every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Seconds of raw samples kept for history-bearing observations.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: i64,

    /// Observations tracked by the statistics buffer.
    #[serde(default = "default_manifest")]
    pub manifest: Vec<String>,

    /// Subset of the manifest that keeps a sample history.
    #[serde(default = "default_history_manifest")]
    pub history_manifest: Vec<String>,

    /// Fields every snapshot carries.
    #[serde(default = "default_cache_manifest")]
    pub cache_manifest: Vec<String>,

    /// Cached values older than this are reported as null.
    #[serde(default = "default_max_cache_age_secs")]
    pub max_cache_age_secs: i64,

    /// Pending items kept per worker queue before the oldest are dropped.
    #[serde(default = "default_queue_backlog")]
    pub queue_backlog: usize,

    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Minutes east of UTC used for day boundaries. When unset, days follow
    /// the host zone, daylight saving included.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,

    #[serde(default = "default_windrose_period_secs")]
    pub windrose_period_secs: i64,

    #[serde(default = "default_windrose_points")]
    pub windrose_points: usize,
}

fn default_retention_secs() -> i64 {
    600
}

fn default_manifest() -> Vec<String> {
    [
        "outTemp",
        "barometer",
        "outHumidity",
        "rain",
        "rainRate",
        "humidex",
        "windchill",
        "heatindex",
        "windSpeed",
        "inTemp",
        "appTemp",
        "dewpoint",
        "windDir",
        "UV",
        "radiation",
        "wind",
        "windGust",
        "windGustDir",
        "windrun",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_history_manifest() -> Vec<String> {
    ["windSpeed", "windDir", "windGust", "wind"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_cache_manifest() -> Vec<String> {
    [
        "cloudbase",
        "windDir",
        "windrun",
        "inHumidity",
        "outHumidity",
        "barometer",
        "radiation",
        "rain",
        "rainRate",
        "windSpeed",
        "appTemp",
        "dewpoint",
        "heatindex",
        "humidex",
        "inTemp",
        "outTemp",
        "windchill",
        "UV",
        "maxSolarRad",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_cache_age_secs() -> i64 {
    600
}

fn default_queue_backlog() -> usize {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    15
}

fn default_windrose_period_secs() -> i64 {
    86_400
}

fn default_windrose_points() -> usize {
    16
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            manifest: default_manifest(),
            history_manifest: default_history_manifest(),
            cache_manifest: default_cache_manifest(),
            max_cache_age_secs: default_max_cache_age_secs(),
            queue_backlog: default_queue_backlog(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            utc_offset_minutes: None,
            windrose_period_secs: default_windrose_period_secs(),
            windrose_points: default_windrose_points(),
        }
    }
}

impl CoreConfig {
    /// Default configuration with day boundaries at UTC midnight.
    pub fn utc() -> Self {
        Self {
            utc_offset_minutes: Some(0),
            ..Self::default()
        }
    }

    /// Zone used for report-day boundaries.
    pub fn day_zone(&self) -> CoreResult<DayZone> {
        DayZone::from_minutes(self.utc_offset_minutes).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn is_history_bearing(&self, observation: &str) -> bool {
        self.history_manifest.iter().any(|o| o == observation)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CoreResult<()> {
        if self.retention_secs <= 0 {
            return Err(CoreError::Config("retention_secs must be positive".into()));
        }
        if self.max_cache_age_secs < 0 {
            return Err(CoreError::Config("max_cache_age_secs must not be negative".into()));
        }
        if self.queue_backlog == 0 {
            return Err(CoreError::Config("queue_backlog must be at least 1".into()));
        }
        if !matches!(self.windrose_points, 8 | 16) {
            return Err(CoreError::Config(format!(
                "windrose_points must be 8 or 16, got {}",
                self.windrose_points
            )));
        }
        if self.windrose_period_secs <= 0 {
            return Err(CoreError::Config("windrose_period_secs must be positive".into()));
        }
        if let Some(missing) = self
            .history_manifest
            .iter()
            .find(|o| !self.manifest.contains(o))
        {
            return Err(CoreError::Config(format!(
                "history observation {} is not in the manifest",
                missing
            )));
        }
        self.day_zone()?;
        Ok(())
    }
}
