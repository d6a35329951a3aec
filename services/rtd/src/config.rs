//! Service configuration.
//!
//! Loaded from a single YAML file; every section is optional and falls back
//! to the defaults below.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rtd_common::{Unit, UnitGroup, UnitSystem};
use rtd_core::CoreConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Root configuration for the `rtd` service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub engine: CoreConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_generators")]
    pub generators: Vec<GeneratorConfig>,
}

/// Location of the WeeWX-style SQLite archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from("data/weewx.sdb")
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Events buffered between the HTTP handlers and the coordinator.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_listen() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_event_capacity() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// What a generator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    /// Field-map driven gauge data document.
    #[default]
    GaugeData,
    /// The raw snapshot as JSON.
    Snapshot,
}

/// Which input carries a station's sensor contact state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactSource {
    Loop,
    Archive,
}

/// A field whose value signals lost sensor contact. A missing field counts
/// as lost too.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactCheck {
    pub source: ContactSource,
    pub field: &'static str,
    pub lost_value: f64,
}

impl ContactCheck {
    /// Stations known to report contact state. Others never report it lost.
    pub fn for_station(station_type: &str) -> Option<Self> {
        match station_type {
            "FineOffsetUSB" => Some(Self {
                source: ContactSource::Loop,
                field: "status",
                lost_value: 64.0,
            }),
            "Vantage" => Some(Self {
                source: ContactSource::Archive,
                field: "rxCheckPercent",
                lost_value: 0.0,
            }),
            _ => None,
        }
    }

    pub fn is_lost(&self, value: Option<f64>) -> bool {
        match value {
            Some(v) => v == self.lost_value,
            None => true,
        }
    }
}

/// One generator worker and its sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: GeneratorKind,

    /// Minimum seconds between two generations. Every packet when unset.
    #[serde(default)]
    pub min_interval_secs: Option<u64>,

    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    #[serde(default)]
    pub groups: OutputGroups,

    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Emit month-to-date rain as `mrfall`.
    #[serde(default)]
    pub mtd_rain: bool,

    /// Emit year-to-date rain as `yrfall`.
    #[serde(default)]
    pub ytd_rain: bool,

    /// Replaces the built-in field map when set.
    #[serde(default)]
    pub field_map: Option<BTreeMap<String, FieldSpec>>,

    /// Added on top of the field map, overriding same-named fields.
    #[serde(default)]
    pub field_map_extensions: BTreeMap<String, FieldSpec>,

    /// Station driver name, e.g. `Vantage`. Decides how lost sensor contact
    /// is detected.
    #[serde(default)]
    pub station_type: Option<String>,

    /// Always report sensor contact as good.
    #[serde(default)]
    pub ignore_lost_contact: bool,

    #[serde(default)]
    pub http_post: Option<HttpPostConfig>,

    #[serde(default)]
    pub rsync: Option<RsyncConfig>,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("public_html/gauge-data.txt")
}

fn default_date_format() -> String {
    "%Y-%m-%d %H:%M".to_string()
}

impl GeneratorConfig {
    pub fn gauge_data(name: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: GeneratorKind::GaugeData,
            min_interval_secs: None,
            output_path: output_path.into(),
            groups: OutputGroups::default(),
            date_format: default_date_format(),
            mtd_rain: false,
            ytd_rain: false,
            field_map: None,
            field_map_extensions: BTreeMap::new(),
            station_type: None,
            ignore_lost_contact: false,
            http_post: None,
            rsync: None,
        }
    }

    /// Effective field map: the configured or built-in map plus extensions.
    pub fn effective_field_map(&self) -> BTreeMap<String, FieldSpec> {
        let mut map = self.field_map.clone().unwrap_or_else(default_field_map);
        map.extend(self.field_map_extensions.clone());
        map
    }

    /// How this generator's station reports lost sensor contact, if at all.
    pub fn contact_check(&self) -> Option<ContactCheck> {
        if self.ignore_lost_contact {
            return None;
        }
        ContactCheck::for_station(self.station_type.as_deref()?)
    }

    /// File name the generated artifact is published under.
    pub fn file_name(&self) -> String {
        self.output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.json", self.name))
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("generator name must not be empty");
        }
        if self.output_path.file_name().is_none() {
            bail!(
                "generator {}: output_path {} has no file name",
                self.name,
                self.output_path.display()
            );
        }
        for (field, spec) in self.effective_field_map() {
            spec.validate()
                .with_context(|| format!("generator {}: field {}", self.name, field))?;
        }
        if let Some(http) = &self.http_post {
            if http.url.is_empty() {
                bail!("generator {}: http_post.url must not be empty", self.name);
            }
        }
        if let Some(rsync) = &self.rsync {
            if rsync.server.is_empty() || rsync.remote_dir.is_empty() {
                bail!("generator {}: rsync needs server and remote_dir", self.name);
            }
        }
        Ok(())
    }
}

fn default_generators() -> Vec<GeneratorConfig> {
    vec![GeneratorConfig::gauge_data("gauge-data", default_output_path())]
}

/// Output units per unit group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputGroups {
    #[serde(default = "default_temperature")]
    pub temperature: Unit,
    #[serde(default = "default_pressure")]
    pub pressure: Unit,
    #[serde(default = "default_speed")]
    pub speed: Unit,
    #[serde(default = "default_rain")]
    pub rain: Unit,
    #[serde(default = "default_altitude")]
    pub altitude: Unit,
}

fn default_temperature() -> Unit {
    Unit::DegreeC
}

fn default_pressure() -> Unit {
    Unit::HPa
}

fn default_speed() -> Unit {
    Unit::KmPerHour
}

fn default_rain() -> Unit {
    Unit::Mm
}

fn default_altitude() -> Unit {
    Unit::Meter
}

impl Default for OutputGroups {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            pressure: default_pressure(),
            speed: default_speed(),
            rain: default_rain(),
            altitude: default_altitude(),
        }
    }
}

impl OutputGroups {
    /// Gauges derive windrun from the speed unit and know nothing of knots
    /// or centimetres.
    pub fn normalized(mut self) -> Self {
        if self.speed == Unit::Knot {
            self.speed = Unit::MilePerHour;
        }
        if self.rain == Unit::Cm {
            self.rain = Unit::Mm;
        }
        self
    }

    pub fn distance(&self) -> Unit {
        if self.speed == Unit::MilePerHour {
            Unit::Mile
        } else {
            Unit::Km
        }
    }

    pub fn rain_rate(&self) -> Unit {
        match self.rain {
            Unit::Inch => Unit::InchPerHour,
            Unit::Cm => Unit::CmPerHour,
            _ => Unit::MmPerHour,
        }
    }

    /// Output unit for a unit group.
    pub fn unit_for(&self, group: UnitGroup) -> Unit {
        match group {
            UnitGroup::Temperature => self.temperature,
            UnitGroup::Pressure => self.pressure,
            UnitGroup::Speed => self.speed,
            UnitGroup::Distance => self.distance(),
            UnitGroup::Rain => self.rain,
            UnitGroup::RainRate => self.rain_rate(),
            UnitGroup::Altitude => self.altitude,
            // the remaining groups have a single unit in every system
            other => UnitSystem::Us.unit_for(other),
        }
    }

    fn validate(&self) -> Result<()> {
        let checks = [
            (self.temperature, UnitGroup::Temperature),
            (self.pressure, UnitGroup::Pressure),
            (self.speed, UnitGroup::Speed),
            (self.rain, UnitGroup::Rain),
            (self.altitude, UnitGroup::Altitude),
        ];
        for (unit, group) in checks {
            if !unit.measures(group) {
                bail!("unit {} cannot be used for {:?}", unit, group);
            }
        }
        Ok(())
    }
}

/// How a field-map entry derives its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Min,
    Max,
    Last,
    Sum,
    Mintime,
    Maxtime,
    Lasttime,
    /// Direction of the day's strongest vector sample.
    #[serde(rename = "max_dir")]
    MaxDir,
    /// Change over `period_secs` against the archive.
    Trend,
}

impl Aggregate {
    pub fn is_time(self) -> bool {
        matches!(self, Aggregate::Mintime | Aggregate::Maxtime | Aggregate::Lasttime)
    }
}

/// One output field of the gauge data document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub source: String,

    /// Current value from the snapshot when unset, else a day aggregate or
    /// a trend.
    #[serde(default)]
    pub aggregate: Option<Aggregate>,

    /// Trend look-back.
    #[serde(default = "default_trend_period")]
    pub period_secs: i64,

    /// Trend tolerance when matching an archive record.
    #[serde(default = "default_grace")]
    pub grace_secs: i64,

    /// Value used when the source has no value, in output units.
    #[serde(default)]
    pub default: f64,

    #[serde(default = "default_decimals")]
    pub decimals: usize,

    /// strftime pattern for time aggregates.
    #[serde(default = "default_time_format")]
    pub time_format: String,

    /// Overrides the unit group derived from `source`.
    #[serde(default)]
    pub group: Option<UnitGroup>,
}

fn default_trend_period() -> i64 {
    3600
}

fn default_grace() -> i64 {
    300
}

fn default_decimals() -> usize {
    1
}

fn default_time_format() -> String {
    "%H:%M".to_string()
}

impl FieldSpec {
    pub fn new(source: impl Into<String>, aggregate: Option<Aggregate>) -> Self {
        Self {
            source: source.into(),
            aggregate,
            period_secs: default_trend_period(),
            grace_secs: default_grace(),
            default: 0.0,
            decimals: default_decimals(),
            time_format: default_time_format(),
            group: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            bail!("source must not be empty");
        }
        if self.aggregate == Some(Aggregate::Trend) && self.period_secs <= 0 {
            bail!("trend period must be positive");
        }
        if self.grace_secs < 0 {
            bail!("grace must not be negative");
        }
        Ok(())
    }
}

/// Built-in gauge field map.
pub fn default_field_map() -> BTreeMap<String, FieldSpec> {
    use Aggregate::*;
    const FIELDS: &[(&str, &str, Option<Aggregate>)] = &[
        ("temp", "outTemp", None),
        ("tempTL", "outTemp", Some(Min)),
        ("tempTH", "outTemp", Some(Max)),
        ("TtempTL", "outTemp", Some(Mintime)),
        ("TtempTH", "outTemp", Some(Maxtime)),
        ("temptrend", "outTemp", Some(Trend)),
        ("intemp", "inTemp", None),
        ("intempTL", "inTemp", Some(Min)),
        ("intempTH", "inTemp", Some(Max)),
        ("TintempTL", "inTemp", Some(Mintime)),
        ("TintempTH", "inTemp", Some(Maxtime)),
        ("hum", "outHumidity", None),
        ("humTL", "outHumidity", Some(Min)),
        ("humTH", "outHumidity", Some(Max)),
        ("ThumTL", "outHumidity", Some(Mintime)),
        ("ThumTH", "outHumidity", Some(Maxtime)),
        ("inhum", "inHumidity", None),
        ("dew", "dewpoint", None),
        ("dewpointTL", "dewpoint", Some(Min)),
        ("dewpointTH", "dewpoint", Some(Max)),
        ("TdewpointTL", "dewpoint", Some(Mintime)),
        ("TdewpointTH", "dewpoint", Some(Maxtime)),
        ("wchill", "windchill", None),
        ("wchillTL", "windchill", Some(Min)),
        ("TwchillTL", "windchill", Some(Mintime)),
        ("heatindex", "heatindex", None),
        ("heatindexTH", "heatindex", Some(Max)),
        ("TheatindexTH", "heatindex", Some(Maxtime)),
        ("humidex", "humidex", None),
        ("apptemp", "appTemp", None),
        ("apptempTL", "appTemp", Some(Min)),
        ("apptempTH", "appTemp", Some(Max)),
        ("TapptempTL", "appTemp", Some(Mintime)),
        ("TapptempTH", "appTemp", Some(Maxtime)),
        ("press", "barometer", None),
        ("pressTL", "barometer", Some(Min)),
        ("pressTH", "barometer", Some(Max)),
        ("TpressTL", "barometer", Some(Mintime)),
        ("TpressTH", "barometer", Some(Maxtime)),
        ("presstrendval", "barometer", Some(Trend)),
        ("rfall", "rain", Some(Sum)),
        ("rrate", "rainRate", None),
        ("rrateTM", "rainRate", Some(Max)),
        ("TrrateTM", "rainRate", Some(Maxtime)),
        ("wlatest", "windSpeed", None),
        ("windTM", "windSpeed", Some(Max)),
        ("wgustTM", "windGust", Some(Max)),
        ("TwgustTM", "windGust", Some(Maxtime)),
        ("bearingTM", "wind", Some(MaxDir)),
        ("windrun", "windrun", Some(Sum)),
        ("UV", "UV", None),
        ("UVTH", "UV", Some(Max)),
        ("SolarRad", "radiation", None),
        ("SolarTM", "radiation", Some(Max)),
        ("CurrentSolarMax", "maxSolarRad", None),
        ("cloudbasevalue", "cloudbase", None),
    ];

    FIELDS
        .iter()
        .map(|(name, source, aggregate)| {
            let mut spec = FieldSpec::new(*source, *aggregate);
            if matches!(*source, "radiation" | "maxSolarRad" | "UV") {
                spec.decimals = 0;
            }
            (name.to_string(), spec)
        })
        .collect()
}

impl ServiceConfig {
    /// Load and validate a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        info!(
            path = %path.display(),
            generators = config.generators.len(),
            "Loaded service configuration"
        );
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: ServiceConfig = serde_yaml::from_str(content)?;
        config.cache_contact_fields();
        config.validate()?;
        Ok(config)
    }

    /// Loop-reported contact fields must reach the snapshots, so they join
    /// the cache manifest.
    pub fn cache_contact_fields(&mut self) {
        for generator in &self.generators {
            let Some(check) = generator.contact_check() else {
                continue;
            };
            if check.source == ContactSource::Loop
                && !self.engine.cache_manifest.iter().any(|f| f == check.field)
            {
                debug!(generator = %generator.name, field = check.field, "Caching contact field");
                self.engine.cache_manifest.push(check.field.to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate().context("Invalid engine configuration")?;
        if self.generators.is_empty() {
            bail!("at least one generator must be configured");
        }
        let mut seen = std::collections::BTreeSet::new();
        for generator in &self.generators {
            if !seen.insert(generator.name.as_str()) {
                bail!("duplicate generator name {}", generator.name);
            }
            generator.groups.validate()?;
            generator.validate()?;
            debug!(generator = %generator.name, kind = ?generator.kind, "Validated generator");
        }
        if self.server.event_capacity == 0 {
            bail!("server.event_capacity must be at least 1");
        }
        Ok(())
    }
}

/// Optional HTTP POST export of the generated document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpPostConfig {
    pub url: String,
    #[serde(default = "default_post_timeout")]
    pub timeout_secs: u64,
    /// Text the server must answer with for the post to count as accepted.
    #[serde(default)]
    pub response_text: Option<String>,
}

fn default_post_timeout() -> u64 {
    2
}

/// Optional rsync export of the written file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsyncConfig {
    pub server: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    pub remote_dir: String,
    #[serde(default = "default_ssh_options")]
    pub ssh_options: String,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub log_success: bool,
    /// Passed to rsync as `--timeout`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Skip uploads for packets older than this. Zero disables the check.
    #[serde(default = "default_skip_if_older_than")]
    pub skip_if_older_than_secs: i64,
}

fn default_ssh_options() -> String {
    "-o ConnectTimeout=1".to_string()
}

fn default_skip_if_older_than() -> i64 {
    4
}
