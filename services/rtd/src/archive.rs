//! WeeWX-compatible SQLite archive using sqlx.
//!
//! One wide `archive` table keyed by `dateTime`, one REAL column per
//! observation. Columns for observations not seen before are added on
//! insert.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use rtd_common::packet::is_metadata;
use rtd_common::{ArchiveRecord, StandardUnits, Timestamp, TimeSpan, Unit, UnitGroup, UnitSystem, UnitValue};
use rtd_core::archive::archive_value;
use rtd_core::{ArchiveStore, Bucketing, CoreError, CoreResult, DailySummary, Reducer};

/// Observation columns every new archive starts with.
const BASE_COLUMNS: &[&str] = &[
    "barometer",
    "pressure",
    "altimeter",
    "inTemp",
    "outTemp",
    "inHumidity",
    "outHumidity",
    "windSpeed",
    "windDir",
    "windGust",
    "windGustDir",
    "rainRate",
    "rain",
    "dewpoint",
    "windchill",
    "heatindex",
    "humidex",
    "appTemp",
    "cloudbase",
    "windrun",
    "radiation",
    "maxSolarRad",
    "UV",
];

/// Archive period assumed for records that do not state one.
const DEFAULT_INTERVAL_MINUTES: i64 = 5;

fn query_error(e: sqlx::Error) -> CoreError {
    CoreError::ArchiveQuery(e.to_string())
}

fn unavailable(e: sqlx::Error) -> CoreError {
    CoreError::ArchiveUnavailable(e.to_string())
}

/// Observation names become column names, so only plain identifiers pass.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Archive records stored in SQLite.
pub struct SqliteArchive {
    pool: SqlitePool,
    /// Lowercased, as SQLite compares column names without case.
    columns: RwLock<BTreeSet<String>>,
}

impl SqliteArchive {
    /// Open or create the archive database at the given path.
    pub async fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::ArchiveUnavailable(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        let archive = Self::from_pool(pool).await?;
        info!(path = %path.display(), "Opened weather archive");
        Ok(archive)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> CoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        // a single connection that never recycles, or the database goes with it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> CoreResult<Self> {
        let observation_columns: Vec<String> = BASE_COLUMNS
            .iter()
            .map(|c| format!("\"{}\" REAL", c))
            .collect();
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS archive (
                "dateTime" INTEGER NOT NULL UNIQUE PRIMARY KEY,
                "usUnits" INTEGER NOT NULL,
                "interval" INTEGER NOT NULL,
                {}
            )
            "#,
            observation_columns.join(",\n                ")
        );
        sqlx::query(&create).execute(&pool).await.map_err(unavailable)?;

        let rows = sqlx::query("PRAGMA table_info(archive)")
            .fetch_all(&pool)
            .await
            .map_err(unavailable)?;
        let mut columns = BTreeSet::new();
        for row in rows {
            let name: String = row.try_get("name").map_err(unavailable)?;
            if !is_metadata(&name) {
                columns.insert(name.to_lowercase());
            }
        }
        debug!(columns = columns.len(), "Discovered archive columns");

        Ok(Self {
            pool,
            columns: RwLock::new(columns),
        })
    }

    pub async fn count(&self) -> CoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM archive")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;
        row.try_get(0).map_err(query_error)
    }

    async fn has_column(&self, name: &str) -> bool {
        self.columns.read().await.contains(&name.to_lowercase())
    }

    /// Unit system of the archive, taken from its oldest record.
    async fn unit_system(&self) -> CoreResult<Option<UnitSystem>> {
        let row = sqlx::query(r#"SELECT "usUnits" FROM archive ORDER BY "dateTime" LIMIT 1"#)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        match row {
            Some(row) => {
                let code: i64 = row.try_get(0).map_err(query_error)?;
                Ok(Some(UnitSystem::from_code(code)?))
            }
            None => Ok(None),
        }
    }

    async fn records_in(&self, span: TimeSpan) -> CoreResult<Vec<ArchiveRecord>> {
        let rows = sqlx::query(
            r#"SELECT * FROM archive WHERE "dateTime" > ? AND "dateTime" <= ? ORDER BY "dateTime""#,
        )
        .bind(span.start)
        .bind(span.stop)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn add_missing_columns(&self, record: &ArchiveRecord) -> CoreResult<()> {
        let needed: Vec<&str> = record
            .observations
            .keys()
            .map(String::as_str)
            .filter(|name| is_identifier(name))
            .collect();
        {
            let columns = self.columns.read().await;
            if needed.iter().all(|n| columns.contains(&n.to_lowercase())) {
                return Ok(());
            }
        }
        let mut columns = self.columns.write().await;
        for name in needed {
            let key = name.to_lowercase();
            if columns.contains(&key) {
                continue;
            }
            sqlx::query(&format!("ALTER TABLE archive ADD COLUMN \"{}\" REAL", name))
                .execute(&self.pool)
                .await
                .map_err(query_error)?;
            info!(column = name, "Added archive column");
            columns.insert(key);
        }
        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> CoreResult<ArchiveRecord> {
    let ts: i64 = row.try_get("dateTime").map_err(query_error)?;
    let code: i64 = row.try_get("usUnits").map_err(query_error)?;
    let interval: Option<i64> = row.try_get("interval").map_err(query_error)?;

    let mut record = ArchiveRecord::new(ts, UnitSystem::from_code(code)?);
    record.interval = interval;
    for column in row.columns() {
        if is_metadata(column.name()) {
            continue;
        }
        let value: Option<f64> = row.try_get(column.ordinal()).map_err(query_error)?;
        record.observations.insert(column.name().to_string(), value);
    }
    Ok(record)
}

#[async_trait]
impl ArchiveStore for SqliteArchive {
    async fn daily_summary(&self, day: TimeSpan) -> CoreResult<Option<DailySummary>> {
        let records = self.records_in(day).await?;
        Ok(DailySummary::from_records(day, &records)?)
    }

    async fn query_aggregate(
        &self,
        span: TimeSpan,
        observation: &str,
        reducer: Reducer,
    ) -> CoreResult<UnitValue> {
        let system = self.unit_system().await?;
        if !self.has_column(observation).await {
            let empty = match reducer {
                Reducer::Count => return Ok(UnitValue::new(Some(0.0), Unit::Count, UnitGroup::Count)),
                _ => None,
            };
            return Ok(archive_value(system, observation, empty));
        }

        let col = format!("\"{}\"", observation);
        let window = r#""dateTime" > ? AND "dateTime" <= ?"#;
        let sql = match reducer {
            Reducer::Min => format!("SELECT CAST(MIN({col}) AS REAL) FROM archive WHERE {window}"),
            Reducer::Max => format!("SELECT CAST(MAX({col}) AS REAL) FROM archive WHERE {window}"),
            Reducer::Sum => format!("SELECT CAST(SUM({col}) AS REAL) FROM archive WHERE {window}"),
            Reducer::Avg => format!("SELECT CAST(AVG({col}) AS REAL) FROM archive WHERE {window}"),
            Reducer::Count => {
                format!("SELECT CAST(COUNT({col}) AS REAL) FROM archive WHERE {window}")
            }
            Reducer::First => format!(
                "SELECT {col} FROM archive WHERE {window} AND {col} IS NOT NULL \
                 ORDER BY \"dateTime\" ASC LIMIT 1"
            ),
            Reducer::Last => format!(
                "SELECT {col} FROM archive WHERE {window} AND {col} IS NOT NULL \
                 ORDER BY \"dateTime\" DESC LIMIT 1"
            ),
        };
        let row = sqlx::query(&sql)
            .bind(span.start)
            .bind(span.stop)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        let value: Option<f64> = match row {
            Some(row) => row.try_get(0).map_err(query_error)?,
            None => None,
        };

        if reducer == Reducer::Count {
            return Ok(UnitValue::new(value.or(Some(0.0)), Unit::Count, UnitGroup::Count));
        }
        Ok(archive_value(system, observation, value))
    }

    async fn query_histogram(
        &self,
        span: TimeSpan,
        bucketing: &Bucketing,
    ) -> CoreResult<Vec<(i64, f64)>> {
        if !self.has_column(&bucketing.bucket_field).await
            || !self.has_column(&bucketing.sum_field).await
        {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT CAST(ROUND("{key}" / ?) AS INTEGER) AS bucket,
                   CAST(SUM("{sum}") AS REAL) AS total
            FROM archive
            WHERE "dateTime" > ? AND "dateTime" <= ?
              AND "{key}" IS NOT NULL AND "{sum}" IS NOT NULL
            GROUP BY bucket
            ORDER BY bucket
            "#,
            key = bucketing.bucket_field,
            sum = bucketing.sum_field,
        );
        let rows = sqlx::query(&sql)
            .bind(bucketing.bucket_width)
            .bind(span.start)
            .bind(span.stop)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        rows.iter()
            .map(|row| {
                let bucket: i64 = row.try_get("bucket").map_err(query_error)?;
                let total: f64 = row.try_get("total").map_err(query_error)?;
                Ok((bucket, total))
            })
            .collect()
    }

    async fn record_near(&self, ts: Timestamp, grace: i64) -> CoreResult<Option<ArchiveRecord>> {
        let grace = grace.max(0);
        let row = sqlx::query(
            r#"
            SELECT * FROM archive
            WHERE "dateTime" >= ? AND "dateTime" <= ?
            ORDER BY ABS("dateTime" - ?) ASC, "dateTime" ASC
            LIMIT 1
            "#,
        )
        .bind(ts - grace)
        .bind(ts + grace)
        .bind(ts)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn latest_record(&self) -> CoreResult<Option<ArchiveRecord>> {
        let row = sqlx::query(r#"SELECT * FROM archive ORDER BY "dateTime" DESC LIMIT 1"#)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn last_rain_timestamp(&self) -> CoreResult<Option<Timestamp>> {
        if !self.has_column("rain").await {
            return Ok(None);
        }
        let row = sqlx::query(r#"SELECT MAX("dateTime") FROM archive WHERE "rain" > 0"#)
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;
        row.try_get(0).map_err(query_error)
    }

    async fn all_time_range(&self, observation: &str) -> CoreResult<(UnitValue, UnitValue)> {
        let system = self.unit_system().await?;
        if !self.has_column(observation).await {
            return Ok((
                archive_value(system, observation, None),
                archive_value(system, observation, None),
            ));
        }
        let sql = format!(
            "SELECT CAST(MIN(\"{0}\") AS REAL), CAST(MAX(\"{0}\") AS REAL) FROM archive",
            observation
        );
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;
        let min: Option<f64> = row.try_get(0).map_err(query_error)?;
        let max: Option<f64> = row.try_get(1).map_err(query_error)?;
        Ok((
            archive_value(system, observation, min),
            archive_value(system, observation, max),
        ))
    }

    async fn store_record(&self, record: &ArchiveRecord) -> CoreResult<()> {
        record.validate()?;
        let system = self.unit_system().await?.unwrap_or(record.unit_system);
        let record = record.to_unit_system(system, &StandardUnits)?;
        self.add_missing_columns(&record).await?;

        let fields: Vec<(&str, Option<f64>)> = record
            .observations
            .iter()
            .filter(|(name, _)| {
                let ok = is_identifier(name);
                if !ok {
                    warn!(observation = %name, "Skipping observation with unusable name");
                }
                ok
            })
            .map(|(name, value)| (name.as_str(), *value))
            .collect();

        let mut names = vec![
            "\"dateTime\"".to_string(),
            "\"usUnits\"".to_string(),
            "\"interval\"".to_string(),
        ];
        names.extend(fields.iter().map(|(name, _)| format!("\"{}\"", name)));
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO archive ({}) VALUES ({})",
            names.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(record.date_time)
            .bind(record.unit_system.code())
            .bind(record.interval.unwrap_or(DEFAULT_INTERVAL_MINUTES));
        for (_, value) in &fields {
            query = query.bind(*value);
        }
        query.execute(&self.pool).await.map_err(query_error)?;

        debug!(ts = record.date_time, fields = fields.len(), "Stored archive record");
        Ok(())
    }
}
