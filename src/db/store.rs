//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Corrupt row {id}: {reason}")]
    Corrupt { id: i64, reason: String },
    #[error("Database lock poisoned")]
    Poisoned,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const SELECT_COLUMNS: &str = "SELECT id, datetime, success, dns_ip, dns_latency, router_state, \
     weather_temperature_celsius, weather_humidity_percentage, weather_precipitation_mm, \
     weather_wind_speed_kmh, weather_cloud_cover_percentage FROM pings";

/// Thread-safe, append-only sample store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // The dashboard reads while the probe loop appends.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Self::with_connection(conn)
    }

    /// Create a store backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Append one sample. Samples are never updated or deleted.
    pub fn append(&self, sample: &Sample) -> Result<(), DbError> {
        let conn = self.conn()?;
        let weather = &sample.weather;
        conn.execute(
            "INSERT INTO pings
               (datetime, success, dns_ip, dns_latency, router_state,
                weather_temperature_celsius, weather_humidity_percentage, weather_precipitation_mm,
                weather_wind_speed_kmh, weather_cloud_cover_percentage)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                sample.timestamp.format(TIME_FORMAT).to_string(),
                sample.success(),
                sample.dns_ip().map(|ip| ip.to_string()),
                sample.dns_latency(),
                sample.router_state(),
                weather.temperature_celsius,
                weather.humidity_percentage,
                weather.precipitation_mm,
                weather.wind_speed_kmh,
                weather.cloud_cover_percentage,
            ],
        )?;
        Ok(())
    }

    /// All samples, newest first. Ties keep reverse insertion order.
    pub fn samples_desc(&self) -> Result<Vec<Sample>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY datetime DESC, id DESC", SELECT_COLUMNS))?;
        let rows = stmt
            .query_map([], RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRow::into_sample).collect()
    }

    /// The newest sample, if any.
    pub fn latest_sample(&self) -> Result<Option<Sample>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY datetime DESC, id DESC LIMIT 1",
            SELECT_COLUMNS
        ))?;
        let mut rows = stmt.query_map([], RawRow::from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_sample()?)),
            None => Ok(None),
        }
    }

    /// Number of stored samples.
    pub fn count(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM pings", [], |r| r.get(0))?)
    }
}

#[cfg(test)]
impl Store {
    /// Make every later read and append fail.
    pub(crate) fn drop_pings_table(&self) {
        self.conn().unwrap().execute_batch("DROP TABLE pings").unwrap();
    }
}

/// Column values as read, before the sample invariant is checked.
struct RawRow {
    id: i64,
    datetime: String,
    success: bool,
    dns_ip: Option<String>,
    dns_latency: Option<i64>,
    router_state: Value,
    weather: WeatherAttributes,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            datetime: row.get(1)?,
            success: row.get(2)?,
            dns_ip: row.get(3)?,
            dns_latency: row.get(4)?,
            router_state: row.get(5)?,
            weather: WeatherAttributes {
                temperature_celsius: row.get(6)?,
                humidity_percentage: row.get(7)?,
                precipitation_mm: row.get(8)?,
                wind_speed_kmh: row.get(9)?,
                cloud_cover_percentage: row.get(10)?,
            },
        })
    }

    fn into_sample(self) -> Result<Sample, DbError> {
        let id = self.id;
        let corrupt = |reason: String| DbError::Corrupt { id, reason };

        let timestamp = parse_db_time(&self.datetime)
            .ok_or_else(|| corrupt(format!("bad datetime {:?}", self.datetime)))?;

        let outcome = if self.success {
            let ip = self
                .dns_ip
                .ok_or_else(|| corrupt("successful sample without dns_ip".to_string()))?;
            let dns_ip = ip
                .parse()
                .map_err(|_| corrupt(format!("bad dns_ip {:?}", ip)))?;
            let dns_latency = self
                .dns_latency
                .and_then(|l| u32::try_from(l).ok())
                .ok_or_else(|| corrupt("successful sample without valid dns_latency".to_string()))?;
            Outcome::Reachable { dns_ip, dns_latency }
        } else {
            Outcome::Unreachable {
                router_state: value_to_text(self.router_state),
            }
        };

        Ok(Sample::new(timestamp, outcome, self.weather))
    }
}

/// Router state may be stored as TEXT, as a BLOB, or be NULL.
fn value_to_text(value: Value) -> String {
    match value {
        Value::Text(s) => s,
        Value::Blob(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Null => String::new(),
    }
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    // Try various formats
    let formats = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    // Try ISO 8601
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
