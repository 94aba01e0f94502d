//! SQLite storage backend
//!
//! One table per tag: `(id, x, y, q)` with an index on `x`. Alert history
//! tables are `(id, x, cx, e)`: fired, acked and cleared timestamps.
//! Json values are kept as TEXT and compared through `json()`.

use async_trait::async_trait;
use historian_model::{AlarmRecord, DataPoint, Location, Order, Tag, TagValue, ValueType};
use sqlx::query_builder::Separated;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::traits::{latest_per_timestamp, BackendKind, RangeQuery, StorageBackend};

/// Rows per multi-row INSERT (3 binds each, well under SQLite's bind limit)
const INSERT_CHUNK: usize = 300;
/// Timestamps per `DELETE ... WHERE x IN (...)`
const DELETE_CHUNK: usize = 500;

fn column_type(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::Int => "INTEGER",
        ValueType::Double => "REAL",
        ValueType::String | ValueType::Json => "TEXT",
    }
}

/// SQLite backend backed by an sqlx pool
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) a database file with WAL enabled
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Config(format!("{}: {}", parent.display(), e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(format!("{}: {}", db_path_str, e)))?;

        info!(path = %db_path_str, "SQLite historian database connected");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            db_path: "from_pool".to_string(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    async fn table_exists(&self, location: &Location) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(location.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn last_alarm_row(
        conn: &mut sqlx::SqliteConnection,
        location: &Location,
    ) -> Result<Option<AlarmRecord>> {
        let sql = format!(
            "SELECT id, x, cx, e FROM \"{}\" ORDER BY x DESC, id DESC LIMIT 1",
            location
        );
        let row = sqlx::query(&sql).fetch_optional(&mut *conn).await?;
        row.map(|r| decode_alarm(&r)).transpose()
    }
}

fn decode_alarm(row: &SqliteRow) -> Result<AlarmRecord> {
    Ok(AlarmRecord {
        id: row.try_get("id")?,
        fired: row.try_get("x")?,
        acked: row.try_get("cx")?,
        off: row.try_get("e")?,
    })
}

fn decode_point(row: &SqliteRow, value_type: ValueType) -> Result<DataPoint> {
    let value = match value_type {
        ValueType::Int => row.try_get::<Option<i64>, _>("y")?.map(TagValue::Int),
        ValueType::Double => row.try_get::<Option<f64>, _>("y")?.map(TagValue::Double),
        ValueType::String => row.try_get::<Option<String>, _>("y")?.map(TagValue::Str),
        ValueType::Json => row
            .try_get::<Option<String>, _>("y")?
            .map(|raw| serde_json::from_str(&raw).map(TagValue::Json))
            .transpose()?,
    };
    Ok(DataPoint {
        value,
        timestamp: row.try_get("x")?,
        quality: row.try_get("q")?,
    })
}

fn push_value(sep: &mut Separated<'_, '_, Sqlite, &'static str>, value: &Option<TagValue>) {
    match value {
        Some(TagValue::Int(v)) => sep.push_bind(*v),
        Some(TagValue::Double(v)) => sep.push_bind(*v),
        Some(TagValue::Str(s)) => sep.push_bind(s.clone()),
        Some(TagValue::Json(v)) => sep.push_bind(v.to_string()),
        None => sep.push_bind(Option::<String>::None),
    };
}

/// Appends `AND <value filter>` to a main-range select
fn push_value_filter(
    qb: &mut QueryBuilder<'_, Sqlite>,
    value_type: ValueType,
    query: &RangeQuery,
) {
    let Some(set) = query.values.as_ref() else {
        return;
    };
    if set.is_empty() {
        qb.push(" AND 0");
        return;
    }

    let column = match value_type {
        ValueType::Json => "json(y)",
        ValueType::Int | ValueType::Double | ValueType::String => "y",
    };
    qb.push(" AND (");
    let mut first = true;
    if !set.values.is_empty() {
        qb.push(column).push(" IN (");
        let mut sep = qb.separated(", ");
        for value in &set.values {
            match value {
                TagValue::Int(v) => sep.push_bind(*v),
                TagValue::Double(v) => sep.push_bind(*v),
                TagValue::Str(s) => sep.push_bind(s.clone()),
                TagValue::Json(v) => sep
                    .push("json(")
                    .push_bind_unseparated(v.to_string())
                    .push_unseparated(")"),
            };
        }
        qb.push(")");
        first = false;
    }
    if set.include_null {
        if !first {
            qb.push(" OR ");
        }
        qb.push("y IS NULL");
    }
    qb.push(")");
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn create_location(&self, tag: &Tag, location: &Location) -> Result<Location> {
        if self.table_exists(location).await? {
            return Err(StoreError::LocationExists(location.to_string()));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "CREATE TABLE \"{loc}\" (\
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             x INTEGER NOT NULL, \
             y {ty}, \
             q INTEGER)",
            loc = location,
            ty = column_type(tag.value_type)
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX \"{loc}_idx\" ON \"{loc}\" (x)",
            loc = location
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(tag_id = %tag.id, location = %location, value_type = %tag.value_type, "Created tag table");
        Ok(location.clone())
    }

    async fn drop_location(&self, location: &Location) -> Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", location))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn write(
        &self,
        location: &Location,
        _value_type: ValueType,
        points: &[DataPoint],
        update: bool,
    ) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let batch = if update {
            latest_per_timestamp(points)
        } else {
            points.to_vec()
        };

        let mut tx = self.pool.begin().await?;

        if update {
            for chunk in batch.chunks(DELETE_CHUNK) {
                let mut qb: QueryBuilder<Sqlite> =
                    QueryBuilder::new(format!("DELETE FROM \"{}\" WHERE x IN (", location));
                let mut sep = qb.separated(", ");
                for point in chunk {
                    sep.push_bind(point.timestamp);
                }
                qb.push(")");
                qb.build().execute(&mut *tx).await?;
            }
        }

        for chunk in batch.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT INTO \"{}\" (x, y, q) ", location));
            qb.push_values(chunk, |mut sep, point| {
                sep.push_bind(point.timestamp);
                push_value(&mut sep, &point.value);
                sep.push_bind(point.quality);
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(batch.len())
    }

    async fn read_range(
        &self,
        location: &Location,
        value_type: ValueType,
        query: &RangeQuery,
    ) -> Result<Vec<DataPoint>> {
        let direction = match query.order {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        };
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT x, y, q FROM (");

        qb.push(format!(
            "SELECT * FROM (SELECT id, x, y, q FROM \"{}\" WHERE 1",
            location
        ));
        if let Some(start) = query.start {
            qb.push(" AND x >= ").push_bind(start);
        }
        if let Some(finish) = query.finish {
            qb.push(" AND x <= ").push_bind(finish);
        }
        push_value_filter(&mut qb, value_type, query);
        qb.push(format!(" ORDER BY x {d}, id {d} LIMIT ", d = direction))
            .push_bind(limit)
            .push(")");

        // UNION keeps a boundary row once when it is both before start and
        // after finish (reversed bounds); `id` keeps distinct rows apart
        if let (true, Some(start)) = (query.one_before, query.start) {
            qb.push(format!(
                " UNION SELECT * FROM (SELECT id, x, y, q FROM \"{}\" WHERE x < ",
                location
            ))
            .push_bind(start)
            .push(" ORDER BY x DESC, id DESC LIMIT 1)");
        }
        if let (true, Some(finish)) = (query.one_after, query.finish) {
            qb.push(format!(
                " UNION SELECT * FROM (SELECT id, x, y, q FROM \"{}\" WHERE x > ",
                location
            ))
            .push_bind(finish)
            .push(" ORDER BY x ASC, id ASC LIMIT 1)");
        }

        qb.push(") ORDER BY x ASC, id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_point(row, value_type)).collect()
    }

    async fn create_alert_location(&self, location: &Location) -> Result<()> {
        if self.table_exists(location).await? {
            return Err(StoreError::LocationExists(location.to_string()));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "CREATE TABLE \"{}\" (\
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             x INTEGER NOT NULL, \
             cx INTEGER, \
             e INTEGER)",
            location
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX \"{loc}_idx\" ON \"{loc}\" (x)",
            loc = location
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn open_alarm(&self, location: &Location, fired: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let last = Self::last_alarm_row(&mut tx, location).await?;
        if last.is_some_and(|r| r.is_open()) {
            return Ok(false);
        }
        sqlx::query(&format!("INSERT INTO \"{}\" (x) VALUES (?)", location))
            .bind(fired)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn ack_alarm(&self, location: &Location, acked: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let Some(open) = Self::last_alarm_row(&mut tx, location)
            .await?
            .filter(|r| r.is_open() && r.acked.is_none())
        else {
            return Ok(false);
        };
        sqlx::query(&format!("UPDATE \"{}\" SET cx = ? WHERE id = ?", location))
            .bind(acked)
            .bind(open.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn close_alarm(&self, location: &Location, off: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let Some(open) = Self::last_alarm_row(&mut tx, location)
            .await?
            .filter(AlarmRecord::is_open)
        else {
            return Ok(false);
        };
        sqlx::query(&format!("UPDATE \"{}\" SET e = ? WHERE id = ?", location))
            .bind(off)
            .bind(open.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn last_alarm(&self, location: &Location) -> Result<Option<AlarmRecord>> {
        let mut conn = self.pool.acquire().await?;
        Self::last_alarm_row(&mut conn, location).await
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_column_types() {
        assert_eq!(column_type(ValueType::Int), "INTEGER");
        assert_eq!(column_type(ValueType::Double), "REAL");
        assert_eq!(column_type(ValueType::String), "TEXT");
        assert_eq!(column_type(ValueType::Json), "TEXT");
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let backend = SqliteBackend::connect(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(backend.kind(), BackendKind::Sqlite);
    }
}
