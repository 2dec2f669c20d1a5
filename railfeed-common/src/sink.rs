use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use metrics::counter;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, Sqlite, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::row::{Row, Value};
use crate::topics::Schema;

/// Destination for normalized rows.
#[async_trait]
pub trait RowSink: Send + Sync {
    async fn write(&self, row: Row) -> Result<(), SinkError>;
    async fn close(&self) -> Result<(), SinkError>;
}

/// View mode: rows are logged, nothing is persisted.
pub struct PrintSink {
    columns: Vec<String>,
    closed: AtomicBool,
}

impl PrintSink {
    pub fn new(schema: &Schema) -> Self {
        Self {
            columns: schema.names().map(str::to_owned).collect(),
            closed: AtomicBool::new(false),
        }
    }

    fn render(&self, row: &Row) -> String {
        self.columns
            .iter()
            .zip(row.values())
            .map(|(column, value)| format!("{column}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl RowSink for PrintSink {
    async fn write(&self, row: Row) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::SinkClosed);
        }
        info!("row: {}", self.render(&row));
        counter!("railfeed_rows_printed_total").increment(1);

        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SinkError::SinkClosed);
        }
        Ok(())
    }
}

/// A single SQLite table whose columns are exactly a topic's schema.
///
/// All statements go through one mutex-guarded pool with a single connection, so the
/// sink can be shared with whichever task delivers messages. Every insert is its own
/// implicit transaction and is committed before `insert` returns.
pub struct SqliteRowSink {
    table: String,
    columns: usize,
    insert_sql: String,
    select_sql: String,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqliteRowSink {
    /// Create the table for `schema` in the database at `path`, creating the file if needed.
    ///
    /// With `drop_if_exists` any previous table of the same name is replaced. Without it,
    /// an existing table is left untouched and `TableAlreadyExists` is returned.
    pub async fn open(
        path: impl AsRef<Path>,
        table: &str,
        schema: &Schema,
        drop_if_exists: bool,
    ) -> Result<Self, SinkError> {
        let pool = connect(path.as_ref(), true).await?;
        let quoted = quote_identifier(table);

        if drop_if_exists {
            sqlx::query(&format!("DROP TABLE IF EXISTS {quoted}"))
                .execute(&pool)
                .await
                .map_err(SinkError::database("DROP TABLE"))?;
        } else if column_count(&pool, table).await? > 0 {
            pool.close().await;
            return Err(SinkError::TableAlreadyExists(table.to_owned()));
        }

        let columns = schema
            .columns()
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.name), c.column_type.as_sql()))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!("CREATE TABLE {quoted} ({columns})"))
            .execute(&pool)
            .await
            .map_err(SinkError::database("CREATE TABLE"))?;

        info!(
            path = %path.as_ref().display(),
            table,
            columns = schema.len(),
            "opened row sink"
        );

        Ok(Self::new(table, schema.len(), pool))
    }

    /// Open an existing table without modifying it, e.g. to read back rows after a session.
    pub async fn attach(path: impl AsRef<Path>, table: &str) -> Result<Self, SinkError> {
        let pool = connect(path.as_ref(), false).await?;

        let columns = column_count(&pool, table).await?;
        if columns == 0 {
            pool.close().await;
            return Err(SinkError::TableNotFound(table.to_owned()));
        }

        debug!(path = %path.as_ref().display(), table, "attached to row sink");

        Ok(Self::new(table, columns, pool))
    }

    fn new(table: &str, columns: usize, pool: SqlitePool) -> Self {
        let quoted = quote_identifier(table);
        let placeholders = vec!["?"; columns].join(", ");

        Self {
            table: table.to_owned(),
            columns,
            insert_sql: format!("INSERT INTO {quoted} VALUES ({placeholders})"),
            select_sql: format!("SELECT * FROM {quoted} ORDER BY rowid"),
            pool: Mutex::new(Some(pool)),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Append one row.
    pub async fn insert(&self, row: &Row) -> Result<(), SinkError> {
        let guard = self.pool.lock().await;
        let pool = guard.as_ref().ok_or(SinkError::SinkClosed)?;

        if row.len() != self.columns {
            return Err(SinkError::ArityMismatch {
                table: self.table.clone(),
                expected: self.columns,
                got: row.len(),
            });
        }

        row.values()
            .iter()
            .fold(sqlx::query(&self.insert_sql), bind_value)
            .execute(pool)
            .await
            .map_err(SinkError::database("INSERT"))?;

        counter!("railfeed_rows_inserted_total").increment(1);
        Ok(())
    }

    /// Every persisted row, in insertion order.
    pub async fn read_all(&self) -> Result<Vec<Row>, SinkError> {
        let guard = self.pool.lock().await;
        let pool = guard.as_ref().ok_or(SinkError::SinkClosed)?;

        let rows = sqlx::query(&self.select_sql)
            .fetch_all(pool)
            .await
            .map_err(SinkError::database("SELECT"))?;

        rows.iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(SinkError::database("SELECT"))
    }

    /// Release the storage handle. Any later call fails with `SinkClosed`.
    pub async fn close(&self) -> Result<(), SinkError> {
        let pool = self.pool.lock().await.take().ok_or(SinkError::SinkClosed)?;
        pool.close().await;

        info!(table = %self.table, "closed row sink");
        Ok(())
    }
}

#[async_trait]
impl RowSink for SqliteRowSink {
    async fn write(&self, row: Row) -> Result<(), SinkError> {
        self.insert(&row).await
    }

    async fn close(&self) -> Result<(), SinkError> {
        SqliteRowSink::close(self).await
    }
}

async fn connect(path: &Path, create: bool) -> Result<SqlitePool, SinkError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(SinkError::database("CONNECT"))
}

/// Number of columns of `table`, zero when the table does not exist.
async fn column_count(pool: &SqlitePool, table: &str) -> Result<usize, SinkError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?)")
        .bind(table)
        .fetch_one(pool)
        .await
        .map_err(SinkError::database("PRAGMA table_info"))?;

    Ok(usize::try_from(count).unwrap_or_default())
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Integer(i) => query.bind(*i),
        Value::Real(r) => query.bind(*r),
        Value::Text(s) => query.bind(s.clone()),
    }
}

/// Values come back in whatever storage class SQLite picked for them, which depends on
/// the column affinity: text that looks like a number in an INTEGER column is stored as
/// an integer.
fn decode_row(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    (0..row.len())
        .map(|index| {
            let storage = {
                let raw = row.try_get_raw(index)?;
                if raw.is_null() {
                    return Ok(Value::Null);
                }
                raw.type_info().name().to_owned()
            };

            match storage.as_str() {
                "INTEGER" => row.try_get::<i64, _>(index).map(Value::Integer),
                "REAL" => row.try_get::<f64, _>(index).map(Value::Real),
                "TEXT" => row.try_get::<String, _>(index).map(Value::Text),
                _ => row
                    .try_get::<Vec<u8>, _>(index)
                    .map(|bytes| Value::Text(String::from_utf8_lossy(&bytes).into_owned())),
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Row)
}
