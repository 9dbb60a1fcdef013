use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::types::ValueRef;
use rusqlite::{params, Batch, Connection, OptionalExtension, Statement};
use tracing::debug;

use archivist_core::error::{ArchivistError, QueryError};
use archivist_core::record::MessageRecord;

pub const ARCHIVE_DB_FILE: &str = "archive.db";

/// Ad-hoc statements never return more rows than this.
pub const QUERY_ROW_LIMIT: usize = 5;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn call_blocking<T, F>(store: ArchiveStore, f: F) -> Result<T, ArchivistError>
where
    T: Send + 'static,
    F: FnOnce(&ArchiveStore) -> Result<T, ArchivistError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| ArchivistError::TaskJoin(format!("DB task join error: {e}")))?
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    /// A row with the same message id was already archived; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(usize),
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => SqlValue::Blob(bytes.len()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(v) => f.write_str(v),
            SqlValue::Blob(len) => write!(f, "<blob {len} bytes>"),
        }
    }
}

/// One result row; fields are kept in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub fields: Vec<(String, SqlValue)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// The statement produced a resultset (possibly with zero rows).
    Rows {
        columns: Vec<String>,
        rows: Vec<QueryRow>,
    },
    /// The statement had no resultset and was committed.
    Executed { affected: usize },
}

impl QueryOutput {
    pub fn rows(&self) -> &[QueryRow] {
        match self {
            QueryOutput::Rows { rows, .. } => rows,
            QueryOutput::Executed { .. } => &[],
        }
    }
}

/// The persistence seam used by the gateway worker.
#[async_trait]
pub trait MessageArchive: Send + Sync {
    /// Archive `record` unless a row with the same id already exists.
    async fn save(&self, record: MessageRecord) -> Result<SaveOutcome, ArchivistError>;

    /// Execute `sql` verbatim.
    async fn query(&self, sql: String) -> Result<QueryOutput, QueryError>;
}

/// SQLite message archive. Every operation opens its own connection.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    db_path: PathBuf,
}

fn id_to_sql(id: u64) -> Result<i64, rusqlite::Error> {
    i64::try_from(id).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn opt_id_to_sql(id: Option<u64>) -> Result<Option<i64>, rusqlite::Error> {
    id.map(id_to_sql).transpose()
}

fn sql_to_id(idx: usize, value: i64) -> Result<u64, rusqlite::Error> {
    u64::try_from(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            Box::new(e),
        )
    })
}

/// Rows changed by this connection so far. Unlike `sqlite3_changes`, this is
/// not left stale by statements that are not INSERT/UPDATE/DELETE.
fn total_changes(conn: &Connection) -> Result<u64, rusqlite::Error> {
    let total: i64 = conn.query_row("SELECT total_changes()", [], |row| row.get(0))?;
    Ok(total.max(0) as u64)
}

fn fetch_limited(stmt: &mut Statement<'_>) -> Result<QueryOutput, rusqlite::Error> {
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut cursor = stmt.query([])?;
    let mut rows = Vec::new();
    while rows.len() < QUERY_ROW_LIMIT {
        let Some(row) = cursor.next()? else {
            break;
        };
        let mut fields = Vec::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            fields.push((name.clone(), SqlValue::from(row.get_ref(idx)?)));
        }
        rows.push(QueryRow { fields });
    }
    Ok(QueryOutput::Rows { columns, rows })
}

impl ArchiveStore {
    pub fn new(data_dir: &str) -> Result<Self, ArchivistError> {
        std::fs::create_dir_all(data_dir)?;
        let store = ArchiveStore {
            db_path: Path::new(data_dir).join(ARCHIVE_DB_FILE),
        };

        let conn = store.open()?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS discord_messages (
                message_id INTEGER PRIMARY KEY,
                guild_id INTEGER,
                guild_name TEXT,
                channel_id INTEGER NOT NULL,
                channel_name TEXT NOT NULL,
                author_id INTEGER NOT NULL,
                author_name TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_discord_messages_channel_timestamp
                ON discord_messages(channel_id, timestamp);",
        )?;

        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    pub fn save_record(&self, record: &MessageRecord) -> Result<SaveOutcome, ArchivistError> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO discord_messages
                (message_id, guild_id, guild_name, channel_id, channel_name,
                 author_id, author_name, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(message_id) DO NOTHING",
            params![
                id_to_sql(record.id)?,
                opt_id_to_sql(record.guild_id)?,
                record.guild_name,
                id_to_sql(record.channel_id)?,
                record.channel_name,
                id_to_sql(record.author_id)?,
                record.author_name,
                record.content,
                record.timestamp.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        if inserted == 0 {
            debug!("Message {} already archived", record.id);
            Ok(SaveOutcome::Duplicate)
        } else {
            Ok(SaveOutcome::Inserted)
        }
    }

    /// Run `sql` verbatim on an autocommit connection.
    ///
    /// Every statement of a batch is executed in order. The first resultset is
    /// reported (capped at [`QUERY_ROW_LIMIT`] rows); without one, the total of
    /// affected rows is reported.
    pub fn run_query(&self, sql: &str) -> Result<QueryOutput, QueryError> {
        if sql.trim().is_empty() {
            return Err(QueryError::new("empty statement"));
        }
        let conn = self.open()?;
        let changes_before = total_changes(&conn)?;
        let mut batch = Batch::new(&conn, sql);
        let mut first_rows: Option<QueryOutput> = None;
        let mut statements = 0;
        while let Some(mut stmt) = batch.next()? {
            statements += 1;
            if stmt.column_count() == 0 {
                stmt.execute([])?;
            } else if first_rows.is_none() {
                first_rows = Some(fetch_limited(&mut stmt)?);
            } else {
                let mut cursor = stmt.query([])?;
                while cursor.next()?.is_some() {}
            }
        }
        if statements == 0 {
            return Err(QueryError::new("empty statement"));
        }
        match first_rows {
            Some(rows) => Ok(rows),
            None => {
                let affected = total_changes(&conn)?.saturating_sub(changes_before);
                Ok(QueryOutput::Executed {
                    affected: usize::try_from(affected).unwrap_or(usize::MAX),
                })
            }
        }
    }

    pub fn get_record(&self, id: u64) -> Result<Option<MessageRecord>, ArchivistError> {
        let conn = self.open()?;
        let record = conn
            .query_row(
                "SELECT message_id, guild_id, guild_name, channel_id, channel_name,
                        author_id, author_name, content, timestamp
                 FROM discord_messages
                 WHERE message_id = ?1",
                params![id_to_sql(id)?],
                |row| {
                    let timestamp: String = row.get(8)?;
                    let timestamp = DateTime::parse_from_rfc3339(&timestamp).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            8,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                    Ok(MessageRecord {
                        id: sql_to_id(0, row.get(0)?)?,
                        guild_id: row
                            .get::<_, Option<i64>>(1)?
                            .map(|v| sql_to_id(1, v))
                            .transpose()?,
                        guild_name: row.get(2)?,
                        channel_id: sql_to_id(3, row.get(3)?)?,
                        channel_name: row.get(4)?,
                        author_id: sql_to_id(5, row.get(5)?)?,
                        author_name: row.get(6)?,
                        content: row.get(7)?,
                        timestamp,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn count_records(&self) -> Result<u64, ArchivistError> {
        let conn = self.open()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM discord_messages", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl MessageArchive for ArchiveStore {
    async fn save(&self, record: MessageRecord) -> Result<SaveOutcome, ArchivistError> {
        call_blocking(self.clone(), move |store| store.save_record(&record)).await
    }

    async fn query(&self, sql: String) -> Result<QueryOutput, QueryError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.run_query(&sql))
            .await
            .map_err(|e| QueryError::new(format!("query task join error: {e}")))?
    }
}
