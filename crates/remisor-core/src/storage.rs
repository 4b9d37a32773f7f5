use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Pool, Row, Sqlite, Transaction, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::frame::Frame;
use crate::{Error, Result};

/// Handle on the SQLite database the feeds are loaded into.
///
/// Single connection: loads and queries run one at a time.
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        debug!(path = %path.display(), "opened store");
        Ok(Self { pool })
    }

    /// Open for queries only; any write fails.
    ///
    /// A missing database file is created empty first.
    pub async fn open_read_only(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::open(path).await?.close().await;
        }

        let options = SqliteConnectOptions::new().filename(path).read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        debug!(path = %path.display(), "opened store read-only");
        Ok(Self { pool })
    }

    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self { pool })
    }

    /// Close the connection, waiting for it to be released
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Delete the database file and its journal side files
    pub fn reset(path: &Path) -> Result<()> {
        let mut removed = false;
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            match std::fs::remove_file(&file) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed {
            info!(path = %path.display(), "reset store");
        }
        Ok(())
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Drop and recreate `table` with text columns; nothing is visible until commit
    pub async fn replace_table(&self, table: &str, columns: &[String]) -> Result<TableWriter> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&create_table_sql(table, columns))
            .execute(&mut *tx)
            .await?;

        Ok(TableWriter::new(tx, table, columns))
    }

    /// Append to an existing `table` inside a new transaction
    pub async fn append_to(&self, table: &str, columns: &[String]) -> Result<TableWriter> {
        let tx = self.pool.begin().await?;
        Ok(TableWriter::new(tx, table, columns))
    }

    /// Run one statement and materialize every row as text.
    ///
    /// The statement runs inside a transaction that is always rolled back, so
    /// the store is unchanged whatever it does. Statements without result
    /// columns fail with [`Error::NoResultSet`].
    pub async fn query_frame(&self, sql: &str) -> Result<Frame> {
        let mut tx = self.pool.begin().await?;
        let frame = read_frame(&mut tx, sql).await;
        tx.rollback().await?;
        frame
    }
}

async fn read_frame(conn: &mut SqliteConnection, sql: &str) -> Result<Frame> {
    let rows = sqlx::query(sql).fetch_all(&mut *conn).await?;

    let columns: Vec<String> = match rows.first() {
        Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        None => (&mut *conn)
            .describe(sql)
            .await?
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
    };
    if columns.is_empty() {
        return Err(Error::NoResultSet);
    }

    let mut frame = Frame::empty(columns)?;
    for row in &rows {
        let fields = (0..row.len())
            .map(|i| cell_text(row, i))
            .collect::<Result<Vec<_>>>()?;
        frame.push_row(fields)?;
    }
    Ok(frame)
}

/// Inserts frames into one table within a single transaction.
///
/// Dropping the writer without `commit` rolls everything back.
pub struct TableWriter {
    tx: Transaction<'static, Sqlite>,
    insert_sql: String,
    width: usize,
    rows_written: u64,
}

impl TableWriter {
    fn new(tx: Transaction<'static, Sqlite>, table: &str, columns: &[String]) -> Self {
        Self {
            tx,
            insert_sql: insert_sql(table, columns),
            width: columns.len(),
            rows_written: 0,
        }
    }

    pub async fn write(&mut self, frame: &Frame) -> Result<u64> {
        debug_assert_eq!(frame.width(), self.width);

        for row in frame.rows() {
            let mut query = sqlx::query(&self.insert_sql);
            for field in row {
                query = query.bind(field.as_str());
            }
            query.execute(&mut *self.tx).await?;
        }

        let written = frame.len() as u64;
        self.rows_written += written;
        Ok(written)
    }

    pub async fn commit(self) -> Result<u64> {
        self.tx.commit().await?;
        Ok(self.rows_written)
    }
}

/// Double-quote an identifier for SQLite
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_table_sql(table: &str, columns: &[String]) -> String {
    let defs = columns
        .iter()
        .map(|c| format!("{} TEXT", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({defs})", quote_ident(table))
}

fn insert_sql(table: &str, columns: &[String]) -> String {
    let names = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let params = vec!["?"; columns.len()].join(", ");
    format!("INSERT INTO {} ({names}) VALUES ({params})", quote_ident(table))
}

/// Floats keep a fractional part, so `2.0` is not written as an integer
fn real_text(value: f64) -> String {
    format!("{value:?}")
}

fn cell_text(row: &SqliteRow, index: usize) -> Result<String> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(String::new());
    }
    let type_name = raw.type_info().name().to_string();

    let text = match type_name.as_str() {
        "REAL" => real_text(row.try_get_unchecked::<f64, _>(index)?),
        "INTEGER" | "BIGINT" | "INT8" | "BOOLEAN" => {
            row.try_get_unchecked::<i64, _>(index)?.to_string()
        }
        "BLOB" => String::from_utf8_lossy(&row.try_get_unchecked::<Vec<u8>, _>(index)?).into_owned(),
        _ => row.try_get_unchecked::<String, _>(index)?,
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_replace_and_append() {
        let storage = Storage::open_memory().await.unwrap();
        let columns = strings(&["col_1", "col_2"]);

        let first = Frame::new(columns.clone(), vec![strings(&["a", "1"])]).unwrap();
        let mut writer = storage.replace_table("t", &columns).await.unwrap();
        writer.write(&first).await.unwrap();
        assert_eq!(writer.commit().await.unwrap(), 1);

        let second = Frame::new(columns.clone(), vec![strings(&["b", "2"]), strings(&["c", "3"])]).unwrap();
        let mut writer = storage.append_to("t", &columns).await.unwrap();
        writer.write(&second).await.unwrap();
        writer.commit().await.unwrap();

        assert_eq!(storage.count_rows("t").await.unwrap(), 3);
        assert_eq!(storage.list_tables().await.unwrap(), vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn test_uncommitted_writer_rolls_back() {
        let storage = Storage::open_memory().await.unwrap();
        let columns = strings(&["x"]);

        let mut writer = storage.replace_table("keep", &columns).await.unwrap();
        writer
            .write(&Frame::new(columns.clone(), vec![strings(&["1"])]).unwrap())
            .await
            .unwrap();
        writer.commit().await.unwrap();

        let mut writer = storage.replace_table("keep", &columns).await.unwrap();
        writer
            .write(&Frame::new(columns.clone(), vec![strings(&["2"]), strings(&["3"])]).unwrap())
            .await
            .unwrap();
        drop(writer);

        assert_eq!(storage.count_rows("keep").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_frame_renders_text() {
        let storage = Storage::open_memory().await.unwrap();

        let frame = storage
            .query_frame("SELECT 'a' AS s, 2 AS n, 1.5 AS r, NULL AS z, 2.0 AS w, CAST(7 AS REAL) AS c")
            .await
            .unwrap();

        assert_eq!(frame.columns(), strings(&["s", "n", "r", "z", "w", "c"]).as_slice());
        assert_eq!(frame.rows()[0], strings(&["a", "2", "1.5", "", "2.0", "7.0"]));
    }

    #[tokio::test]
    async fn test_query_frame_never_writes() {
        let storage = Storage::open_memory().await.unwrap();
        let columns = strings(&["x"]);
        let mut writer = storage.replace_table("keep", &columns).await.unwrap();
        writer
            .write(&Frame::new(columns.clone(), vec![strings(&["1"]), strings(&["2"])]).unwrap())
            .await
            .unwrap();
        writer.commit().await.unwrap();

        let deleted = storage.query_frame("DELETE FROM keep").await;
        let updated = storage.query_frame("UPDATE keep SET x = '9'").await;

        assert!(matches!(deleted, Err(Error::NoResultSet)));
        assert!(matches!(updated, Err(Error::NoResultSet)));
        let frame = storage.query_frame("SELECT x FROM keep ORDER BY x").await.unwrap();
        assert_eq!(frame.rows(), &[strings(&["1"]), strings(&["2"])]);
    }

    #[tokio::test]
    async fn test_read_only_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("database.db");

        let storage = Storage::open_read_only(&db).await.unwrap();
        assert!(db.exists());
        assert!(storage.list_tables().await.unwrap().is_empty());

        let err = storage
            .query_frame("CREATE TABLE t (a TEXT)")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        storage.close().await;

        let storage = Storage::open(&db).await.unwrap();
        assert!(storage.list_tables().await.unwrap().is_empty());
        storage.close().await;
    }

    #[tokio::test]
    async fn test_query_frame_empty_result_keeps_columns() {
        let storage = Storage::open_memory().await.unwrap();
        let columns = strings(&["col_1"]);
        storage
            .replace_table("empty", &columns)
            .await
            .unwrap()
            .commit()
            .await
            .unwrap();

        let frame = storage
            .query_frame("SELECT col_1 AS numero FROM empty")
            .await
            .unwrap();

        assert!(frame.is_empty());
        assert_eq!(frame.columns(), strings(&["numero"]).as_slice());
    }

    #[tokio::test]
    async fn test_bad_sql_is_an_error() {
        let storage = Storage::open_memory().await.unwrap();
        assert!(storage.query_frame("SELECT * FROM missing").await.is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("tabla"), "\"tabla\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_reset_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("database.db");
        std::fs::write(&db, b"x").unwrap();
        std::fs::write(dir.path().join("database.db-wal"), b"x").unwrap();

        Storage::reset(&db).unwrap();
        Storage::reset(&db).unwrap();

        assert!(!db.exists());
        assert!(!dir.path().join("database.db-wal").exists());
    }
}
