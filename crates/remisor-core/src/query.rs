use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::frame::Frame;
use crate::report::{write_report, ReportRegistry};
use crate::storage::Storage;

/// Remisión joined with its pedido lines and detaller rows.
///
/// The exports carry no headers, so columns are positional:
/// remisión `col_1` number, `col_2` pedido number; pedidos `col_4` pedido
/// number, `col_5` client, `col_6` date, `col_8`..`col_13` reference date,
/// description, unit, quantity, cost, status; detaller `col_1` remisión
/// number, `col_6` quantity, `col_19` expiry date.
pub const DEFAULT_QUERY: &str = "\
SELECT DISTINCT
    re.col_1 AS re_numero_remision,
    re.col_2 AS re_numero_pedido,
    pe.col_1 AS pe_posicion,
    pe.col_5 AS pe_cliente,
    pe.col_6 AS pe_fecha,
    pe.col_8 AS pe_fecha_referencia,
    pe.col_9 AS pe_decripcion_ref,
    pe.col_10 AS pe_unidad,
    pe.col_11 AS pe_cantidad,
    pe.col_12 AS pe_costo,
    pe.col_13 AS pe_estado,
    td.col_6 AS de_cantidad,
    td.col_19 AS td_fecha_vencimiento
FROM tabla_remision re
INNER JOIN tabla_pedidos pe ON (pe.col_4 = re.col_2)
INNER JOIN tabla_detaller td ON (td.col_1 = re.col_1);
";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("The SQL query is empty")]
    EmptyQuery,
    #[error("Only one SQL statement can run at a time, found {0}")]
    MultipleStatements(usize),
    #[error("The statement returned no result set")]
    NoResultSet,
    #[error("Could not open the store: {0}")]
    Store(#[source] crate::Error),
    #[error("Error running the query: {0}")]
    Execution(#[source] crate::Error),
    #[error("Could not write the report: {0}")]
    Report(#[source] crate::Error),
}

/// Result of a query that ran and was saved
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub preview: Frame,
    pub row_count: usize,
    pub report_path: PathBuf,
}

/// Everything one query request yields, including on failure
#[derive(Debug)]
pub struct QueryOutcome {
    pub sql: String,
    pub tables: Vec<String>,
    pub result: Result<QueryReport, QueryError>,
}

impl QueryOutcome {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.result.as_ref().err().map(ToString::to_string)
    }
}

pub struct QueryExecutor {
    config: PipelineConfig,
}

impl QueryExecutor {
    #[must_use]
    pub const fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run `sql`, or the default join when `None`, saving the full result.
    ///
    /// The table list is gathered before the query so it is returned even
    /// when the query fails. The store is closed before returning.
    pub async fn run(&self, sql: Option<&str>, registry: &ReportRegistry) -> QueryOutcome {
        let sql = sql.map_or_else(|| self.config.default_query.clone(), |s| s.trim().to_string());

        let storage = match Storage::open_read_only(&self.config.database_path).await {
            Ok(storage) => storage,
            Err(e) => {
                warn!(error = %e, "store unavailable");
                return QueryOutcome {
                    sql,
                    tables: Vec::new(),
                    result: Err(QueryError::Store(e)),
                };
            }
        };

        let tables = match storage.list_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                storage.close().await;
                return QueryOutcome {
                    sql,
                    tables: Vec::new(),
                    result: Err(QueryError::Store(e)),
                };
            }
        };

        let result = self.execute(&storage, &sql, registry).await;
        storage.close().await;

        if let Err(e) = &result {
            warn!(error = %e, "query failed");
        }

        QueryOutcome {
            sql,
            tables,
            result,
        }
    }

    /// Tables currently in the store
    pub async fn tables(&self) -> crate::Result<Vec<String>> {
        let storage = Storage::open_read_only(&self.config.database_path).await?;
        let tables = storage.list_tables().await;
        storage.close().await;
        tables
    }

    async fn execute(
        &self,
        storage: &Storage,
        sql: &str,
        registry: &ReportRegistry,
    ) -> Result<QueryReport, QueryError> {
        match statement_count(sql) {
            0 => return Err(QueryError::EmptyQuery),
            1 => {}
            n => return Err(QueryError::MultipleStatements(n)),
        }

        let frame = storage.query_frame(sql).await.map_err(|e| match e {
            crate::Error::NoResultSet => QueryError::NoResultSet,
            e => QueryError::Execution(e),
        })?;

        let report_path =
            write_report(&self.config.results_dir, &frame).map_err(QueryError::Report)?;
        registry.set(report_path.clone());

        info!(rows = frame.len(), report = %report_path.display(), "query complete");

        Ok(QueryReport {
            preview: frame.head(self.config.preview_rows),
            row_count: frame.len(),
            report_path,
        })
    }
}

/// Statements in `sql`, not counting separators inside literals, quoted
/// names or comments
fn statement_count(sql: &str) -> usize {
    let mut count = 0;
    let mut pending = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                pending = true;
                skip_past(&mut chars, c);
            }
            '[' => {
                pending = true;
                skip_past(&mut chars, ']');
            }
            '-' if chars.peek() == Some(&'-') => skip_past(&mut chars, '\n'),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            ';' => {
                if pending {
                    count += 1;
                    pending = false;
                }
            }
            c if c.is_whitespace() => {}
            _ => pending = true,
        }
    }

    count + usize::from(pending)
}

fn skip_past(chars: &mut impl Iterator<Item = char>, end: char) {
    for c in chars.by_ref() {
        if c == end {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestPipeline;
    use crate::source::RawSource;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: PipelineConfig,
    }

    async fn loaded() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_root(dir.path());
        config.ensure_dirs().unwrap();

        IngestPipeline::new(config.clone())
            .ingest_batch(vec![
                RawSource::from_bytes("tabla_remision.txt", "R1|P1\nR2|P2\n"),
                RawSource::from_bytes("tabla_pedidos.txt", "1|a|b|P1|ACME\n2|a|b|P2|Otro\n"),
                RawSource::from_bytes("tabla_detaller.txt", "R1|x\n"),
            ])
            .await
            .unwrap();

        Fixture { _dir: dir, config }
    }

    fn report_count(config: &PipelineConfig) -> usize {
        std::fs::read_dir(&config.results_dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_custom_query() {
        let f = loaded().await;
        let registry = ReportRegistry::new();

        let outcome = QueryExecutor::new(f.config.clone())
            .run(Some("SELECT col_1, col_5 FROM tabla_pedidos ORDER BY col_1"), &registry)
            .await;

        let report = outcome.result.unwrap();
        assert_eq!(report.row_count, 2);
        assert_eq!(report.preview.rows()[0], vec!["1".to_string(), "ACME".to_string()]);
        assert_eq!(registry.available(), Some(report.report_path));
        assert_eq!(
            outcome.tables,
            vec!["tabla_detaller", "tabla_pedidos", "tabla_remision"]
        );
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected() {
        let f = loaded().await;
        let registry = ReportRegistry::new();
        let executor = QueryExecutor::new(f.config.clone());

        let outcome = executor.run(Some("   \n\t "), &registry).await;

        assert!(matches!(outcome.result, Err(QueryError::EmptyQuery)));
        assert_eq!(outcome.tables.len(), 3);
        assert_eq!(report_count(&f.config), 0);
        assert_eq!(registry.get(), None);
    }

    #[tokio::test]
    async fn test_bad_query_still_lists_tables() {
        let f = loaded().await;
        let registry = ReportRegistry::new();

        let outcome = QueryExecutor::new(f.config.clone())
            .run(Some("SELECT * FROM tabla_inexistente"), &registry)
            .await;

        assert!(matches!(outcome.result, Err(QueryError::Execution(_))));
        assert!(outcome.error_message().unwrap().contains("tabla_inexistente"));
        assert_eq!(outcome.tables.len(), 3);
        assert_eq!(registry.get(), None);
    }

    #[tokio::test]
    async fn test_default_query_without_columns_fails_softly() {
        let f = loaded().await;
        let registry = ReportRegistry::new();

        let outcome = QueryExecutor::new(f.config.clone()).run(None, &registry).await;

        // tabla_detaller only has two columns, so col_6 is unknown
        assert!(!outcome.is_ok());
        assert_eq!(outcome.sql, DEFAULT_QUERY);
    }

    #[tokio::test]
    async fn test_write_statement_leaves_store_untouched() {
        let f = loaded().await;
        let registry = ReportRegistry::new();
        let executor = QueryExecutor::new(f.config.clone());

        let outcome = executor.run(Some("DELETE FROM tabla_remision"), &registry).await;
        assert!(matches!(outcome.result, Err(QueryError::Execution(_))));

        let outcome = executor
            .run(Some("CREATE TABLE tabla_extra (a TEXT)"), &registry)
            .await;
        assert!(matches!(outcome.result, Err(QueryError::Execution(_))));

        let storage = Storage::open(&f.config.database_path).await.unwrap();
        assert_eq!(storage.count_rows("tabla_remision").await.unwrap(), 2);
        assert_eq!(storage.list_tables().await.unwrap().len(), 3);
        storage.close().await;
        assert_eq!(report_count(&f.config), 0);
        assert_eq!(registry.get(), None);
    }

    #[tokio::test]
    async fn test_stacked_statements_are_rejected() {
        let f = loaded().await;
        let registry = ReportRegistry::new();

        let outcome = QueryExecutor::new(f.config.clone())
            .run(Some("SELECT 1 AS x; DROP TABLE tabla_pedidos"), &registry)
            .await;

        assert!(matches!(outcome.result, Err(QueryError::MultipleStatements(2))));
        assert_eq!(
            outcome.tables,
            vec!["tabla_detaller", "tabla_pedidos", "tabla_remision"]
        );
        assert_eq!(
            QueryExecutor::new(f.config.clone()).tables().await.unwrap().len(),
            3
        );
        assert_eq!(report_count(&f.config), 0);
    }

    #[test]
    fn test_statement_count() {
        assert_eq!(statement_count(""), 0);
        assert_eq!(statement_count("  -- only a comment\n"), 0);
        assert_eq!(statement_count("SELECT 1"), 1);
        assert_eq!(statement_count("SELECT 1;\n"), 1);
        assert_eq!(statement_count("SELECT 1;;  "), 1);
        assert_eq!(statement_count("SELECT 'a;b', \"c;d\", [e;f] FROM t"), 1);
        assert_eq!(statement_count("SELECT 'it''s;' FROM t"), 1);
        assert_eq!(statement_count("SELECT 1 -- x; y\n"), 1);
        assert_eq!(statement_count("SELECT /* ; */ 1"), 1);
        assert_eq!(statement_count("SELECT 1; DROP TABLE t"), 2);
        assert_eq!(statement_count(DEFAULT_QUERY), 1);
    }

    #[tokio::test]
    async fn test_preview_is_capped() {
        let f = loaded().await;
        let registry = ReportRegistry::new();
        let config = f.config.clone().with_preview_rows(1);

        let outcome = QueryExecutor::new(config)
            .run(Some("SELECT col_1 FROM tabla_remision"), &registry)
            .await;

        let report = outcome.result.unwrap();
        assert_eq!(report.preview.len(), 1);
        assert_eq!(report.row_count, 2);
    }
}
