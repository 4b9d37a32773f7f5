use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use remisor_core::{Frame, QueryError, QueryOutcome};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(run_default).post(run_sql))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub sql: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub sql: String,
    /// Present even when the query failed
    pub tables: Vec<String>,
    pub preview: Option<Frame>,
    pub row_count: Option<usize>,
    /// File name of the saved report
    pub report: Option<String>,
    pub error: Option<String>,
}

fn respond(outcome: QueryOutcome) -> (StatusCode, Json<QueryResponse>) {
    let status = match &outcome.result {
        Ok(_) => StatusCode::OK,
        Err(QueryError::EmptyQuery | QueryError::MultipleStatements(_)) => StatusCode::BAD_REQUEST,
        Err(QueryError::Execution(_) | QueryError::NoResultSet) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Err(QueryError::Store(_) | QueryError::Report(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let error = outcome.error_message();

    let response = match outcome.result {
        Ok(report) => QueryResponse {
            sql: outcome.sql,
            tables: outcome.tables,
            report: report
                .report_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            row_count: Some(report.row_count),
            preview: Some(report.preview),
            error,
        },
        Err(_) => QueryResponse {
            sql: outcome.sql,
            tables: outcome.tables,
            preview: None,
            row_count: None,
            report: None,
            error,
        },
    };

    (status, Json(response))
}

async fn run_default(State(state): State<AppState>) -> (StatusCode, Json<QueryResponse>) {
    respond(state.executor.run(None, &state.reports).await)
}

async fn run_sql(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> (StatusCode, Json<QueryResponse>) {
    respond(state.executor.run(Some(&request.sql), &state.reports).await)
}
