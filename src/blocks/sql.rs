//! SQL query handler backed by SQLite.
//!
//! Queries are executed as-is; parameter binding is not implemented in
//! this version and callers must not assume it. In sandbox mode the
//! handler keeps one shared in-memory database (opened by `init`) and
//! rejects destructive verbs before execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use super::{input_or, missing_inputs, BlockHandler};
use crate::core::{BlockContext, ErrorCode, ResourceClass, ResultMetadata, StepRequest, StepResult};

const DESTRUCTIVE_VERBS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "GRANT", "REVOKE",
];

/// Case-insensitive whole-word match: `SELECT created_at` is fine,
/// `CREATE TABLE` is not.
fn contains_destructive_verb(query: &str) -> bool {
    let upper = query.to_uppercase();
    upper
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| DESTRUCTIVE_VERBS.contains(&word))
}

enum QueryOutput {
    Rows { rows_json: String, count: usize },
    Affected(usize),
}

pub struct SqlHandler {
    sandbox_db: Arc<Mutex<Option<Connection>>>,
}

impl SqlHandler {
    pub fn new() -> Self {
        Self {
            sandbox_db: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for SqlHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockHandler for SqlHandler {
    fn block_type(&self) -> &'static str {
        "sql.query"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Cpu
    }

    async fn init(&self, ctx: &BlockContext) -> anyhow::Result<()> {
        if ctx.sandbox {
            let mut guard = self.sandbox_db.lock();
            if guard.is_none() {
                *guard = Some(Connection::open_in_memory()?);
            }
        }
        Ok(())
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let started = Instant::now();
        let meta = ResultMetadata::from_context(ctx);

        let missing = missing_inputs(req, &["query"]);
        if !missing.is_empty() {
            return StepResult::error_result(
                ErrorCode::MissingRequiredField,
                "missing required input: query",
                meta,
                elapsed_ms(started),
            );
        }

        let query = req.inputs["query"].clone();
        let connection = input_or(req, "connection", ":memory:").to_string();

        if ctx.sandbox && contains_destructive_verb(&query) {
            return StepResult::error_result(
                ErrorCode::PermissionDenied,
                "sandbox mode: destructive SQL operations not allowed",
                meta,
                elapsed_ms(started),
            );
        }

        let sandbox_db = Arc::clone(&self.sandbox_db);
        let use_shared = ctx.sandbox && connection == ":memory:";
        let blocking = tokio::task::spawn_blocking(move || {
            if use_shared {
                let mut guard = sandbox_db.lock();
                match guard.as_mut() {
                    Some(conn) => run_query(conn, &query),
                    None => {
                        // init was skipped; fall back to an ephemeral database.
                        let conn = Connection::open_in_memory()?;
                        run_query(&conn, &query)
                    }
                }
            } else {
                let conn = Connection::open(&connection)?;
                run_query(&conn, &query)
            }
        })
        .await;

        let latency = elapsed_ms(started);
        match blocking {
            Ok(Ok(QueryOutput::Rows { rows_json, count })) => {
                let mut outputs = HashMap::new();
                outputs.insert("rows".to_string(), rows_json);
                outputs.insert("row_count".to_string(), count.to_string());
                StepResult::success(meta, outputs, latency)
            }
            Ok(Ok(QueryOutput::Affected(affected))) => {
                let mut outputs = HashMap::new();
                outputs.insert("affected_rows".to_string(), affected.to_string());
                StepResult::success(meta, outputs, latency)
            }
            Ok(Err(e)) => StepResult::error_result(
                ErrorCode::ExecutionFailed,
                format!("SQL query execution failed: {e}"),
                meta,
                latency,
            ),
            Err(e) => StepResult::error_result(
                ErrorCode::InternalError,
                format!("SQL worker task failed: {e}"),
                meta,
                latency,
            ),
        }
    }
}

fn run_query(conn: &Connection, query: &str) -> Result<QueryOutput, rusqlite::Error> {
    let mut stmt = conn.prepare(query)?;

    if stmt.column_count() == 0 {
        let affected = stmt.execute([])?;
        return Ok(QueryOutput::Affected(affected));
    }

    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();

    let mut rows = stmt.query([])?;
    let mut collected = Vec::new();
    while let Some(row) = rows.next()? {
        let mut object = serde_json::Map::new();
        for (i, name) in column_names.iter().enumerate() {
            let rendered = match row.get_ref(i)? {
                ValueRef::Null => continue,
                ValueRef::Integer(v) => v.to_string(),
                ValueRef::Real(v) => v.to_string(),
                ValueRef::Text(v) => String::from_utf8_lossy(v).to_string(),
                ValueRef::Blob(v) => String::from_utf8_lossy(v).to_string(),
            };
            object.insert(name.clone(), serde_json::Value::String(rendered));
        }
        collected.push(serde_json::Value::Object(object));
    }

    let count = collected.len();
    let rows_json = serde_json::Value::Array(collected).to_string();
    Ok(QueryOutput::Rows { rows_json, count })
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(sandbox: bool) -> BlockContext {
        BlockContext {
            tenant_id: "tenant-sql".into(),
            sandbox,
            ..Default::default()
        }
    }

    fn query_request(query: &str) -> StepRequest {
        let mut req = StepRequest {
            step_type: "sql.query".into(),
            ..Default::default()
        };
        req.inputs.insert("query".to_string(), query.to_string());
        req
    }

    #[tokio::test]
    async fn select_produces_rows_and_row_count() {
        let handler = SqlHandler::new();
        let result = handler
            .execute(&query_request("SELECT 1 AS one, 'x' AS label"), &ctx(false))
            .await;
        assert!(result.is_success(), "{}", result.error_message);
        assert_eq!(result.outputs["row_count"], "1");
        let rows: serde_json::Value = serde_json::from_str(&result.outputs["rows"]).unwrap();
        assert_eq!(rows[0]["one"], "1");
        assert_eq!(rows[0]["label"], "x");
    }

    #[tokio::test]
    async fn empty_select_still_reports_rows() {
        let handler = SqlHandler::new();
        let result = handler
            .execute(&query_request("SELECT 1 AS one WHERE 1 = 0"), &ctx(false))
            .await;
        assert!(result.is_success());
        assert_eq!(result.outputs["row_count"], "0");
        assert_eq!(result.outputs["rows"], "[]");
    }

    #[tokio::test]
    async fn ddl_reports_affected_rows() {
        let handler = SqlHandler::new();
        let result = handler
            .execute(&query_request("CREATE TABLE t (id INTEGER)"), &ctx(false))
            .await;
        assert!(result.is_success(), "{}", result.error_message);
        assert_eq!(result.outputs["affected_rows"], "0");
        assert!(!result.outputs.contains_key("rows"));
    }

    #[tokio::test]
    async fn invalid_sql_is_execution_failed() {
        let handler = SqlHandler::new();
        let result = handler
            .execute(&query_request("SELEKT broken"), &ctx(false))
            .await;
        assert_eq!(result.error_code, ErrorCode::ExecutionFailed);
        assert!(result.validate());
    }

    #[tokio::test]
    async fn sandbox_rejects_destructive_verbs_before_execution() {
        let handler = SqlHandler::new();
        handler.init(&ctx(true)).await.unwrap();
        for query in [
            "DROP TABLE users",
            "delete from users",
            "TRUNCATE users",
            "Alter Table users ADD c INTEGER",
            "CREATE TABLE t (id INTEGER)",
            "GRANT ALL ON x TO y",
            "revoke all on x from y",
        ] {
            let result = handler.execute(&query_request(query), &ctx(true)).await;
            assert_eq!(result.error_code, ErrorCode::PermissionDenied, "{query}");
        }
    }

    #[tokio::test]
    async fn sandbox_verb_match_is_whole_word() {
        let handler = SqlHandler::new();
        handler.init(&ctx(true)).await.unwrap();
        // Column names embedding a destructive verb must not trip the guard.
        let result = handler
            .execute(
                &query_request("SELECT 1 AS created_at, 2 AS dropped_count"),
                &ctx(true),
            )
            .await;
        assert!(result.is_success(), "{}", result.error_message);
    }

    #[tokio::test]
    async fn missing_query_fails_validation() {
        let handler = SqlHandler::new();
        let req = StepRequest {
            step_type: "sql.query".into(),
            ..Default::default()
        };
        let result = handler.execute(&req, &ctx(false)).await;
        assert_eq!(result.error_code, ErrorCode::MissingRequiredField);
    }

    #[test]
    fn destructive_verb_detection_is_word_based() {
        assert!(contains_destructive_verb("DROP TABLE x"));
        assert!(contains_destructive_verb("select 1; delete from x"));
        assert!(!contains_destructive_verb("SELECT created_at FROM t"));
        assert!(!contains_destructive_verb("SELECT * FROM regrants"));
    }
}
