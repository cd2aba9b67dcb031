//! Common test utilities for hrana-client integration tests.
//!
//! # Fake server
//!
//! [`FakeServer`] is an in-process Hrana server built with axum. It serves
//! `POST /v2/pipeline` and `POST /v3/cursor` on an ephemeral port and runs a
//! tiny canned SQL engine:
//!
//! | SQL                                | Result                                    |
//! |------------------------------------|-------------------------------------------|
//! | `SELECT 1`                         | one column, one row, integer `1`          |
//! | `SELECT ?...`                      | one row echoing the bound arguments       |
//! | `SELECT 'text'`                    | one row with that text (`'slow'` waits)   |
//! | `SELECT * FROM items`              | three rows `(id INTEGER, name TEXT)`      |
//! | anything mentioning `fail`/`missing` | a `SQLITE_CONSTRAINT`/`SQLITE_ERROR` error |
//! | anything else                      | no columns, one affected row              |
//!
//! Every executed statement, request body and `Authorization` header is
//! recorded so tests can assert on what reached the server.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use hrana_client::{BatchMode, Client, ClientConfig, Connection};

/// How long the server waits before answering `SELECT 'slow'`.
pub const SLOW_QUERY_DELAY: Duration = Duration::from_millis(300);

/// How the server treats incoming requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Answer normally
    Normal,
    /// Accept requests and never answer
    Hang,
    /// Require `Authorization: Bearer <token>`
    RequireToken(String),
    /// Answer `batch` requests with a plain-text 500, like a server that
    /// never implemented them
    NoBatch,
    /// Answer every request with this status and an HTML page, like a
    /// gateway whose upstream is down
    Status(u16),
}

/// Everything the server observed.
#[derive(Default)]
pub struct Recorded {
    /// Request bodies in arrival order
    pub bodies: Mutex<Vec<Value>>,
    /// `Authorization` header of each request
    pub auth_headers: Mutex<Vec<Option<String>>>,
    /// SQL of every statement the engine ran, in order
    pub executed: Mutex<Vec<String>>,
}

impl Recorded {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().unwrap().clone()
    }

    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.auth_headers.lock().unwrap().clone()
    }
}

struct ServerState {
    behavior: Behavior,
    recorded: Arc<Recorded>,
    next_baton: AtomicU64,
}

impl ServerState {
    fn new_baton(&self) -> String {
        format!("baton-{}", self.next_baton.fetch_add(1, Ordering::SeqCst))
    }
}

/// A running fake server.
pub struct FakeServer {
    pub addr: SocketAddr,
    pub recorded: Arc<Recorded>,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::with_behavior(Behavior::Normal).await
    }

    pub async fn with_behavior(behavior: Behavior) -> Self {
        let recorded = Arc::new(Recorded::default());
        let state = Arc::new(ServerState {
            behavior,
            recorded: Arc::clone(&recorded),
            next_baton: AtomicU64::new(1),
        });

        let app = Router::new()
            .route("/v2/pipeline", post(pipeline_handler))
            .route("/v3/cursor", post(cursor_handler))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            recorded,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.url())
    }

    pub fn client(&self) -> Client {
        Client::new(self.config()).unwrap()
    }

    pub fn connection(&self) -> Connection {
        Connection::open(&self.config()).unwrap()
    }

    pub fn connection_with(&self, batch_mode: BatchMode, timeout_ms: u64) -> Connection {
        let config = ClientConfig::builder()
            .url(&self.url())
            .batch_mode(batch_mode)
            .timeout_ms(timeout_ms)
            .build()
            .unwrap();
        Connection::open(&config).unwrap()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// URL of a local port with nothing listening on it.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

// ============================================================================
// Handlers
// ============================================================================

/// Record the request and check its credentials.
fn admit(state: &ServerState, headers: &HeaderMap, body: &Value) -> Result<(), Response> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.recorded.auth_headers.lock().unwrap().push(auth.clone());
    state.recorded.bodies.lock().unwrap().push(body.clone());

    if let Behavior::RequireToken(token) = &state.behavior {
        if auth.as_deref() != Some(format!("Bearer {}", token).as_str()) {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"message": "Unauthorized", "code": "UNAUTHORIZED"})),
            )
                .into_response());
        }
    }
    Ok(())
}

async fn pipeline_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = admit(&state, &headers, &body) {
        return response;
    }
    match &state.behavior {
        Behavior::Hang => std::future::pending::<()>().await,
        Behavior::Status(status) => return gateway_page(*status),
        Behavior::NoBatch if has_batch_request(&body) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "not implemented").into_response();
        }
        _ => {}
    }

    let mut baton = Some(state.new_baton());
    let mut results = Vec::new();
    for request in body["requests"].as_array().cloned().unwrap_or_default() {
        let result = match request["type"].as_str() {
            Some("execute") => match execute_stmt(&state, &request["stmt"]).await {
                Ok(result) => ok("execute", json!({"result": result})),
                Err(error) => error_result(error),
            },
            Some("batch") => {
                let result = execute_batch(&state, &request["batch"]).await;
                ok("batch", json!({"result": result}))
            }
            Some("sequence") => {
                for sql in request["sql"].as_str().unwrap_or_default().split(';') {
                    if !sql.trim().is_empty() {
                        record(&state, sql.trim());
                    }
                }
                ok("sequence", json!({}))
            }
            Some("describe") => ok(
                "describe",
                json!({"result": {
                    "params": [],
                    "cols": [{"name": "id", "decltype": "INTEGER"}],
                    "is_explain": false,
                    "is_readonly": true
                }}),
            ),
            Some("get_autocommit") => ok("get_autocommit", json!({"is_autocommit": true})),
            Some("close") => {
                baton = None;
                ok("close", json!({}))
            }
            other => error_result(json!({
                "message": format!("unknown request type {:?}", other),
                "code": "PROTOCOL_ERROR"
            })),
        };
        results.push(result);
    }

    Json(json!({"baton": baton, "base_url": null, "results": results})).into_response()
}

fn has_batch_request(body: &Value) -> bool {
    body["requests"]
        .as_array()
        .is_some_and(|requests| requests.iter().any(|r| r["type"] == "batch"))
}

fn gateway_page(status: u16) -> Response {
    let status = StatusCode::from_u16(status).unwrap();
    let page = format!(
        "<html><body><h1>{}</h1><p>The upstream server is not responding.</p></body></html>",
        status
    );
    (status, [(header::CONTENT_TYPE, "text/html")], page).into_response()
}

async fn cursor_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = admit(&state, &headers, &body) {
        return response;
    }

    let mut lines = vec![json!({"baton": state.new_baton(), "base_url": null})];
    let steps = body["batch"]["steps"].as_array().cloned().unwrap_or_default();
    for (index, step) in steps.iter().enumerate() {
        match execute_stmt(&state, &step["stmt"]).await {
            Ok(result) => {
                lines.push(json!({"type": "step_begin", "step": index, "cols": result["cols"]}));
                for row in result["rows"].as_array().cloned().unwrap_or_default() {
                    lines.push(json!({"type": "row", "row": row}));
                }
                lines.push(json!({
                    "type": "step_end",
                    "affected_row_count": result["affected_row_count"],
                    "last_insert_rowid": result["last_insert_rowid"]
                }));
            }
            Err(error) => lines.push(json!({"type": "step_error", "step": index, "error": error})),
        }
    }

    let body: String = lines.iter().map(|line| format!("{}\n", line)).collect();
    ([(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

fn ok(kind: &str, fields: Value) -> Value {
    let mut response = fields;
    response["type"] = json!(kind);
    json!({"type": "ok", "response": response})
}

fn error_result(error: Value) -> Value {
    json!({"type": "error", "error": error})
}

fn record(state: &ServerState, sql: &str) {
    state.recorded.executed.lock().unwrap().push(sql.to_string());
}

// ============================================================================
// Canned SQL engine
// ============================================================================

fn integer(value: i64) -> Value {
    json!({"type": "integer", "value": value.to_string()})
}

fn text(value: &str) -> Value {
    json!({"type": "text", "value": value})
}

fn rows_result(cols: Value, rows: Value) -> Value {
    let rows_read = rows.as_array().map(Vec::len).unwrap_or(0);
    json!({
        "cols": cols,
        "rows": rows,
        "affected_row_count": 0,
        "last_insert_rowid": null,
        "rows_read": rows_read,
        "rows_written": 0,
        "query_duration_ms": 0.1
    })
}

async fn execute_stmt(state: &ServerState, stmt: &Value) -> Result<Value, Value> {
    let sql = stmt["sql"].as_str().unwrap_or_default().trim().to_string();
    record(state, &sql);
    let lower = sql.to_ascii_lowercase();

    if lower.contains("fail") {
        return Err(json!({"message": "UNIQUE constraint failed: t.id", "code": "SQLITE_CONSTRAINT"}));
    }
    if lower.contains("missing") {
        return Err(json!({"message": "no such table: missing", "code": "SQLITE_ERROR"}));
    }

    if lower == "select 1" {
        return Ok(rows_result(
            json!([{"name": "1", "decltype": null}]),
            json!([[integer(1)]]),
        ));
    }
    if lower.starts_with("select ?") {
        let args = stmt["args"].as_array().cloned().unwrap_or_default();
        let cols: Vec<Value> = (1..=args.len())
            .map(|i| json!({"name": format!("?{}", i), "decltype": null}))
            .collect();
        return Ok(rows_result(json!(cols), json!([args])));
    }
    if let Some(literal) = sql
        .strip_prefix("SELECT '")
        .and_then(|rest| rest.strip_suffix('\''))
    {
        if literal == "slow" {
            tokio::time::sleep(SLOW_QUERY_DELAY).await;
        }
        return Ok(rows_result(
            json!([{"name": format!("'{}'", literal), "decltype": null}]),
            json!([[text(literal)]]),
        ));
    }
    if lower == "select * from items" {
        return Ok(rows_result(
            json!([
                {"name": "id", "decltype": "INTEGER"},
                {"name": "name", "decltype": "TEXT"}
            ]),
            json!([
                [integer(1), text("one")],
                [integer(2), text("two")],
                [integer(3), {"type": "null"}]
            ]),
        ));
    }

    Ok(json!({
        "cols": [],
        "rows": [],
        "affected_row_count": 1,
        "last_insert_rowid": "1"
    }))
}

fn condition_holds(cond: &Value, results: &[Option<Value>], errors: &[Option<Value>]) -> bool {
    let step = |c: &Value| c["step"].as_u64().unwrap_or(u64::MAX) as usize;
    match cond["type"].as_str() {
        Some("ok") => results.get(step(cond)).map_or(false, Option::is_some),
        Some("error") => errors.get(step(cond)).map_or(false, Option::is_some),
        Some("not") => !condition_holds(&cond["cond"], results, errors),
        Some("and") => cond["conds"]
            .as_array()
            .map_or(true, |conds| conds.iter().all(|c| condition_holds(c, results, errors))),
        Some("or") => cond["conds"]
            .as_array()
            .map_or(false, |conds| conds.iter().any(|c| condition_holds(c, results, errors))),
        Some("is_autocommit") => false,
        _ => false,
    }
}

async fn execute_batch(state: &ServerState, batch: &Value) -> Value {
    let steps = batch["steps"].as_array().cloned().unwrap_or_default();
    let mut results: Vec<Option<Value>> = Vec::with_capacity(steps.len());
    let mut errors: Vec<Option<Value>> = Vec::with_capacity(steps.len());

    for step in &steps {
        let runs = match step.get("condition") {
            None | Some(Value::Null) => true,
            Some(cond) => condition_holds(cond, &results, &errors),
        };
        if !runs {
            results.push(None);
            errors.push(None);
            continue;
        }
        match execute_stmt(state, &step["stmt"]).await {
            Ok(result) => {
                results.push(Some(result));
                errors.push(None);
            }
            Err(error) => {
                results.push(None);
                errors.push(Some(error));
            }
        }
    }

    json!({"step_results": results, "step_errors": errors})
}
