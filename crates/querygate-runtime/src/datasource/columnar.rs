//! Columnar query service adapter
//!
//! Talks to the service's REST job API:
//!
//! ```text
//! POST /apiv2/login                       -> {"token": ...}        (username/password auth)
//! POST /api/v3/sql                        -> {"id": job_id}
//! GET  /api/v3/job/{id}                   -> {"jobState", "rowCount", "errorMessage"}
//! GET  /api/v3/job/{id}/results?offset&limit
//! GET  /apiv2/server_status               (liveness probe)
//! ```
//!
//! A pooled "connection" is an authenticated session. Sessions rejected with
//! 401/403 are reported as `ConnectionFailed`, which retires them from the pool.

use super::query::{QueryOptions, QueryResult, SourceType};
use super::sanitizer::{is_read_only_sql, SqlSanitizer};
use super::DataSource;
use crate::error::{GatewayError, Result};
use crate::pool::{duration_millis, ConnectionPool, Connector, PoolConfig, PoolMetricsSnapshot};
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use querygate_core::{Row, Value};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

/// Largest page the results endpoint serves
const MAX_PAGE_SIZE: usize = 500;

/// Columnar backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnarConfig {
    /// Base URL of the REST API, e.g. `http://dremio:9047`
    pub base_url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Personal access token, sent as a bearer token
    #[serde(default)]
    pub token: Option<String>,

    /// Space or source prepended to bare table names
    #[serde(default)]
    pub project: Option<String>,

    #[serde(
        default = "default_request_timeout",
        rename = "request_timeout_ms",
        with = "duration_millis"
    )]
    pub request_timeout: Duration,

    #[serde(
        default = "default_poll_interval",
        rename = "poll_interval_ms",
        with = "duration_millis"
    )]
    pub poll_interval: Duration,

    /// Rows fetched per results call
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default)]
    pub pool: PoolConfig,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}

impl ColumnarConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            password: None,
            token: None,
            project: None,
            request_timeout: default_request_timeout(),
            poll_interval: default_poll_interval(),
            page_size: default_page_size(),
            pool: PoolConfig::default(),
        }
    }
}

/// Authenticated session lent by the pool
#[derive(Debug, Clone)]
pub struct ColumnarSession {
    auth_header: String,
}

/// Rows to pull from a finished job
#[derive(Debug, Clone, Copy, Default)]
struct RowWindow {
    offset: usize,
    limit: Option<usize>,
}

impl RowWindow {
    fn from_options(opts: &QueryOptions) -> Self {
        Self {
            offset: opts.offset.unwrap_or(0),
            limit: opts.limit,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    job_state: String,
    #[serde(default)]
    row_count: Option<usize>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobResults {
    #[serde(default)]
    schema: Vec<ColumnSchema>,
    #[serde(default)]
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ColumnSchema {
    name: String,
    #[serde(rename = "type", default)]
    column_type: Option<ColumnType>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    name: String,
}

/// Opens sessions and runs jobs against the columnar service
pub struct ColumnarConnector {
    config: ColumnarConfig,
    client: Client,
}

impl ColumnarConnector {
    pub fn new(config: ColumnarConfig) -> Result<Self> {
        let has_password = config.username.is_some() && config.password.is_some();
        if config.token.is_none() && !has_password {
            return Err(GatewayError::InvalidConfig(
                "columnar source needs either a token or username and password".to_string(),
            ));
        }
        if config.base_url.trim().is_empty() {
            return Err(GatewayError::InvalidConfig(
                "columnar source needs a base_url".to_string(),
            ));
        }

        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn page_size(&self) -> usize {
        self.config.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/apiv2/login"))
            .json(&json!({ "userName": username, "password": password }))
            .send()
            .await
            .map_err(|e| GatewayError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::ConnectionFailed(format!(
                "login rejected with status {}",
                response.status()
            )));
        }

        let body: LoginResponse = response.json().await?;
        Ok(format!("_dremio{}", body.token))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        session: &ColumnarSession,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = request
            .header(AUTHORIZATION, &session.auth_header)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    GatewayError::ConnectionFailed(e.to_string())
                } else if e.is_timeout() {
                    GatewayError::Timeout(e.to_string())
                } else {
                    GatewayError::Http(e)
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GatewayError::ConnectionFailed(format!(
                "session rejected with status {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Query(format!(
                "columnar service returned {}: {}",
                status,
                error_message(&body)
            )));
        }

        Ok(response.json::<T>().await?)
    }

    async fn run_query(
        &self,
        session: &ColumnarSession,
        sql: &str,
        window: RowWindow,
    ) -> Result<Vec<Row>> {
        let mut body = json!({ "sql": sql });
        if let Some(project) = &self.config.project {
            body["context"] = json!([project]);
        }

        let submitted: SubmitResponse = self
            .send(session, self.client.post(self.url("/api/v3/sql")).json(&body))
            .await?;
        debug!("Submitted columnar job {}", submitted.id);

        let total = self.wait_for_job(session, &submitted.id).await?;
        self.fetch_rows(session, &submitted.id, total, window).await
    }

    async fn wait_for_job(&self, session: &ColumnarSession, job_id: &str) -> Result<usize> {
        let path = format!("/api/v3/job/{}", urlencoding::encode(job_id));
        loop {
            let status: JobStatus = self.send(session, self.client.get(self.url(&path))).await?;
            match status.job_state.as_str() {
                "COMPLETED" => return Ok(status.row_count.unwrap_or(0)),
                "FAILED" => {
                    return Err(GatewayError::Query(
                        status
                            .error_message
                            .unwrap_or_else(|| format!("job {} failed", job_id)),
                    ))
                }
                "CANCELED" | "CANCELLED" => {
                    return Err(GatewayError::Query(format!("job {} was cancelled", job_id)))
                }
                _ => sleep(self.config.poll_interval).await,
            }
        }
    }

    async fn fetch_rows(
        &self,
        session: &ColumnarSession,
        job_id: &str,
        total: usize,
        window: RowWindow,
    ) -> Result<Vec<Row>> {
        let end = match window.limit {
            Some(limit) => window.offset.saturating_add(limit).min(total),
            None => total,
        };
        let path = format!("/api/v3/job/{}/results", urlencoding::encode(job_id));

        let mut rows = Vec::with_capacity(end.saturating_sub(window.offset));
        let mut offset = window.offset;
        while offset < end {
            let limit = (end - offset).min(self.page_size());
            let request = self
                .client
                .get(self.url(&path))
                .query(&[("offset", offset), ("limit", limit)]);
            let page: JobResults = self.send(session, request).await?;
            if page.rows.is_empty() {
                break;
            }

            offset += page.rows.len();
            rows.extend(page.rows.into_iter().map(|r| to_row(&page.schema, r)));
        }

        Ok(rows)
    }
}

#[async_trait]
impl Connector for ColumnarConnector {
    type Connection = ColumnarSession;

    async fn connect(&self) -> Result<ColumnarSession> {
        let auth_header = match (&self.config.username, &self.config.password, &self.config.token) {
            (Some(user), Some(pass), _) => self.login(user, pass).await?,
            (_, _, Some(token)) => format!("Bearer {}", token),
            _ => {
                return Err(GatewayError::InvalidConfig(
                    "no credentials configured".to_string(),
                ))
            }
        };
        Ok(ColumnarSession { auth_header })
    }

    async fn ping(&self, session: &ColumnarSession) -> Result<()> {
        let _: serde_json::Value = self
            .send(session, self.client.get(self.url("/apiv2/server_status")))
            .await?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.config.base_url.clone()
    }
}

/// Pooled data source over the columnar query service
pub struct ColumnarSource {
    pool: Arc<ConnectionPool<ColumnarConnector>>,
    sanitizer: SqlSanitizer,
    project: Option<String>,
    request_timeout: Duration,
}

impl ColumnarSource {
    pub async fn new(config: ColumnarConfig) -> Result<Self> {
        let project = config.project.clone();
        let request_timeout = config.request_timeout;
        let pool_config = config.pool.clone();

        let connector = ColumnarConnector::new(config)?;
        let pool = ConnectionPool::new(connector, pool_config).await?;

        Ok(Self {
            pool,
            sanitizer: SqlSanitizer::new(),
            project,
            request_timeout,
        })
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<ColumnarConnector>> {
        &self.pool
    }

    fn qualify(&self, table: &str) -> String {
        match &self.project {
            Some(project) if !table.contains('.') => format!("{}.{}", project, table),
            _ => table.to_string(),
        }
    }

    async fn run(&self, sql: &str, window: RowWindow, opts: &QueryOptions) -> Result<QueryResult> {
        let started = Instant::now();
        let budget = opts.timeout().unwrap_or(self.request_timeout);
        let connector = self.pool.connector();

        let rows = timeout(
            budget,
            self.pool.with_connection(|session| async move {
                connector.run_query(&session, sql, window).await
            }),
        )
        .await
        .map_err(|_| GatewayError::Timeout(format!("columnar query exceeded {:?}", budget)))??;

        info!(
            "Columnar query completed: {} rows in {:?}",
            rows.len(),
            started.elapsed()
        );
        Ok(QueryResult::new(rows, SourceType::Columnar).with_query_time(started.elapsed()))
    }
}

#[async_trait]
impl DataSource for ColumnarSource {
    async fn execute_query(&self, query: &str, opts: &QueryOptions) -> Result<QueryResult> {
        if !is_read_only_sql(query) {
            return Err(GatewayError::InvalidRequest(
                "only SELECT queries are allowed".to_string(),
            ));
        }
        self.run(query, RowWindow::from_options(opts), opts).await
    }

    async fn get_data(&self, table: &str, opts: &QueryOptions) -> Result<QueryResult> {
        let table = self.qualify(table);
        let sql = self
            .sanitizer
            .build_table_query(&table, opts, |t| t.to_string())?;
        self.run(&sql, RowWindow::default(), opts).await
    }

    async fn test_connection(&self) -> Result<()> {
        let window = RowWindow {
            offset: 0,
            limit: Some(1),
        };
        self.run("SELECT 1", window, &QueryOptions::default())
            .await
            .map(|_| ())
    }

    fn source_type(&self) -> SourceType {
        SourceType::Columnar
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }

    fn pool_metrics(&self) -> Option<PoolMetricsSnapshot> {
        Some(self.pool.metrics())
    }
}

fn to_row(schema: &[ColumnSchema], mut raw: serde_json::Map<String, serde_json::Value>) -> Row {
    if schema.is_empty() {
        return raw.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
    }

    schema
        .iter()
        .map(|column| {
            let value = raw.remove(&column.name).unwrap_or(serde_json::Value::Null);
            let type_name = column.column_type.as_ref().map(|t| t.name.as_str());
            (column.name.clone(), convert(value, type_name))
        })
        .collect()
}

fn convert(value: serde_json::Value, type_name: Option<&str>) -> Value {
    match (type_name, &value) {
        (Some("TIMESTAMP"), serde_json::Value::String(s)) => parse_timestamp(s)
            .map(Value::Timestamp)
            .unwrap_or_else(|| Value::String(s.clone())),
        _ => Value::from(value),
    }
}

fn parse_timestamp(s: &str) -> Option<chrono::DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("errorMessage").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn token_config(url: &str) -> ColumnarConfig {
        ColumnarConfig {
            token: Some("pat-123".to_string()),
            pool: PoolConfig {
                min_connections: 0,
                max_connections: 2,
                ..Default::default()
            },
            ..ColumnarConfig::new(url)
        }
    }

    fn mock_job(server: &mut mockito::ServerGuard, rows: &str, row_count: usize) -> Vec<mockito::Mock> {
        vec![
            server
                .mock("POST", "/api/v3/sql")
                .match_header("authorization", "Bearer pat-123")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(r#"{"id": "job-1"}"#)
                .create(),
            server
                .mock("GET", "/api/v3/job/job-1")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(format!(r#"{{"jobState": "COMPLETED", "rowCount": {}}}"#, row_count))
                .create(),
            server
                .mock("GET", "/api/v3/job/job-1/results")
                .match_query(Matcher::Any)
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(rows.to_string())
                .create(),
        ]
    }

    #[test]
    fn test_requires_credentials() {
        let result = ColumnarConnector::new(ColumnarConfig::new("http://localhost:9047"));
        assert!(matches!(result, Err(GatewayError::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
base_url: "http://dremio:9047"
username: analyst
password: secret
project: sales
request_timeout_ms: 5000
pool:
  max_connections: 4
  min_connections: 1
"#;
        let config: ColumnarConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.project.as_deref(), Some("sales"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.page_size, 500);
    }

    #[test]
    fn test_rows_follow_schema_order() {
        let results: JobResults = serde_json::from_str(
            r#"{
                "schema": [
                    {"name": "zeta", "type": {"name": "BIGINT"}},
                    {"name": "alpha", "type": {"name": "TIMESTAMP"}},
                    {"name": "missing", "type": {"name": "VARCHAR"}}
                ],
                "rows": [{"alpha": "2024-01-02 03:04:05.000", "zeta": 9}]
            }"#,
        )
        .unwrap();

        let JobResults { schema, rows } = results;
        let row = to_row(&schema, rows.into_iter().next().unwrap());
        let columns: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["zeta", "alpha", "missing"]);
        assert_eq!(row["zeta"], Value::Integer(9));
        assert!(matches!(row["alpha"], Value::Timestamp(_)));
        assert_eq!(row["missing"], Value::Null);
    }

    #[tokio::test]
    async fn test_execute_query_runs_job() {
        let mut server = Server::new_async().await;
        let _mocks = mock_job(
            &mut server,
            r#"{"rowCount": 2, "schema": [{"name": "id"}], "rows": [{"id": 1}, {"id": 2}]}"#,
            2,
        );

        let source = ColumnarSource::new(token_config(&server.url())).await.unwrap();
        let result = source
            .execute_query("SELECT id FROM t", &QueryOptions::default())
            .await
            .unwrap();

        assert_eq!(result.count, 2);
        assert_eq!(result.source, SourceType::Columnar);
        assert_eq!(result.rows[1]["id"], Value::Integer(2));

        let metrics = source.pool_metrics().unwrap();
        assert_eq!(metrics.total_connections, 1);
        assert_eq!(metrics.active_connections, 0);
    }

    #[tokio::test]
    async fn test_rejects_write_statements() {
        let source = ColumnarSource::new(token_config("http://127.0.0.1:9"))
            .await
            .unwrap();

        let err = source
            .execute_query("DROP TABLE t", &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_failed_job_is_query_error() {
        let mut server = Server::new_async().await;
        let _submit = server
            .mock("POST", "/api/v3/sql")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "job-9"}"#)
            .create();
        let _status = server
            .mock("GET", "/api/v3/job/job-9")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jobState": "FAILED", "errorMessage": "Table 'nope' not found"}"#)
            .create();

        let source = ColumnarSource::new(token_config(&server.url())).await.unwrap();
        let err = source
            .execute_query("SELECT * FROM nope", &QueryOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Query(ref m) if m.contains("not found")));
    }

    #[tokio::test]
    async fn test_rejected_session_is_retired() {
        let mut server = Server::new_async().await;
        let _submit = server.mock("POST", "/api/v3/sql").with_status(401).create();

        let source = ColumnarSource::new(token_config(&server.url())).await.unwrap();
        let err = source
            .execute_query("SELECT 1", &QueryOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::ConnectionFailed(_)));
        assert_eq!(source.pool_metrics().unwrap().pool_size, 0);
    }

    #[tokio::test]
    async fn test_password_login_sets_session_header() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/apiv2/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token": "abc"}"#)
            .create();
        let _status = server
            .mock("GET", "/apiv2/server_status")
            .match_header("authorization", "_dremioabc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "OK"}"#)
            .create();

        let config = ColumnarConfig {
            username: Some("analyst".to_string()),
            password: Some("secret".to_string()),
            ..token_config(&server.url())
        };
        let connector = ColumnarConnector::new(config).unwrap();
        let session = connector.connect().await.unwrap();
        connector.ping(&session).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_data_prefixes_project() {
        let mut server = Server::new_async().await;
        let submit = server
            .mock("POST", "/api/v3/sql")
            .match_body(Matcher::PartialJson(json!({
                "sql": "SELECT * FROM sales.orders LIMIT 10"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "job-2"}"#)
            .create();
        let _status = server
            .mock("GET", "/api/v3/job/job-2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jobState": "COMPLETED", "rowCount": 0}"#)
            .create();

        let config = ColumnarConfig {
            project: Some("sales".to_string()),
            ..token_config(&server.url())
        };
        let source = ColumnarSource::new(config).await.unwrap();
        let result = source
            .get_data("orders", &QueryOptions::page(10, 0))
            .await
            .unwrap();

        assert!(result.is_empty());
        submit.assert();
    }
}
