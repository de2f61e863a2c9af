//! Cloud data warehouse adapter
//!
//! Uses the warehouse's REST jobs API: `jobs.query` to run a statement and
//! `jobs.getQueryResults` to poll incomplete jobs and page through results.
//! Every statement carries a `maximumBytesBilled` cap so a runaway scan fails
//! instead of billing.

use super::query::{QueryOptions, QueryResult, SourceType};
use super::sanitizer::{is_read_only_sql, SqlSanitizer};
use super::DataSource;
use crate::error::{GatewayError, Result};
use crate::pool::duration_millis;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use querygate_core::{Row, Value};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

const BYTES_PER_TB: u64 = 1_099_511_627_776;
const DEFAULT_TABLE_LIMIT: usize = 100;
const MAX_PAGE_SIZE: usize = 10_000;

/// Warehouse configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub project_id: String,

    /// Dataset prepended to bare table names
    #[serde(default)]
    pub dataset_id: Option<String>,

    /// OAuth access token
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-statement billing cap in bytes
    #[serde(default = "default_maximum_bytes_billed")]
    pub maximum_bytes_billed: u64,

    #[serde(
        default = "default_request_timeout",
        rename = "request_timeout_ms",
        with = "duration_millis"
    )]
    pub request_timeout: Duration,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_base_url() -> String {
    "https://bigquery.googleapis.com".to_string()
}

fn default_maximum_bytes_billed() -> u64 {
    BYTES_PER_TB * 10
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}

impl WarehouseConfig {
    pub fn new(project_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: None,
            access_token: Some(access_token.into()),
            location: None,
            base_url: default_base_url(),
            maximum_bytes_billed: default_maximum_bytes_billed(),
            request_timeout: default_request_timeout(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    total_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type", default)]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: serde_json::Value,
}

/// Data source over the warehouse REST API
pub struct WarehouseSource {
    config: WarehouseConfig,
    access_token: String,
    client: Client,
    sanitizer: SqlSanitizer,
}

impl WarehouseSource {
    pub fn new(config: WarehouseConfig) -> Result<Self> {
        if config.project_id.trim().is_empty() {
            return Err(GatewayError::InvalidConfig(
                "warehouse source needs a project_id".to_string(),
            ));
        }
        let access_token = config
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                GatewayError::InvalidConfig("warehouse source needs an access_token".to_string())
            })?;

        let client = Client::builder().timeout(config.request_timeout).build()?;
        info!("Warehouse source ready for project {}", config.project_id);

        Ok(Self {
            config,
            access_token,
            client,
            sanitizer: SqlSanitizer::new(),
        })
    }

    fn queries_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.project_id)
        )
    }

    fn page_size(&self) -> usize {
        self.config.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    fn qualify(&self, table: &str) -> String {
        let dots = table.matches('.').count();
        match (&self.config.dataset_id, dots) {
            (Some(dataset), 0) => format!("{}.{}.{}", self.config.project_id, dataset, table),
            (_, 1) => format!("{}.{}", self.config.project_id, table),
            _ => table.to_string(),
        }
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<QueryResponse> {
        let response = request
            .bearer_auth(&self.access_token)
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
                "warehouse rejected credentials with status {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Query(format!(
                "warehouse returned {}: {}",
                status,
                error_message(&body)
            )));
        }

        Ok(response.json::<QueryResponse>().await?)
    }

    async fn run(&self, sql: &str, offset: usize, limit: Option<usize>) -> Result<Vec<Row>> {
        let first_page = if offset == 0 {
            limit.unwrap_or(usize::MAX).min(self.page_size())
        } else {
            0
        };

        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "maxResults": first_page,
            "timeoutMs": self.config.request_timeout.as_millis() as u64,
            "maximumBytesBilled": self.config.maximum_bytes_billed.to_string(),
        });
        if let Some(location) = &self.config.location {
            body["location"] = json!(location);
        }

        let response = self
            .call(self.client.post(self.queries_url()).json(&body))
            .await?;

        let job = response.job_reference.as_ref().ok_or_else(|| {
            GatewayError::Query("warehouse response carried no job reference".to_string())
        })?;
        let job_id = job.job_id.clone();
        let location = job.location.clone().or_else(|| self.config.location.clone());
        debug!("Warehouse job {} submitted", job_id);

        let mut schema = response.schema.clone();
        let mut total = parse_total(&response.total_rows);
        let mut complete = response.job_complete;
        let mut rows: Vec<Row> = Vec::new();
        if complete && offset == 0 {
            if let Some(schema) = &schema {
                rows.extend(response.rows.into_iter().map(|r| to_row(&schema.fields, r)));
            }
        }

        loop {
            let wanted = limit.map(|l| l.saturating_sub(rows.len()));
            if wanted == Some(0) {
                break;
            }
            let start = offset + rows.len();
            if complete && total.is_some_and(|t| start >= t) {
                break;
            }

            let max_results = wanted.unwrap_or(usize::MAX).min(self.page_size());
            let mut request = self
                .client
                .get(format!("{}/{}", self.queries_url(), urlencoding::encode(&job_id)))
                .query(&[
                    ("startIndex", start.to_string()),
                    ("maxResults", max_results.to_string()),
                    ("timeoutMs", self.config.request_timeout.as_millis().to_string()),
                ]);
            if let Some(location) = &location {
                request = request.query(&[("location", location)]);
            }

            let page = self.call(request).await?;
            if !page.job_complete {
                complete = false;
                sleep(Duration::from_millis(200)).await;
                continue;
            }
            complete = true;
            if page.schema.is_some() {
                schema = page.schema.clone();
            }
            total = parse_total(&page.total_rows).or(total);
            if page.rows.is_empty() {
                break;
            }

            let fields = schema.as_ref().map(|s| s.fields.as_slice()).unwrap_or(&[]);
            rows.extend(page.rows.into_iter().map(|r| to_row(fields, r)));
        }

        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn timed(&self, sql: &str, offset: usize, limit: Option<usize>, opts: &QueryOptions) -> Result<QueryResult> {
        let started = Instant::now();
        let budget = opts.timeout().unwrap_or(self.config.request_timeout);

        let rows = timeout(budget, self.run(sql, offset, limit))
            .await
            .map_err(|_| GatewayError::Timeout(format!("warehouse query exceeded {:?}", budget)))??;

        info!(
            "Warehouse query completed: {} rows in {:?}",
            rows.len(),
            started.elapsed()
        );
        Ok(QueryResult::new(rows, SourceType::Warehouse).with_query_time(started.elapsed()))
    }
}

#[async_trait]
impl DataSource for WarehouseSource {
    async fn execute_query(&self, query: &str, opts: &QueryOptions) -> Result<QueryResult> {
        if !is_read_only_sql(query) {
            return Err(GatewayError::InvalidRequest(
                "only SELECT queries are allowed".to_string(),
            ));
        }
        self.timed(query, opts.offset.unwrap_or(0), opts.limit, opts)
            .await
    }

    async fn get_data(&self, table: &str, opts: &QueryOptions) -> Result<QueryResult> {
        let table = self.qualify(table);
        let bounded = QueryOptions {
            limit: Some(opts.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_TABLE_LIMIT)),
            ..opts.clone()
        };
        let sql = self
            .sanitizer
            .build_table_query(&table, &bounded, |t| format!("`{}`", t))?;
        self.timed(&sql, 0, None, opts).await
    }

    async fn test_connection(&self) -> Result<()> {
        self.timed("SELECT 1", 0, Some(1), &QueryOptions::default())
            .await
            .map(|_| ())
    }

    fn source_type(&self) -> SourceType {
        SourceType::Warehouse
    }

    async fn close(&self) -> Result<()> {
        debug!("Warehouse source for {} closed", self.config.project_id);
        Ok(())
    }
}

fn parse_total(total: &Option<String>) -> Option<usize> {
    total.as_deref().and_then(|t| t.parse().ok())
}

fn to_row(fields: &[FieldSchema], row: TableRow) -> Row {
    fields
        .iter()
        .zip(row.f.into_iter().chain(std::iter::repeat_with(|| TableCell {
            v: serde_json::Value::Null,
        })))
        .map(|(field, cell)| (field.name.clone(), convert_field(field, cell.v)))
        .collect()
}

fn convert_field(field: &FieldSchema, raw: serde_json::Value) -> Value {
    if field.mode.as_deref() == Some("REPEATED") {
        let serde_json::Value::Array(items) = raw else {
            return Value::Array(Vec::new());
        };
        return Value::Array(
            items
                .into_iter()
                .map(|item| {
                    let inner = item.get("v").cloned().unwrap_or(serde_json::Value::Null);
                    convert_scalar(field, inner)
                })
                .collect(),
        );
    }
    convert_scalar(field, raw)
}

fn convert_scalar(field: &FieldSchema, raw: serde_json::Value) -> Value {
    if raw.is_null() {
        return Value::Null;
    }

    match field.field_type.as_str() {
        "RECORD" | "STRUCT" => {
            let nested: TableRow = serde_json::from_value(raw).unwrap_or(TableRow { f: Vec::new() });
            Value::Object(to_row(&field.fields, nested))
        }
        _ => {
            let serde_json::Value::String(text) = raw else {
                return Value::from(raw);
            };
            match field.field_type.as_str() {
                "INTEGER" | "INT64" => text
                    .parse::<i64>()
                    .map(Value::Integer)
                    .unwrap_or(Value::String(text)),
                "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text
                    .parse::<f64>()
                    .map(Value::Float)
                    .unwrap_or(Value::String(text)),
                "BOOLEAN" | "BOOL" => match text.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => Value::String(text),
                },
                "TIMESTAMP" => text
                    .parse::<f64>()
                    .ok()
                    .and_then(|secs| DateTime::<Utc>::from_timestamp_micros((secs * 1e6).round() as i64))
                    .map(Value::Timestamp)
                    .unwrap_or(Value::String(text)),
                _ => Value::String(text),
            }
        }
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}
