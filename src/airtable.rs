//! Airtable table access and the analysis provider built on it.
//!
//! Only the handful of REST calls the dashboard pipeline needs: paged reads,
//! full-table replacement in batches, and single-record update/delete.

use chrono::DateTime;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::analysis::AnalysisDocument;
use crate::refresh::{DataProvider, FetchError};

pub const DEFAULT_AIRTABLE_URL: &str = "https://api.airtable.com/v0";
pub const ANALYSIS_TABLE: &str = "analysis_results";
pub const RESULT_FIELD: &str = "result";
pub const NUMBER_FIELD: &str = "number";
/// Airtable rejects create/delete batches larger than this.
pub const WRITE_BATCH_SIZE: usize = 10;

const TABLE_ALIASES: [(&str, &str); 4] = [
    ("거래대금상위", "top_volume"),
    ("등락률상위", "top_rate"),
    ("테마별주도주", "theme_leaders"),
    ("앤트로픽API응답", ANALYSIS_TABLE),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirtableConfig {
    pub api_url: String,
    pub api_key: String,
    pub base_id: String,
    pub timeout_ms: u64,
}

impl AirtableConfig {
    pub fn new(api_key: impl Into<String>, base_id: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_AIRTABLE_URL.to_string(),
            api_key: api_key.into(),
            base_id: base_id.into(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum AirtableError {
    #[error("failed to build HTTP client: {0}")]
    HttpClientBuild(String),
    #[error("invalid Airtable URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("Airtable returned HTTP {status} for {url}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode Airtable response from {url}: {message}")]
    Decode { url: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirtableRecord {
    pub id: String,
    #[serde(rename = "createdTime", default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ListRecordsResponse {
    #[serde(default)]
    records: Vec<AirtableRecord>,
    #[serde(default)]
    offset: Option<String>,
}

/// Maps the Korean table labels used by the analysis job onto Airtable table
/// names. Unknown names pass through unchanged.
pub fn resolve_table_name(name: &str) -> &str {
    TABLE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, table)| *table)
        .unwrap_or(name)
}

pub struct AirtableClient {
    client: Client,
    cfg: AirtableConfig,
}

impl AirtableClient {
    pub fn new(cfg: AirtableConfig) -> Result<Self, AirtableError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|err| AirtableError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client, cfg })
    }

    pub fn config(&self) -> &AirtableConfig {
        &self.cfg
    }

    /// Reads every page of `table`, stopping early once `limit` records are in
    /// hand. Records come back ordered by the `number` field when the table
    /// has one.
    pub fn list_records(
        &self,
        table: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AirtableRecord>, AirtableError> {
        let table = resolve_table_name(table);
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query = Vec::new();
            if let Some(limit) = limit {
                query.push(("maxRecords".to_string(), limit.to_string()));
            }
            if let Some(offset) = &offset {
                query.push(("offset".to_string(), offset.clone()));
            }

            let url = self.table_url(table, None, &query)?;
            let body = self.send(self.client.get(url.clone()), &url)?;
            let page: ListRecordsResponse = decode(&url, &body)?;
            debug!(
                component = "airtable",
                event = "airtable.list.page",
                table,
                records = page.records.len(),
                has_more = page.offset.is_some()
            );

            records.extend(page.records);
            offset = page.offset;

            let limit_reached = limit.map(|limit| records.len() >= limit).unwrap_or(false);
            if offset.is_none() || limit_reached {
                break;
            }
        }

        if let Some(limit) = limit {
            records.truncate(limit);
        }
        sort_by_number(&mut records);
        Ok(records)
    }

    /// Deletes every existing record in `table`, then inserts `rows`.
    pub fn replace_records(
        &self,
        table: &str,
        rows: &[Map<String, Value>],
    ) -> Result<usize, AirtableError> {
        let table = resolve_table_name(table);
        let existing = self.list_records(table, None)?;

        for chunk in existing.chunks(WRITE_BATCH_SIZE) {
            let query: Vec<(String, String)> = chunk
                .iter()
                .map(|record| ("records[]".to_string(), record.id.clone()))
                .collect();
            let url = self.table_url(table, None, &query)?;
            self.send(self.client.delete(url.clone()), &url)?;
        }

        let mut created = 0usize;
        for chunk in rows.chunks(WRITE_BATCH_SIZE) {
            let records: Vec<Value> = chunk
                .iter()
                .map(|fields| serde_json::json!({ "fields": fields }))
                .collect();
            let url = self.table_url(table, None, &[])?;
            let body = self.send(
                json_body(self.client.post(url.clone()), &serde_json::json!({ "records": records })),
                &url,
            )?;
            let response: ListRecordsResponse = decode(&url, &body)?;
            created += response.records.len();
        }

        info!(
            component = "airtable",
            event = "airtable.replace.finish",
            table,
            deleted = existing.len(),
            created
        );
        Ok(created)
    }

    pub fn update_record(
        &self,
        table: &str,
        record_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<AirtableRecord, AirtableError> {
        let table = resolve_table_name(table);
        let url = self.table_url(table, Some(record_id), &[])?;
        let body = self.send(
            json_body(
                self.client.patch(url.clone()),
                &serde_json::json!({ "fields": fields }),
            ),
            &url,
        )?;
        decode(&url, &body)
    }

    pub fn delete_record(&self, table: &str, record_id: &str) -> Result<(), AirtableError> {
        let table = resolve_table_name(table);
        let url = self.table_url(table, Some(record_id), &[])?;
        self.send(self.client.delete(url.clone()), &url)?;
        info!(
            component = "airtable",
            event = "airtable.record.deleted",
            table,
            record_id
        );
        Ok(())
    }

    fn table_url(
        &self,
        table: &str,
        record_id: Option<&str>,
        query: &[(String, String)],
    ) -> Result<Url, AirtableError> {
        let invalid = |message: String| AirtableError::InvalidUrl {
            url: self.cfg.api_url.clone(),
            message,
        };

        let mut url = Url::parse(&self.cfg.api_url).map_err(|err| invalid(err.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| invalid("URL cannot be a base".to_string()))?;
            segments.pop_if_empty().push(&self.cfg.base_id).push(table);
            if let Some(record_id) = record_id {
                segments.push(record_id);
            }
        }

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    fn send(&self, request: RequestBuilder, url: &Url) -> Result<Vec<u8>, AirtableError> {
        let response = request
            .bearer_auth(&self.cfg.api_key)
            .send()
            .map_err(|err| AirtableError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AirtableError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| AirtableError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

fn json_body(request: RequestBuilder, body: &Value) -> RequestBuilder {
    request
        .header(CONTENT_TYPE, "application/json")
        .body(body.to_string())
}

fn decode<T: for<'de> Deserialize<'de>>(url: &Url, body: &[u8]) -> Result<T, AirtableError> {
    serde_json::from_slice(body).map_err(|err| AirtableError::Decode {
        url: url.to_string(),
        message: err.to_string(),
    })
}

fn record_number(record: &AirtableRecord) -> Option<f64> {
    record.fields.get(NUMBER_FIELD).and_then(Value::as_f64)
}

/// Stable ascending sort on the `number` field; rows without one go last.
/// Tables without any numbered row keep their API order.
pub fn sort_by_number(records: &mut [AirtableRecord]) {
    if !records.iter().any(|record| record_number(record).is_some()) {
        return;
    }

    records.sort_by(|a, b| match (record_number(a), record_number(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// Picks the row whose payload the dashboard shows: the first numbered row
/// when rows are numbered, otherwise the most recently created one.
pub fn select_payload_record(records: &[AirtableRecord]) -> Option<&AirtableRecord> {
    if records.iter().any(|record| record_number(record).is_some()) {
        return records.first();
    }

    records
        .iter()
        .enumerate()
        .max_by_key(|(idx, record)| {
            let created = record
                .created_time
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|ts| ts.timestamp_millis());
            (created, std::cmp::Reverse(*idx))
        })
        .map(|(_, record)| record)
}

/// Reads the newest analysis payload from an Airtable table.
pub struct AirtableAnalysisProvider {
    client: AirtableClient,
    table: String,
}

impl AirtableAnalysisProvider {
    pub fn new(cfg: AirtableConfig, table: impl Into<String>) -> Result<Self, AirtableError> {
        Ok(Self {
            client: AirtableClient::new(cfg)?,
            table: table.into(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl DataProvider for AirtableAnalysisProvider {
    fn fetch(&self) -> Result<AnalysisDocument, FetchError> {
        let records = self
            .client
            .list_records(&self.table, None)
            .map_err(|err| FetchError::Transport(format!("데이터 가져오기 실패: {err}")))?;

        let record = select_payload_record(&records)
            .ok_or_else(|| FetchError::Unavailable("데이터를 찾을 수 없습니다.".to_string()))?;

        let payload = record
            .fields
            .get(RESULT_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FetchError::Unavailable(format!(
                    "record {} has no `{RESULT_FIELD}` text field",
                    record.id
                ))
            })?;

        AnalysisDocument::parse(payload)
    }
}
