//! Planned-article rows (Google Sheets)
//!
//! The sheet is read-only input: a header row naming columns, then one row
//! per planned article. Columns are located by configured header names, exact
//! match first, then case-insensitive. Missing headers are a schema error for
//! row listing; snapshots are best-effort and degrade to nothing.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use draftflow_common::config::SheetsConfig;
use draftflow_common::{Result, WorkflowError};

/// One planned article row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRow {
    pub keyword: String,
    pub planned_date: String,
}

/// Tabular planning source contract.
#[async_trait]
pub trait TabularSource: Send + Sync {
    /// Rows planned for the given date (rows with blank keyword or date are
    /// skipped).
    async fn planned_rows_for(&self, date: &str) -> Result<Vec<PlannedRow>>;

    /// Best-effort snapshot of the full row matching (keyword, date), keyed
    /// by header name. Returns `None` when the row or headers cannot be
    /// found; never fails the caller.
    async fn snapshot_for(&self, keyword: &str, date: &str) -> Option<Map<String, Value>>;
}

/// Google Sheets REST implementation (API-key read access).
pub struct SheetsClient {
    client: reqwest::Client,
    config: SheetsConfig,
}

impl SheetsClient {
    pub fn new(config: SheetsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(WorkflowError::Http)?;
        Ok(Self { client, config })
    }

    async fn read_all_values(&self) -> Result<Vec<Vec<String>>> {
        let range = format!("{}!A1:Z", self.config.worksheet_name);
        let url = format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}",
            self.config.spreadsheet_id, range
        );

        let resp = self
            .client
            .get(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(WorkflowError::Schema {
                message: format!("values read HTTP {status}: {body}"),
            });
        }

        let payload: Value = resp.json().await?;
        let values = payload
            .get("values")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .map(|cells| {
                                cells
                                    .iter()
                                    .map(|c| match c {
                                        Value::String(s) => s.clone(),
                                        other => other.to_string(),
                                    })
                                    .collect()
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(values)
    }
}

#[async_trait]
impl TabularSource for SheetsClient {
    async fn planned_rows_for(&self, date: &str) -> Result<Vec<PlannedRow>> {
        let values = self.read_all_values().await?;
        parse_planned_rows(
            &values,
            &self.config.header_keyword,
            &self.config.header_planned_date,
            date,
        )
    }

    async fn snapshot_for(&self, keyword: &str, date: &str) -> Option<Map<String, Value>> {
        let values = match self.read_all_values().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "sheet snapshot read failed");
                return None;
            }
        };
        snapshot_from(
            &values,
            &self.config.header_keyword,
            &self.config.header_planned_date,
            keyword,
            date,
        )
    }
}

/// Find a column by header name: exact match wins over case-insensitive.
pub fn find_col_index(header: &[String], target: &str) -> Option<usize> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    if let Some(i) = header.iter().position(|h| h.trim() == target) {
        return Some(i);
    }
    let lower = target.to_lowercase();
    header
        .iter()
        .position(|h| h.trim().to_lowercase() == lower)
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

pub fn parse_planned_rows(
    values: &[Vec<String>],
    header_keyword: &str,
    header_planned_date: &str,
    date: &str,
) -> Result<Vec<PlannedRow>> {
    let Some(header) = values.first() else {
        return Ok(Vec::new());
    };

    let idx_keyword = find_col_index(header, header_keyword);
    let idx_date = find_col_index(header, header_planned_date);
    let (Some(idx_keyword), Some(idx_date)) = (idx_keyword, idx_date) else {
        return Err(WorkflowError::Schema {
            message: "header columns not found".into(),
        });
    };

    let mut rows = Vec::new();
    for row in &values[1..] {
        let keyword = cell(row, idx_keyword).trim();
        let planned_date = cell(row, idx_date).trim();
        if keyword.is_empty() || planned_date.is_empty() {
            continue;
        }
        if planned_date == date {
            rows.push(PlannedRow {
                keyword: keyword.to_string(),
                planned_date: planned_date.to_string(),
            });
        }
    }
    Ok(rows)
}

pub fn snapshot_from(
    values: &[Vec<String>],
    header_keyword: &str,
    header_planned_date: &str,
    keyword: &str,
    date: &str,
) -> Option<Map<String, Value>> {
    let header = values.first()?;
    let idx_keyword = find_col_index(header, header_keyword)?;
    let idx_date = find_col_index(header, header_planned_date)?;

    let keyword = keyword.trim();
    let date = date.trim();

    for row in &values[1..] {
        if cell(row, idx_keyword).trim() == keyword && cell(row, idx_date).trim() == date {
            let mut snapshot = Map::new();
            for (i, name) in header.iter().enumerate() {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                snapshot.insert(name.to_string(), Value::String(cell(row, i).to_string()));
            }
            return Some(snapshot);
        }
    }
    None
}
