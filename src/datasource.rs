//! Downstream data source: a JSON array of flat objects fetched over HTTP.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Rows keyed by column name, columns in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl DataTable {
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            bail!("data source must return a JSON array");
        };
        let mut table = DataTable::default();
        for (i, item) in items.into_iter().enumerate() {
            let Value::Object(obj) = item else {
                bail!("row {} is not a JSON object", i);
            };
            for k in obj.keys() {
                if !table.columns.iter().any(|c| c.eq_ignore_ascii_case(k)) {
                    table.columns.push(k.clone());
                }
            }
            table.rows.push(obj);
        }
        Ok(table)
    }

    /// Cell lookup; property names match case-insensitively.
    pub fn cell<'a>(&self, row: &'a Map<String, Value>, column: &str) -> Option<&'a Value> {
        row.get(column).or_else(|| row.iter().find(|(k, _)| k.eq_ignore_ascii_case(column)).map(|(_, v)| v))
    }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}

pub struct DataSource {
    client: reqwest::Client,
    endpoint: Option<String>,
    timeout: Duration,
}

impl DataSource {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building data source client")?;
        Ok(Self { client, endpoint: endpoint.filter(|e| !e.trim().is_empty()), timeout })
    }

    pub fn endpoint(&self) -> Option<&str> { self.endpoint.as_deref() }

    pub fn timeout(&self) -> Duration { self.timeout }

    /// Without an endpoint the table is empty.
    pub async fn fetch(&self) -> Result<DataTable> {
        let Some(url) = self.endpoint.as_deref() else {
            debug!(target: "http", "no data endpoint configured");
            return Ok(DataTable::default());
        };
        let resp = self.client.get(url).send().await.with_context(|| format!("GET {}", url))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("data source returned HTTP {}", status));
        }
        let body: Value = resp.json().await.context("decoding data source response")?;
        let table = DataTable::from_json(body)?;
        info!(target: "http", rows = table.rows.len(), columns = table.columns.len(), "data source fetched");
        Ok(table)
    }
}
