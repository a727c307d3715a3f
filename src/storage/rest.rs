use super::{RecordStore, Table};
use crate::core::config::ParserConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

/// PostgREST-style record store: one resource per table under `/rest/v1`.
pub struct RestRecordStore {
    client: Client,
    base_url: String,
    key: String,
}

impl RestRecordStore {
    pub fn new(url: &str, key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    pub fn from_config(config: &ParserConfig) -> Result<Self> {
        let (url, key) = config.store_credentials()?;
        Self::new(url, key)
    }

    pub fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: Table, filters: &[(&str, &str)]) -> RequestBuilder {
        let query: Vec<(String, String)> = filters
            .iter()
            .map(|(column, value)| (column.to_string(), format!("eq.{}", value)))
            .collect();
        self.client
            .request(method, self.table_url(table))
            .query(&query)
            .header("apikey", &self.key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.key))
            .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
            .header("Prefer", "return=representation")
    }
}

async fn json_body(response: reqwest::Response, table: Table) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(anyhow!("{} request failed with status {}: {}", table, status, text));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

/// PostgREST answers with a single object or an array depending on headers.
fn into_rows(body: Value) -> Vec<Value> {
    match body {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

#[async_trait]
impl RecordStore for RestRecordStore {
    async fn select(&self, table: Table, filters: &[(&str, &str)]) -> Result<Vec<Value>> {
        log::debug!("SELECT {} {:?}", table, filters);
        let response = self
            .request(Method::GET, table, filters)
            .query(&[("select", "*")])
            .send()
            .await?;
        Ok(into_rows(json_body(response, table).await?))
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        log::debug!("INSERT {}", table);
        let response = self
            .request(Method::POST, table, &[])
            .json(&row)
            .send()
            .await?;
        into_rows(json_body(response, table).await?)
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("insert into {} returned no rows", table))
    }

    async fn update(&self, table: Table, filters: &[(&str, &str)], patch: Value) -> Result<()> {
        log::debug!("PATCH {} {:?}", table, filters);
        if filters.is_empty() {
            return Err(anyhow!("refusing to update every row of {}", table));
        }
        let response = self
            .request(Method::PATCH, table, filters)
            .json(&patch)
            .send()
            .await?;
        json_body(response, table).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_url() {
        let store = RestRecordStore::new("https://db.example.com/", "secret").unwrap();
        assert_eq!(
            store.table_url(Table::FundHoldings),
            "https://db.example.com/rest/v1/fund_holdings"
        );
    }

    #[test]
    fn test_filter_query_and_headers() {
        let store = RestRecordStore::new("https://db.example.com", "secret").unwrap();
        let request = store
            .request(
                Method::GET,
                Table::FundFilings,
                &[("accession_number", "0000950123-24-002518")],
            )
            .build()
            .unwrap();
        assert_eq!(
            request.url().query(),
            Some("accession_number=eq.0000950123-24-002518")
        );
        assert_eq!(request.headers()["apikey"], "secret");
        assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer secret");
        assert_eq!(request.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_into_rows() {
        assert_eq!(into_rows(json!([{"id": 1}, {"id": 2}])).len(), 2);
        assert_eq!(into_rows(json!({"id": 1})), vec![json!({"id": 1})]);
        assert!(into_rows(Value::Null).is_empty());
    }

    #[test]
    fn test_from_config_requires_credentials() {
        assert!(RestRecordStore::from_config(&ParserConfig::default()).is_err());
    }
}
