use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use strum::{AsRefStr, Display, EnumIter};

pub mod memory;
pub mod rest;

pub use self::memory::InMemoryRecordStore;
pub use self::rest::RestRecordStore;

/// Tables the pipeline reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Table {
    FundFilings,
    CompanyFilings,
    FundHoldings,
    CompanyEvents,
    InsiderTrades,
    EarningsAlerts,
    Funds,
    Companies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FilingStatus {
    Parsed,
    Failed,
}

/// Selects the filing row a status update applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilingSelector {
    Id(String),
    AccessionNumber(String),
}

impl FilingSelector {
    pub fn filter(&self) -> (&'static str, &str) {
        match self {
            FilingSelector::Id(id) => ("id", id),
            FilingSelector::AccessionNumber(accession) => ("accession_number", accession),
        }
    }
}

/// Renders a JSON scalar the way it appears in an equality filter.
pub fn filter_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Remote record store seam. Filters are equality matches on columns.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, table: Table, filters: &[(&str, &str)]) -> Result<Vec<Value>>;

    /// Inserts one row and returns it as stored.
    async fn insert(&self, table: Table, row: Value) -> Result<Value>;

    async fn update(&self, table: Table, filters: &[(&str, &str)], patch: Value) -> Result<()>;

    async fn find_filing_id(&self, table: Table, accession_number: &str) -> Result<Option<String>> {
        let rows = self
            .select(table, &[("accession_number", accession_number)])
            .await?;
        Ok(rows.first().and_then(|row| row.get("id")).and_then(filter_value))
    }

    /// Ticker of the fund or company registered under `cik`, if any.
    async fn find_ticker(&self, table: Table, cik: &str) -> Result<Option<String>> {
        let rows = self.select(table, &[("cik", cik)]).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("ticker"))
            .and_then(Value::as_str)
            .map(str::to_uppercase))
    }

    async fn update_filing_status(
        &self,
        table: Table,
        selector: &FilingSelector,
        status: FilingStatus,
    ) -> Result<()> {
        let patch = json!({
            "status": status.as_ref(),
            "updated_at": chrono::Utc::now().to_rfc3339(),
        });
        self.update(table, &[selector.filter()], patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_table_names() {
        let names: Vec<String> = Table::iter().map(|t| t.to_string()).collect();
        assert!(names.contains(&"fund_holdings".to_string()));
        assert!(names.contains(&"earnings_alerts".to_string()));
        assert_eq!(FilingStatus::Parsed.as_ref(), "PARSED");
    }

    #[test]
    fn test_selector_filters() {
        assert_eq!(FilingSelector::Id("9".into()).filter(), ("id", "9"));
        assert_eq!(
            FilingSelector::AccessionNumber("0000950123-24-002518".into()).filter(),
            ("accession_number", "0000950123-24-002518")
        );
        assert_eq!(filter_value(&json!(42)), Some("42".to_string()));
        assert_eq!(filter_value(&json!(null)), None);
    }
}
