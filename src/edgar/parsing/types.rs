use crate::edgar::client::decode_body;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

/// How a fetched body should be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ContentKind {
    StructuredMarkup,
    TaggedHtml,
}

/// A fetched and classified document, consumed once by an extractor.
#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub url: String,
    pub raw_bytes: Vec<u8>,
    pub content_kind: ContentKind,
}

impl ResolvedDocument {
    pub fn text(&self) -> String {
        decode_body(&self.raw_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstrumentType {
    Stock,
    Call,
    Put,
}

/// One row of an institutional holdings report. Values are in thousands of USD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub cusip: String,
    pub shares: u64,
    pub market_value: u64,
    pub instrument_type: InstrumentType,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    Earnings,
    OtherEvent,
    Agreement,
    Termination,
    Acquisition,
    ManagementChange,
    RegulationFd,
}

/// Which extraction tier produced a set of earnings metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EarningsTier {
    TagScan,
    AggressiveScan,
    Narrative,
    StaticFallback,
}

/// Headline results figures, in absolute currency units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EarningsMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_income: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eps_basic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eps_diluted: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<EarningsTier>,
}

impl EarningsMetrics {
    pub fn is_empty(&self) -> bool {
        self.extracted().is_empty()
    }

    /// Names of the metrics that carry a value, in a stable order.
    pub fn extracted(&self) -> Vec<&'static str> {
        [
            ("revenue", self.revenue),
            ("net_income", self.net_income),
            ("eps_basic", self.eps_basic),
            ("eps_diluted", self.eps_diluted),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_some())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// One disclosure item of a material-event report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateEvent {
    pub event_type: EventType,
    pub event_date: Option<NaiveDate>,
    pub title: String,
    pub summary: String,
    pub importance_score: u8,
    pub raw_data: Value,
    #[serde(skip)]
    pub earnings: Option<EarningsMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    Buy,
    Sell,
    Grant,
    OptionExercise,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsiderTrade {
    pub insider_name: Option<String>,
    pub insider_title: Option<String>,
    pub transaction_type: TransactionType,
    pub shares: Option<u64>,
    pub price_per_share: Option<f64>,
    pub total_value: Option<f64>,
    pub transaction_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_serialize_only_present_fields() {
        let metrics = EarningsMetrics {
            revenue: Some(28_000_000_000.0),
            eps_basic: Some(4.5),
            tier: Some(EarningsTier::TagScan),
            ..Default::default()
        };
        assert_eq!(metrics.extracted(), vec!["revenue", "eps_basic"]);
        let value = metrics.to_value();
        assert_eq!(value["tier"], "tag_scan");
        assert!(value.get("net_income").is_none());
        assert!(EarningsMetrics::default().is_empty());
    }

    #[test]
    fn test_enum_names() {
        assert_eq!(EventType::ManagementChange.to_string(), "management_change");
        assert_eq!(EventType::RegulationFd.as_ref(), "regulation_fd");
        assert_eq!(TransactionType::OptionExercise.to_string(), "option_exercise");
        assert_eq!(
            serde_json::to_value(InstrumentType::Put).unwrap(),
            serde_json::json!("put")
        );
    }
}
