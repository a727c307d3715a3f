use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use strum::{EnumIter, IntoEnumIterator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumIter)]
#[serde(try_from = "String", into = "String")]
pub enum ReportType {
    Form13F,
    Form8K,
    Form4,
    Other(String),
}

impl TryFrom<String> for ReportType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ReportType::from_str(&s)
    }
}

impl From<ReportType> for String {
    fn from(report_type: ReportType) -> Self {
        report_type.to_string()
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportType::Form13F => write!(f, "13F-HR"),
            ReportType::Form8K => write!(f, "8-K"),
            ReportType::Form4 => write!(f, "4"),
            ReportType::Other(s) => write!(f, "{}", s),
        }
    }
}

pub static REPORT_TYPES: Lazy<String> = Lazy::new(|| {
    ReportType::iter()
        .filter(|t| !matches!(t, ReportType::Other(_)))
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
});

impl ReportType {
    pub fn list_types() -> &'static str {
        &REPORT_TYPES
    }

    /// Whether an extractor exists for this form.
    pub fn is_supported(&self) -> bool {
        !matches!(self, ReportType::Other(_))
    }

    /// Institutional holdings reports belong to funds, everything else to companies.
    pub fn is_fund_report(&self) -> bool {
        matches!(self, ReportType::Form13F)
    }
}

impl FromStr for ReportType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<ReportType, std::string::String> {
        let normalized = s.trim().to_uppercase();
        // Amendments are parsed the same way as the original form
        let base = normalized.strip_suffix("/A").unwrap_or(&normalized);
        match base {
            "13F" | "13F-HR" => Ok(ReportType::Form13F),
            "8-K" | "8K" => Ok(ReportType::Form8K),
            "4" | "FORM 4" => Ok(ReportType::Form4),
            "" => Err("empty form type".to_string()),
            _ => Ok(ReportType::Other(s.trim().to_string())),
        }
    }
}
