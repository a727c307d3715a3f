use crate::core::error::FilingError;
use crate::edgar::report::ReportType;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

/// Raw trigger payload as delivered by the event bus, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(default, deserialize_with = "string_or_number")]
    pub filing_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub fund_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub company_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub cik: Option<String>,
    #[serde(default)]
    pub accession_number: Option<String>,
    #[serde(default)]
    pub form_type: Option<String>,
    #[serde(default)]
    pub filing_url: Option<String>,
    #[serde(default)]
    pub document_url: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn non_empty(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl TriggerEvent {
    /// Accepts either the bare payload or one wrapped in `{"detail": {...}}`.
    pub fn from_value(value: Value) -> Result<Self, FilingError> {
        let payload = match value {
            Value::Object(mut map) if map.get("detail").map_or(false, Value::is_object) => {
                map.remove("detail").unwrap_or(Value::Null)
            }
            other => other,
        };
        serde_json::from_value(payload)
            .map_err(|e| FilingError::InputValidation(format!("malformed payload: {}", e)))
    }

    pub fn from_json(raw: &str) -> Result<Self, FilingError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| FilingError::InputValidation(format!("payload is not JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Checks required fields and produces the immutable run input.
    pub fn validate(&self) -> Result<FilingReference, FilingError> {
        let cik = non_empty(&self.cik)
            .ok_or_else(|| FilingError::InputValidation("missing cik".to_string()))?;
        let accession_number = non_empty(&self.accession_number).ok_or_else(|| {
            FilingError::InputValidation("missing accession_number".to_string())
        })?;
        let fund_id = non_empty(&self.fund_id);
        let company_id = non_empty(&self.company_id);

        let report_type = match non_empty(&self.form_type) {
            Some(form) => form
                .parse::<ReportType>()
                .map_err(FilingError::InputValidation)?,
            None if fund_id.is_some() => ReportType::Form13F,
            None => {
                return Err(FilingError::InputValidation(
                    "missing form_type".to_string(),
                ))
            }
        };

        let owner = if report_type.is_fund_report() {
            FilingOwner::Fund(fund_id.ok_or_else(|| {
                FilingError::InputValidation("missing fund_id".to_string())
            })?)
        } else {
            match (company_id, fund_id) {
                (Some(id), _) => FilingOwner::Company(id),
                (None, Some(id)) if !report_type.is_supported() => FilingOwner::Fund(id),
                _ => {
                    return Err(FilingError::InputValidation(
                        "missing company_id".to_string(),
                    ))
                }
            }
        };

        let filing_url = non_empty(&self.document_url).or_else(|| non_empty(&self.filing_url));
        if report_type.is_supported() && filing_url.is_none() {
            return Err(FilingError::InputValidation(
                "missing filing_url".to_string(),
            ));
        }

        Ok(FilingReference {
            owner,
            cik,
            accession_number,
            report_type,
            filing_url,
            filing_id: non_empty(&self.filing_id),
            ticker: non_empty(&self.ticker).map(|t| t.to_uppercase()),
        })
    }
}

/// Entity a filing belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilingOwner {
    Fund(String),
    Company(String),
}

impl FilingOwner {
    pub fn id(&self) -> &str {
        match self {
            FilingOwner::Fund(id) | FilingOwner::Company(id) => id,
        }
    }
}

/// Identifies one filing for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingReference {
    pub owner: FilingOwner,
    pub cik: String,
    pub accession_number: String,
    pub report_type: ReportType,
    pub filing_url: Option<String>,
    pub filing_id: Option<String>,
    pub ticker: Option<String>,
}

/// Response handed back to the trigger: an HTTP-style status and a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub status_code: u16,
    pub body: Value,
}

impl ProcessResponse {
    pub fn success(filing_id: &str, report_type: &ReportType, record_count: usize) -> Self {
        Self {
            status_code: 200,
            body: json!({
                "success": true,
                "filing_id": filing_id,
                "form_type": report_type.to_string(),
                "record_count": record_count,
            }),
        }
    }

    pub fn failure(error: &FilingError) -> Self {
        Self {
            status_code: error.status_code(),
            body: json!({ "error": error.to_string() }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}
