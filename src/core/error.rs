use thiserror::Error;

/// Failure classes of a single filing run.
#[derive(Debug, Error)]
pub enum FilingError {
    #[error("invalid trigger payload: {0}")]
    InputValidation(String),

    #[error("no document found for filing {accession_number}")]
    DocumentNotFound { accession_number: String },

    #[error("no filing registered for accession {0}")]
    FilingNotRegistered(String),

    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to extract records: {0}")]
    Extraction(String),

    #[error("record store request failed: {0}")]
    RecordStore(#[source] anyhow::Error),

    #[error("failed to write {table} record: {source}")]
    RecordWrite {
        table: String,
        #[source]
        source: anyhow::Error,
    },
}

impl FilingError {
    /// HTTP-style status code reported back to the trigger.
    pub fn status_code(&self) -> u16 {
        match self {
            FilingError::InputValidation(_) => 400,
            _ => 500,
        }
    }

    /// Validation failures never touch the record store.
    pub fn marks_filing_failed(&self) -> bool {
        !matches!(self, FilingError::InputValidation(_))
    }
}
