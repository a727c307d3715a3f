pub mod core;
pub mod edgar;
pub mod storage;

// Re-exports
pub use crate::core::config::ParserConfig;
pub use crate::core::error::FilingError;
pub use crate::core::service::FilingProcessor;
pub use crate::core::types::{FilingReference, ProcessResponse, TriggerEvent};
pub use crate::edgar::client::{DocumentFetcher, EdgarClient};
pub use crate::storage::{InMemoryRecordStore, RecordStore, RestRecordStore};
