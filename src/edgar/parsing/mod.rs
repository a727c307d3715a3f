pub mod content;
pub mod earnings;
pub mod events;
pub mod holdings;
pub mod insider;
pub mod text;
pub mod types;

#[cfg(test)]
pub mod tests;

pub use content::classify;
pub use earnings::{EarningsExtractor, EarningsPolicy};
pub use events::EventSegmenter;
pub use holdings::extract_holdings;
pub use insider::extract_insider_trades;
pub use types::{
    ContentKind, CorporateEvent, EarningsMetrics, EarningsTier, EventType, Holding,
    InsiderTrade, InstrumentType, ResolvedDocument, TransactionType,
};
