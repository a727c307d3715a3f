use super::config::ParserConfig;
use super::error::FilingError;
use super::types::{FilingOwner, FilingReference, ProcessResponse, TriggerEvent};
use crate::edgar::client::DocumentFetcher;
use crate::edgar::locator::Locator;
use crate::edgar::parsing::{
    extract_holdings, extract_insider_trades, CorporateEvent, EarningsMetrics, EventSegmenter,
    EventType, Holding, InsiderTrade, ResolvedDocument,
};
use crate::edgar::report::ReportType;
use crate::storage::{FilingSelector, FilingStatus, RecordStore, Table};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

pub const UNKNOWN_TICKER: &str = "UNKNOWN";

/// Runs one trigger through locate, fetch, extract, persist and status update.
pub struct FilingProcessor {
    fetcher: Arc<dyn DocumentFetcher>,
    store: Arc<dyn RecordStore>,
    config: ParserConfig,
}

fn filings_table(owner: &FilingOwner) -> Table {
    match owner {
        FilingOwner::Fund(_) => Table::FundFilings,
        FilingOwner::Company(_) => Table::CompanyFilings,
    }
}

fn entities_table(owner: &FilingOwner) -> Table {
    match owner {
        FilingOwner::Fund(_) => Table::Funds,
        FilingOwner::Company(_) => Table::Companies,
    }
}

impl FilingProcessor {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        store: Arc<dyn RecordStore>,
        config: ParserConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    /// Processes one trigger. Never fails: errors become a failure response.
    pub async fn process(&self, event: TriggerEvent) -> ProcessResponse {
        let reference = match event.validate() {
            Ok(reference) => reference,
            Err(e) => {
                log::error!("Rejected trigger: {}", e);
                return ProcessResponse::failure(&e);
            }
        };
        log::info!(
            "Processing {} filing {} for CIK {}",
            reference.report_type,
            reference.accession_number,
            reference.cik
        );

        let mut filing_id = reference.filing_id.clone();
        match self.run(&reference, &mut filing_id).await {
            Ok((filing_id, record_count)) => {
                log::info!(
                    "Filing {} parsed, {} records written",
                    reference.accession_number,
                    record_count
                );
                ProcessResponse::success(&filing_id, &reference.report_type, record_count)
            }
            Err(e) => {
                log::error!("Failed to process filing {}: {}", reference.accession_number, e);
                if e.marks_filing_failed() {
                    self.mark_failed(&reference, filing_id.as_deref()).await;
                }
                ProcessResponse::failure(&e)
            }
        }
    }

    async fn run(
        &self,
        reference: &FilingReference,
        filing_id: &mut Option<String>,
    ) -> Result<(String, usize), FilingError> {
        let table = filings_table(&reference.owner);
        if filing_id.is_none() {
            *filing_id = self
                .store
                .find_filing_id(table, &reference.accession_number)
                .await
                .map_err(FilingError::RecordStore)?;
        }
        let id = filing_id
            .clone()
            .ok_or_else(|| FilingError::FilingNotRegistered(reference.accession_number.clone()))?;

        let record_count = if reference.report_type.is_supported() {
            let document = self.locate_and_fetch(reference).await?;
            match reference.report_type {
                ReportType::Form13F => self.store_holdings(reference, &id, &document).await?,
                ReportType::Form8K => self.store_events(reference, &id, &document).await,
                ReportType::Form4 => self.store_insider_trades(reference, &id, &document).await,
                ReportType::Other(_) => 0,
            }
        } else {
            log::info!(
                "No extractor for form {}, marking filing parsed",
                reference.report_type
            );
            0
        };

        self.store
            .update_filing_status(table, &FilingSelector::Id(id.clone()), FilingStatus::Parsed)
            .await
            .map_err(FilingError::RecordStore)?;
        Ok((id, record_count))
    }

    async fn locate_and_fetch(
        &self,
        reference: &FilingReference,
    ) -> Result<ResolvedDocument, FilingError> {
        let locator = Locator::new(self.fetcher.as_ref(), &self.config.base_url);
        let location = locator.resolve(reference).await?;
        log::info!("Located document {} via {}", location.url, location.strategy);
        locator.fetch(&location, &reference.report_type).await
    }

    /// Best-effort FAILED status; its own failure is only logged.
    async fn mark_failed(&self, reference: &FilingReference, filing_id: Option<&str>) {
        let selector = match filing_id {
            Some(id) => FilingSelector::Id(id.to_string()),
            None => FilingSelector::AccessionNumber(reference.accession_number.clone()),
        };
        let table = filings_table(&reference.owner);
        if let Err(e) = self
            .store
            .update_filing_status(table, &selector, FilingStatus::Failed)
            .await
        {
            log::warn!("Could not mark filing {:?} failed: {}", selector, e);
        }
    }

    /// Trigger ticker, else the registered entity's ticker, else UNKNOWN.
    async fn resolve_ticker(&self, reference: &FilingReference) -> String {
        if let Some(ticker) = &reference.ticker {
            return ticker.clone();
        }
        match self
            .store
            .find_ticker(entities_table(&reference.owner), &reference.cik)
            .await
        {
            Ok(Some(ticker)) => ticker,
            Ok(None) => UNKNOWN_TICKER.to_string(),
            Err(e) => {
                log::warn!("Ticker lookup for CIK {} failed: {}", reference.cik, e);
                UNKNOWN_TICKER.to_string()
            }
        }
    }

    /// Inserts one row; a failed write is logged and skipped.
    async fn write(&self, table: Table, row: Value) -> Option<Value> {
        match self.store.insert(table, row).await {
            Ok(stored) => Some(stored),
            Err(source) => {
                let e = FilingError::RecordWrite {
                    table: table.to_string(),
                    source,
                };
                log::warn!("{}", e);
                None
            }
        }
    }

    async fn store_holdings(
        &self,
        reference: &FilingReference,
        filing_id: &str,
        document: &ResolvedDocument,
    ) -> Result<usize, FilingError> {
        let holdings =
            extract_holdings(document).map_err(|e| FilingError::Extraction(e.to_string()))?;
        log::info!("Extracted {} holdings from {}", holdings.len(), document.url);

        let mut written = 0;
        for holding in &holdings {
            let row = holding_row(reference, filing_id, holding);
            if self.write(Table::FundHoldings, row).await.is_some() {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn store_events(
        &self,
        reference: &FilingReference,
        filing_id: &str,
        document: &ResolvedDocument,
    ) -> usize {
        let ticker = self.resolve_ticker(reference).await;
        let events =
            EventSegmenter::new(&self.config.earnings_policy).segment(&document.text(), &ticker);
        log::info!("Segmented {} events from {}", events.len(), document.url);

        let mut written = 0;
        for event in &events {
            let row = event_row(reference, filing_id, event);
            if self.write(Table::CompanyEvents, row).await.is_none() {
                continue;
            }
            written += 1;

            let metrics = match (&event.event_type, &event.earnings) {
                (EventType::Earnings, Some(metrics)) if !metrics.is_empty() => metrics,
                _ => continue,
            };
            let alert = alert_row(reference, filing_id, &ticker, metrics);
            if self.write(Table::EarningsAlerts, alert).await.is_some() {
                log::info!("Created earnings alert for {} filing {}", ticker, filing_id);
            }
        }
        written
    }

    async fn store_insider_trades(
        &self,
        reference: &FilingReference,
        filing_id: &str,
        document: &ResolvedDocument,
    ) -> usize {
        let trades = extract_insider_trades(&document.text());
        log::info!("Extracted {} insider trades from {}", trades.len(), document.url);

        let mut written = 0;
        for trade in &trades {
            let row = trade_row(reference, filing_id, trade);
            if self.write(Table::InsiderTrades, row).await.is_some() {
                written += 1;
            }
        }
        written
    }
}

fn holding_row(reference: &FilingReference, filing_id: &str, holding: &Holding) -> Value {
    json!({
        "fund_id": reference.owner.id(),
        "filing_id": filing_id,
        "cik": reference.cik,
        "ticker": holding.ticker,
        "cusip": holding.cusip,
        "shares": holding.shares,
        "market_value": holding.market_value,
        "type": holding.instrument_type.as_ref(),
    })
}

fn event_row(reference: &FilingReference, filing_id: &str, event: &CorporateEvent) -> Value {
    json!({
        "company_id": reference.owner.id(),
        "filing_id": filing_id,
        "event_type": event.event_type.as_ref(),
        "event_date": event.event_date.map(|d| d.to_string()),
        "title": event.title,
        "summary": event.summary,
        "importance_score": event.importance_score,
        "raw_data": event.raw_data,
    })
}

fn trade_row(reference: &FilingReference, filing_id: &str, trade: &InsiderTrade) -> Value {
    json!({
        "company_id": reference.owner.id(),
        "filing_id": filing_id,
        "insider_name": trade.insider_name,
        "insider_title": trade.insider_title,
        "transaction_type": trade.transaction_type.as_ref(),
        "shares": trade.shares,
        "price_per_share": trade.price_per_share,
        "total_value": trade.total_value,
        "transaction_date": trade.transaction_date.to_string(),
    })
}

fn alert_row(
    reference: &FilingReference,
    filing_id: &str,
    ticker: &str,
    metrics: &EarningsMetrics,
) -> Value {
    let mut alert_data = json!({
        "ticker": ticker,
        "metrics_extracted": metrics.extracted(),
        "revenue": metrics.revenue,
        "eps_basic": metrics.eps_basic,
        "eps_diluted": metrics.eps_diluted,
        "net_income": metrics.net_income,
        "analysis_time": Utc::now().to_rfc3339(),
        "raw_metrics": metrics.to_value(),
    });
    if let Some(revenue) = metrics.revenue {
        alert_data["revenue_formatted"] = json!(format!("${:.2}B", revenue / 1e9));
    }
    if let Some(eps) = metrics.eps_basic {
        alert_data["eps_formatted"] = json!(format!("${:.2}", eps));
    }

    json!({
        "company_id": reference.owner.id(),
        "filing_id": filing_id,
        "alert_type": "earnings_release",
        "alert_data": alert_data,
        "importance_score": 8,
        "status": "new",
    })
}
