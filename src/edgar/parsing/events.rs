use super::content::has_structured_data_markers;
use super::earnings::{EarningsExtractor, EarningsPolicy, EarningsSource};
use super::text::{collapse_whitespace, document_text, find_event_date, structural_corpus};
use super::types::{CorporateEvent, EventType};
use crate::edgar::utils::truncate_chars;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::Html;
use serde_json::json;

const SUMMARY_CHARS: usize = 500;
const PREVIEW_CHARS: usize = 1000;
const RESULTS_ITEM: &str = "2.02";

/// Item headings, most specific first: `Item 2.02 - Title`, `Item 2.02: Title`, `Item 2.02 Title`.
static ITEM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"Item\s+(\d+)\.(\d+)\s*[-–]\s*(.+)",
        r"Item\s+(\d+)\.(\d+)\s*:\s*(.+)",
        r"Item\s+(\d+)\.(\d+)\s+(.+)",
    ]
    .iter()
    .map(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("static regex")
    })
    .collect()
});

/// A detected item heading within the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemBoundary {
    pub start: usize,
    pub end: usize,
    pub item_number: String,
    pub title: String,
}

/// Finds item headings in document order. When several patterns match at
/// overlapping positions the earlier-listed pattern wins.
pub fn find_item_boundaries(corpus: &str) -> Vec<ItemBoundary> {
    let mut detections: Vec<(usize, ItemBoundary)> = ITEM_PATTERNS
        .iter()
        .enumerate()
        .flat_map(|(order, pattern)| {
            pattern.captures_iter(corpus).filter_map(move |caps| {
                let whole = caps.get(0)?;
                Some((
                    order,
                    ItemBoundary {
                        start: whole.start(),
                        end: whole.end(),
                        item_number: format!("{}.{}", &caps[1], &caps[2]),
                        title: caps[3].trim().to_string(),
                    },
                ))
            })
        })
        .collect();
    detections.sort_by_key(|(order, boundary)| (boundary.start, *order));

    let mut boundaries: Vec<ItemBoundary> = Vec::new();
    for (_, boundary) in detections {
        if boundaries.last().map_or(true, |last| boundary.start >= last.end) {
            boundaries.push(boundary);
        }
    }
    boundaries
}

/// Event type and importance for an item number.
pub fn classify_item(item_number: &str) -> (EventType, u8) {
    match item_number {
        "2.02" | "2.05" => (EventType::Earnings, 9),
        "8.01" => (EventType::OtherEvent, 5),
        "1.01" => (EventType::Agreement, 7),
        "1.02" => (EventType::Termination, 6),
        "2.01" => (EventType::Acquisition, 8),
        "5.02" => (EventType::ManagementChange, 7),
        "7.01" => (EventType::RegulationFd, 4),
        _ => (EventType::OtherEvent, 5),
    }
}

/// Splits material-event reports into classified disclosure items.
pub struct EventSegmenter<'a> {
    earnings: EarningsExtractor<'a>,
}

impl<'a> EventSegmenter<'a> {
    pub fn new(policy: &'a EarningsPolicy) -> Self {
        Self {
            earnings: EarningsExtractor::new(policy),
        }
    }

    /// Always returns at least one event.
    pub fn segment(&self, markup: &str, ticker: &str) -> Vec<CorporateEvent> {
        let html = Html::parse_document(markup);
        let source = EarningsSource::new(markup, &html);
        let corpus = structural_corpus(&html);
        log::debug!("Event corpus length: {} characters", corpus.len());

        let boundaries = find_item_boundaries(&corpus);
        log::info!(
            "Found {} items: {:?}",
            boundaries.len(),
            boundaries.iter().map(|b| b.item_number.as_str()).collect::<Vec<_>>()
        );

        let events: Vec<CorporateEvent> = boundaries
            .iter()
            .enumerate()
            .map(|(idx, boundary)| {
                let content_end = boundaries
                    .get(idx + 1)
                    .map_or(corpus.len(), |next| next.start);
                let content = corpus[boundary.end..content_end].trim();
                self.item_event(boundary, content, &source, ticker)
            })
            .collect();

        if !events.is_empty() {
            return events;
        }
        self.fallback_event(markup, &html, &source, ticker)
    }

    fn item_event(
        &self,
        boundary: &ItemBoundary,
        content: &str,
        source: &EarningsSource<'_>,
        ticker: &str,
    ) -> CorporateEvent {
        let (event_type, importance_score) = classify_item(&boundary.item_number);
        let earnings = (boundary.item_number == RESULTS_ITEM)
            .then(|| self.earnings.extract(source, content, ticker))
            .filter(|metrics| !metrics.is_empty());
        let earnings_value = earnings
            .as_ref()
            .map_or_else(|| json!({}), |metrics| metrics.to_value());

        CorporateEvent {
            event_type,
            event_date: find_event_date(content),
            title: format!("8-K Item {}: {}", boundary.item_number, boundary.title),
            summary: truncate_chars(content, SUMMARY_CHARS).to_string(),
            importance_score,
            raw_data: json!({
                "item_number": boundary.item_number,
                "item_title": boundary.title,
                "content_preview": truncate_chars(content, PREVIEW_CHARS),
                "earnings_metrics": earnings_value,
            }),
            earnings,
        }
    }

    fn fallback_event(
        &self,
        markup: &str,
        html: &Html,
        source: &EarningsSource<'_>,
        ticker: &str,
    ) -> Vec<CorporateEvent> {
        let text = collapse_whitespace(&document_text(html));

        if has_structured_data_markers(&text) || has_structured_data_markers(markup) {
            log::debug!("No item headings, extracting earnings from structured data");
            let metrics = self.earnings.extract(source, &text, ticker);
            if !metrics.is_empty() {
                return vec![CorporateEvent {
                    event_type: EventType::Earnings,
                    event_date: None,
                    title: "8-K Item 2.02: Results of Operations (XBRL)".to_string(),
                    summary: format!(
                        "Earnings metrics extracted from XBRL: {}",
                        metrics.extracted().join(", ")
                    ),
                    importance_score: 9,
                    raw_data: json!({
                        "item_number": RESULTS_ITEM,
                        "item_title": "Results of Operations and Financial Condition",
                        "content_preview": truncate_chars(&text, PREVIEW_CHARS),
                        "earnings_metrics": metrics.to_value(),
                    }),
                    earnings: Some(metrics),
                }];
            }
        }

        vec![CorporateEvent {
            event_type: EventType::OtherEvent,
            event_date: None,
            title: "8-K Filing".to_string(),
            summary: truncate_chars(&text, SUMMARY_CHARS).to_string(),
            importance_score: 5,
            raw_data: json!({ "content_preview": truncate_chars(&text, PREVIEW_CHARS) }),
            earnings: None,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edgar::parsing::tests::read_test_file;
    use crate::edgar::parsing::types::EarningsTier;
    use chrono::NaiveDate;

    #[test]
    fn test_item_boundaries_prefer_specific_patterns() {
        let corpus = "Item 1.01 - Entry into a Material Definitive Agreement\nThe Company signed.\nITEM 5.02: Departure of Directors\nMr. Smith resigned.\nItem 9.01 Financial Statements";
        let boundaries = find_item_boundaries(corpus);
        assert_eq!(boundaries.len(), 3);
        assert_eq!(boundaries[0].item_number, "1.01");
        assert_eq!(boundaries[0].title, "Entry into a Material Definitive Agreement");
        assert_eq!(boundaries[1].item_number, "5.02");
        assert_eq!(boundaries[1].title, "Departure of Directors");
        assert_eq!(boundaries[2].title, "Financial Statements");
    }

    #[test]
    fn test_classify_items() {
        assert_eq!(classify_item("2.02"), (EventType::Earnings, 9));
        assert_eq!(classify_item("2.05"), (EventType::Earnings, 9));
        assert_eq!(classify_item("5.02"), (EventType::ManagementChange, 7));
        assert_eq!(classify_item("7.01"), (EventType::RegulationFd, 4));
        assert_eq!(classify_item("3.03"), (EventType::OtherEvent, 5));
    }

    #[test]
    fn test_segment_results_filing() {
        let policy = EarningsPolicy::default();
        let markup = read_test_file("earnings_8k_ixbrl.htm");
        let events = EventSegmenter::new(&policy).segment(&markup, "NVDA");
        assert_eq!(events.len(), 2);

        let results = &events[0];
        assert_eq!(results.event_type, EventType::Earnings);
        assert_eq!(results.importance_score, 9);
        assert_eq!(
            results.title,
            "8-K Item 2.02: Results of Operations and Financial Condition."
        );
        assert_eq!(results.event_date, NaiveDate::from_ymd_opt(2024, 2, 21));
        assert!(results.summary.starts_with("On February 21, 2024"));
        assert_eq!(results.raw_data["item_number"], "2.02");
        assert_eq!(results.raw_data["earnings_metrics"]["revenue"], 22_103_000_000.0);
        let metrics = results.earnings.as_ref().unwrap();
        assert_eq!(metrics.tier, Some(EarningsTier::TagScan));

        let exhibits = &events[1];
        assert_eq!(exhibits.event_type, EventType::OtherEvent);
        assert_eq!(exhibits.title, "8-K Item 9.01: Financial Statements and Exhibits.");
        assert!(exhibits.earnings.is_none());
        assert_eq!(exhibits.raw_data["earnings_metrics"], json!({}));
    }

    #[test]
    fn test_heading_with_inline_continuation() {
        let policy = EarningsPolicy::default();
        let markup = "<div>Item 8.01 Other Events <span>(continued)</span></div><p>The Company moved offices.</p>";
        let events = EventSegmenter::new(&policy).segment(markup, "ACME");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "8-K Item 8.01: Other Events (continued)");
        assert_eq!(events[0].event_type, EventType::OtherEvent);
        assert_eq!(events[0].summary, "The Company moved offices.");
    }

    #[test]
    fn test_plain_document_yields_single_generic_event() {
        let policy = EarningsPolicy::default();
        let markup = "<html><body><p>Company announces new office location.</p></body></html>";
        let events = EventSegmenter::new(&policy).segment(markup, "NVDA");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::OtherEvent);
        assert_eq!(events[0].title, "8-K Filing");
        assert_eq!(events[0].importance_score, 5);
        assert_eq!(events[0].summary, "Company announces new office location.");
        assert_eq!(
            events[0].raw_data["content_preview"],
            "Company announces new office location."
        );
    }

    #[test]
    fn test_structured_document_without_items_yields_earnings_event() {
        let policy = EarningsPolicy::default();
        let markup = r#"<html><body><div>xbrl cover</div><div><span name="us-gaap:EarningsPerShareDiluted" contextref="c1" unitref="u1">1.19</span></div></body></html>"#;
        let events = EventSegmenter::new(&policy).segment(markup, "ACME");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Earnings);
        assert_eq!(events[0].title, "8-K Item 2.02: Results of Operations (XBRL)");
        assert_eq!(
            events[0].summary,
            "Earnings metrics extracted from XBRL: eps_diluted"
        );
    }
}
