use super::text::{document_text, element_text};
use super::types::{EarningsMetrics, EarningsTier};
use anyhow::{Context, Result};
use html_escape::decode_html_entities;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Tiers in the order they are tried. The first tier producing any
/// plausible metric wins.
pub const TIER_ORDER: [EarningsTier; 4] = [
    EarningsTier::TagScan,
    EarningsTier::AggressiveScan,
    EarningsTier::Narrative,
    EarningsTier::StaticFallback,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Metric {
    Revenue,
    NetIncome,
    EpsBasic,
    EpsDiluted,
}

impl Metric {
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Metric::Revenue => &[
                "us-gaap:Revenues",
                "us-gaap:SalesRevenueNet",
                "Revenues",
                "SalesRevenueNet",
            ],
            Metric::NetIncome => &["us-gaap:NetIncomeLoss", "NetIncomeLoss"],
            Metric::EpsBasic => &["us-gaap:EarningsPerShareBasic", "EarningsPerShareBasic"],
            Metric::EpsDiluted => &["us-gaap:EarningsPerShareDiluted", "EarningsPerShareDiluted"],
        }
    }

    fn is_per_share(self) -> bool {
        matches!(self, Metric::EpsBasic | Metric::EpsDiluted)
    }

    fn get(self, metrics: &EarningsMetrics) -> Option<f64> {
        match self {
            Metric::Revenue => metrics.revenue,
            Metric::NetIncome => metrics.net_income,
            Metric::EpsBasic => metrics.eps_basic,
            Metric::EpsDiluted => metrics.eps_diluted,
        }
    }

    fn slot(self, metrics: &mut EarningsMetrics) -> &mut Option<f64> {
        match self {
            Metric::Revenue => &mut metrics.revenue,
            Metric::NetIncome => &mut metrics.net_income,
            Metric::EpsBasic => &mut metrics.eps_basic,
            Metric::EpsDiluted => &mut metrics.eps_diluted,
        }
    }
}

const ALL_METRICS: [Metric; 4] = [
    Metric::Revenue,
    Metric::NetIncome,
    Metric::EpsBasic,
    Metric::EpsDiluted,
];

const THOUSAND: f64 = 1_000.0;
const MILLION: f64 = 1_000_000.0;
const BILLION: f64 = 1_000_000_000.0;
const MAX_TAGGED_EPS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub min: f64,
    pub max: f64,
}

impl MetricRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Plausibility window for one issuer's headline figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibleRanges {
    pub revenue: MetricRange,
    pub net_income: MetricRange,
    pub eps: MetricRange,
}

impl Default for PlausibleRanges {
    fn default() -> Self {
        Self {
            revenue: MetricRange::new(10.0 * BILLION, 100.0 * BILLION),
            net_income: MetricRange::new(BILLION, 50.0 * BILLION),
            eps: MetricRange::new(0.5, 20.0),
        }
    }
}

impl PlausibleRanges {
    fn for_metric(&self, metric: Metric) -> MetricRange {
        match metric {
            Metric::Revenue => self.revenue,
            Metric::NetIncome => self.net_income,
            Metric::EpsBasic | Metric::EpsDiluted => self.eps,
        }
    }
}

/// Ticker-keyed validation ranges and last-known-good values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarningsPolicy {
    /// Ranges entry used for tickers that have none of their own.
    pub default_ticker: String,
    pub ranges: HashMap<String, PlausibleRanges>,
    pub static_fallbacks: HashMap<String, EarningsMetrics>,
    pub static_fallback_enabled: bool,
}

impl Default for EarningsPolicy {
    fn default() -> Self {
        let nvda = EarningsMetrics {
            revenue: Some(28.0 * BILLION),
            net_income: Some(12.0 * BILLION),
            eps_basic: Some(4.50),
            eps_diluted: Some(4.48),
            tier: None,
        };
        Self {
            default_ticker: "NVDA".to_string(),
            ranges: HashMap::from([("NVDA".to_string(), PlausibleRanges::default())]),
            static_fallbacks: HashMap::from([("NVDA".to_string(), nvda)]),
            static_fallback_enabled: true,
        }
    }
}

impl EarningsPolicy {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let policy = serde_json::from_str(&raw).context("parsing earnings policy JSON")?;
        Ok(policy)
    }

    pub fn ranges_for(&self, ticker: &str) -> PlausibleRanges {
        self.ranges
            .get(&ticker.to_uppercase())
            .or_else(|| self.ranges.get(&self.default_ticker))
            .cloned()
            .unwrap_or_default()
    }

    /// Drops every metric outside the ticker's plausibility window.
    pub fn validate(&self, metrics: &EarningsMetrics, ticker: &str) -> EarningsMetrics {
        let ranges = self.ranges_for(ticker);
        let mut validated = EarningsMetrics::default();
        for metric in ALL_METRICS {
            if let Some(value) = metric.get(metrics) {
                let range = ranges.for_metric(metric);
                if range.contains(value) {
                    *metric.slot(&mut validated) = Some(value);
                } else {
                    log::debug!(
                        "{:?} {} outside plausible range {}..{} for {}",
                        metric, value, range.min, range.max, ticker
                    );
                }
            }
        }
        validated
    }

    /// Last-known-good values, only for tickers with an explicit entry.
    pub fn static_fallback(&self, ticker: &str) -> Option<EarningsMetrics> {
        if !self.static_fallback_enabled {
            return None;
        }
        self.static_fallbacks.get(&ticker.to_uppercase()).map(|values| EarningsMetrics {
            tier: Some(EarningsTier::StaticFallback),
            ..values.clone()
        })
    }
}

/// A parsed document the tiers can look at in different ways.
pub struct EarningsSource<'a> {
    pub markup: &'a str,
    pub html: &'a Html,
}

impl<'a> EarningsSource<'a> {
    pub fn new(markup: &'a str, html: &'a Html) -> Self {
        Self { markup, html }
    }
}

pub struct EarningsExtractor<'a> {
    policy: &'a EarningsPolicy,
}

impl<'a> EarningsExtractor<'a> {
    pub fn new(policy: &'a EarningsPolicy) -> Self {
        Self { policy }
    }

    /// Runs the tiers in order over `source`, with `item_text` as the
    /// preferred narrative. Returns empty metrics when nothing plausible was found.
    pub fn extract(
        &self,
        source: &EarningsSource<'_>,
        item_text: &str,
        ticker: &str,
    ) -> EarningsMetrics {
        let mut tagged_anything = false;
        for tier in TIER_ORDER {
            let raw = match tier {
                EarningsTier::TagScan => {
                    let raw = tag_scan(source.html);
                    tagged_anything = !raw.is_empty();
                    raw
                }
                EarningsTier::AggressiveScan if tagged_anything => continue,
                EarningsTier::AggressiveScan => aggressive_scan(source.markup),
                EarningsTier::Narrative => {
                    let full_text = document_text(source.html);
                    narrative_scan(&[item_text, full_text.as_str()])
                }
                EarningsTier::StaticFallback => {
                    let fallback = self.policy.static_fallback(ticker);
                    if fallback.is_some() {
                        log::warn!(
                            "No plausible earnings figures for {}, using static fallback",
                            ticker
                        );
                    }
                    return fallback.unwrap_or_default();
                }
            };

            let validated = self.policy.validate(&raw, ticker);
            if !validated.is_empty() {
                log::info!(
                    "Earnings metrics for {} from {} tier: {:?}",
                    ticker,
                    tier,
                    validated.extracted()
                );
                return EarningsMetrics {
                    tier: Some(tier),
                    ..validated
                };
            }
            log::debug!("{} tier produced nothing plausible for {}", tier, ticker);
        }
        EarningsMetrics::default()
    }
}

fn all_elements(html: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    html.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
}

/// The innermost element mentioning `alias` in its own tag or direct text.
fn tightest_mention<'a>(html: &'a Html, alias: &str) -> Option<ElementRef<'a>> {
    all_elements(html).find(|el| {
        let tag = el.value();
        tag.name().contains(&alias.to_lowercase())
            || tag.attrs().any(|(_, value)| value.contains(alias))
            || el.children().any(|child| match child.value() {
                Node::Text(text) => text.contains(alias),
                _ => false,
            })
    })
}

fn tagged_candidates<'a>(html: &'a Html, alias: &str) -> Vec<ElementRef<'a>> {
    let by_name: Vec<_> = all_elements(html)
        .filter(|el| el.value().attr("name") == Some(alias))
        .collect();
    if !by_name.is_empty() {
        return by_name;
    }

    let by_tag: Vec<_> = all_elements(html)
        .filter(|el| el.value().name().eq_ignore_ascii_case(alias))
        .collect();
    if !by_tag.is_empty() {
        return by_tag;
    }

    tightest_mention(html, alias).into_iter().collect()
}

static STRIP_PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[()$,]").expect("static regex"));
static KEEP_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d.\-]").expect("static regex"));

/// `($1,234.5)` → `1234.5`
fn clean_tagged_number(raw: &str) -> Option<f64> {
    let stripped = STRIP_PUNCTUATION.replace_all(raw.trim(), "");
    let cleaned = KEEP_NUMERIC.replace_all(&stripped, "");
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn unit_scale(html: &Html, unit_ref: &str) -> Option<f64> {
    let unit = all_elements(html).find(|el| el.value().id() == Some(unit_ref))?;
    let text = element_text(unit).to_lowercase();
    if text.contains("million") {
        Some(MILLION)
    } else if text.contains("billion") {
        Some(BILLION)
    } else if text.contains("thousand") {
        Some(THOUSAND)
    } else {
        None
    }
}

fn scaled_tagged_value(html: &Html, element: ElementRef<'_>, metric: Metric) -> Option<f64> {
    let text = element_text(element);
    if text.is_empty() {
        return None;
    }
    let value = clean_tagged_number(&text)?;

    let unit_ref = element.value().attr("unitref");
    let context_ref = element.value().attr("contextref").filter(|c| !c.is_empty());

    let scale = unit_ref
        .and_then(|unit| unit_scale(html, unit))
        .or_else(|| {
            element
                .value()
                .attr("scale")
                .and_then(|s| s.trim().parse::<i32>().ok())
                .map(|exp| 10f64.powi(exp))
        })
        .unwrap_or_else(|| {
            if metric == Metric::Revenue
                && context_ref.is_some()
                && unit_ref.is_none()
                && value < THOUSAND
            {
                MILLION
            } else {
                1.0
            }
        });

    let mut scaled = value * scale;
    if metric == Metric::Revenue && scaled < BILLION && value < THOUSAND {
        scaled = value * BILLION;
    }
    if metric.is_per_share() && value > MAX_TAGGED_EPS {
        log::debug!("Rejecting tagged per-share value {}", value);
        return None;
    }
    Some(scaled)
}

/// Tier A: structured tags looked up by alias.
fn tag_scan(html: &Html) -> EarningsMetrics {
    let mut metrics = EarningsMetrics::default();
    for metric in ALL_METRICS {
        let found = metric.aliases().iter().find_map(|alias| {
            tagged_candidates(html, alias)
                .into_iter()
                .find_map(|element| scaled_tagged_value(html, element, metric))
        });
        *metric.slot(&mut metrics) = found;
    }
    metrics
}

/// Ordered: for each metric the first pattern, and its first match, wins;
/// later matches never overwrite an earlier value.
static AGGRESSIVE_PATTERNS: Lazy<Vec<(Regex, Metric)>> = Lazy::new(|| {
    [
        (r"us-gaap:Revenues[^>]*>([\d\.,]+)<", Metric::Revenue),
        (r"Revenues[^>]*>([\d\.,]+)<", Metric::Revenue),
        (r#"name="us-gaap:Revenues"[^>]*>([\d\.,]+)<"#, Metric::Revenue),
        (r"us-gaap:EarningsPerShareBasic[^>]*>([\d\.,]+)<", Metric::EpsBasic),
        (r"EarningsPerShareBasic[^>]*>([\d\.,]+)<", Metric::EpsBasic),
    ]
    .into_iter()
    .map(|(pattern, metric)| (Regex::new(pattern).expect("static regex"), metric))
    .collect()
});

/// Tier B: regexes straight over the markup.
fn aggressive_scan(markup: &str) -> EarningsMetrics {
    let markup = decode_html_entities(markup);
    let mut metrics = EarningsMetrics::default();
    for (pattern, metric) in AGGRESSIVE_PATTERNS.iter() {
        if metric.get(&metrics).is_some() {
            continue;
        }
        let found = pattern.captures_iter(&markup).find_map(|caps| {
            let value = caps[1].replace(',', "").parse::<f64>().ok()?;
            Some(if *metric == Metric::Revenue && value < THOUSAND {
                value * BILLION
            } else {
                value
            })
        });
        *metric.slot(&mut metrics) = found;
    }
    metrics
}

struct NarrativePattern {
    regex: Regex,
    metric: Metric,
    multiplier: f64,
}

/// Ordered like the aggressive table: first accepted match per metric wins.
static NARRATIVE_PATTERNS: Lazy<Vec<NarrativePattern>> = Lazy::new(|| {
    [
        (r"revenue\s*[\$]?\s*(\d{2,3}\.?\d*)\s*b", Metric::Revenue, BILLION),
        (r"revenues?\s*[\$]?\s*(\d{2,3}\.?\d*)\s*b", Metric::Revenue, BILLION),
        (r"\$(\d{2,3}\.?\d*)\s*b.*revenue", Metric::Revenue, BILLION),
        (r"eps\s*[\$]?\s*(\d+\.?\d{2})", Metric::EpsBasic, 1.0),
        (r"earnings per share\s*[\$]?\s*(\d+\.?\d{2})", Metric::EpsBasic, 1.0),
        (r"net income\s*[\$]?\s*(\d+\.?\d*)\s*b", Metric::NetIncome, BILLION),
    ]
    .into_iter()
    .map(|(pattern, metric, multiplier)| NarrativePattern {
        regex: RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("static regex"),
        metric,
        multiplier,
    })
    .collect()
});

const NARRATIVE_REVENUE_WINDOW: MetricRange = MetricRange::new(10.0 * BILLION, 100.0 * BILLION);
const NARRATIVE_MAX_EPS: f64 = 20.0;

fn narrative_window_accepts(metric: Metric, value: f64) -> bool {
    match metric {
        Metric::Revenue => NARRATIVE_REVENUE_WINDOW.contains(value),
        Metric::EpsBasic => value <= NARRATIVE_MAX_EPS,
        _ => true,
    }
}

/// Tier C: prose patterns, each text tried in turn until every metric is found.
fn narrative_scan(texts: &[&str]) -> EarningsMetrics {
    let mut metrics = EarningsMetrics::default();
    for text in texts.iter().filter(|t| !t.is_empty()) {
        for pattern in NARRATIVE_PATTERNS.iter() {
            if pattern.metric.get(&metrics).is_some() {
                continue;
            }
            let found = pattern.regex.captures_iter(text).find_map(|caps| {
                let value = caps[1].parse::<f64>().ok()? * pattern.multiplier;
                narrative_window_accepts(pattern.metric, value).then_some(value)
            });
            *pattern.metric.slot(&mut metrics) = found;
        }
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edgar::parsing::tests::read_test_file;

    fn extract(
        markup: &str,
        item_text: &str,
        ticker: &str,
        policy: &EarningsPolicy,
    ) -> EarningsMetrics {
        let html = Html::parse_document(markup);
        EarningsExtractor::new(policy).extract(
            &EarningsSource::new(markup, &html),
            item_text,
            ticker,
        )
    }

    #[test]
    fn test_validation_drops_implausible_revenue() {
        let policy = EarningsPolicy::default();
        let raw = EarningsMetrics {
            revenue: Some(5_000_000_000.0),
            eps_basic: Some(4.0),
            ..Default::default()
        };
        let validated = policy.validate(&raw, "NVDA");
        assert_eq!(validated.revenue, None);
        assert_eq!(validated.eps_basic, Some(4.0));

        let raw = EarningsMetrics {
            revenue: Some(28_000_000_000.0),
            ..Default::default()
        };
        assert_eq!(policy.validate(&raw, "NVDA").revenue, Some(28_000_000_000.0));
        // unknown tickers use the default entry
        assert_eq!(policy.validate(&raw, "ZZZZ").revenue, Some(28_000_000_000.0));
    }

    #[test]
    fn test_clean_tagged_number() {
        assert_eq!(clean_tagged_number("($1,234.5)"), Some(1234.5));
        assert_eq!(clean_tagged_number("—"), None);
        assert_eq!(clean_tagged_number("-"), None);
    }

    #[test]
    fn test_inline_xbrl_tags_with_scale() {
        let markup = read_test_file("earnings_8k_ixbrl.htm");
        let metrics = extract(&markup, "", "NVDA", &EarningsPolicy::default());
        assert_eq!(metrics.tier, Some(EarningsTier::TagScan));
        assert_eq!(metrics.revenue, Some(22_103_000_000.0));
        assert_eq!(metrics.net_income, Some(12_285_000_000.0));
        assert_eq!(metrics.eps_basic, Some(4.98));
        assert_eq!(metrics.eps_diluted, Some(4.93));
    }

    #[test]
    fn test_small_tagged_revenue_is_read_as_billions() {
        let markup = r#"<html><body><span name="us-gaap:Revenues" contextref="FY24">26.97</span></body></html>"#;
        let metrics = extract(markup, "", "NVDA", &EarningsPolicy::default());
        assert_eq!(metrics.revenue, Some(26.97 * BILLION));
    }

    #[test]
    fn test_narrative_tier() {
        let markup = "<html><body><p>Quarterly report</p></body></html>";
        let item = "Record revenue $35.1 billion, up 94%. GAAP earnings per share $0.78. Net income $19.3 billion.";
        let metrics = extract(markup, item, "NVDA", &EarningsPolicy::default());
        assert_eq!(metrics.tier, Some(EarningsTier::Narrative));
        assert_eq!(metrics.revenue, Some(35.1 * BILLION));
        assert_eq!(metrics.eps_basic, Some(0.78));
        assert_eq!(metrics.net_income, Some(19.3 * BILLION));
    }

    #[test]
    fn test_narrative_window_rejects_small_revenue() {
        let metrics = narrative_scan(&["Revenue $150 b, which is too large", ""]);
        assert_eq!(metrics.revenue, None);
        let metrics = narrative_scan(&["EPS $25.00 this quarter"]);
        assert_eq!(metrics.eps_basic, None);
    }

    #[test]
    fn test_aggressive_scan_reads_raw_markup() {
        let metrics = aggressive_scan(r#"<x name="us-gaap:Revenues" ctx="a">30.04</x><y EarningsPerShareBasic>1.25</y>"#);
        assert_eq!(metrics.revenue, Some(30.04 * BILLION));
        assert_eq!(metrics.eps_basic, Some(1.25));
    }

    #[test]
    fn test_aggressive_scan_keeps_first_match() {
        let markup = r#"<a name="us-gaap:Revenues">30.04</a><b name="us-gaap:Revenues">26.97</b>"#;
        assert_eq!(aggressive_scan(markup).revenue, Some(30.04 * BILLION));
    }

    #[test]
    fn test_static_fallback_only_for_known_tickers() {
        let policy = EarningsPolicy::default();
        let markup = "<html><body><p>No numbers here</p></body></html>";

        let metrics = extract(markup, "", "NVDA", &policy);
        assert_eq!(metrics.tier, Some(EarningsTier::StaticFallback));
        assert_eq!(metrics.revenue, Some(28.0 * BILLION));
        assert_eq!(metrics.eps_diluted, Some(4.48));

        assert!(extract(markup, "", "AAPL", &policy).is_empty());

        let disabled = EarningsPolicy {
            static_fallback_enabled: false,
            ..EarningsPolicy::default()
        };
        assert!(extract(markup, "", "NVDA", &disabled).is_empty());
    }

    #[test]
    fn test_policy_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(
            &path,
            r#"{
                "default_ticker": "AAPL",
                "ranges": {"AAPL": {
                    "revenue": {"min": 50e9, "max": 200e9},
                    "net_income": {"min": 1e9, "max": 60e9},
                    "eps": {"min": 0.1, "max": 10}
                }},
                "static_fallbacks": {},
                "static_fallback_enabled": false
            }"#,
        )
        .unwrap();
        let policy = EarningsPolicy::from_file(&path).unwrap();
        assert!(!policy.static_fallback_enabled);
        assert!(policy.static_fallbacks.is_empty());
        assert_eq!(policy.ranges_for("msft").revenue.min, 50e9);
    }
}
