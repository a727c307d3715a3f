use super::content::classify;
use super::text::{element_text, parse_amount};
use super::types::{ContentKind, Holding, InstrumentType, ResolvedDocument};
use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};

const TICKER_CHARS: usize = 10;

/// Field texts of one information-table row before normalization.
#[derive(Debug, Default, Clone, PartialEq)]
struct RawHolding {
    issuer: String,
    cusip: String,
    value: String,
    shares: String,
    put_call: String,
}

/// Reported values above this are suspected to be whole dollars.
const DOLLAR_SUSPICION_THRESHOLD: u64 = 1_000_000;
const MAX_PLAUSIBLE_PRICE: u128 = 1000;

/// Brings a reported market value to thousands of USD.
///
/// Filers disagree on whether the value column is in dollars or thousands.
/// A large value whose implied price per share (`value * 1000 / shares`)
/// exceeds 1000 is taken to be in dollars and divided by 1000.
pub fn normalize_market_value(reported: u64, shares: u64) -> u64 {
    if reported > DOLLAR_SUSPICION_THRESHOLD && shares > 0 {
        let scaled = reported as u128 * 1000;
        if scaled > MAX_PLAUSIBLE_PRICE * shares as u128 {
            return reported / 1000;
        }
    }
    reported
}

fn instrument_type(put_call: &str) -> InstrumentType {
    match put_call.trim().to_uppercase().as_str() {
        "PUT" => InstrumentType::Put,
        "CALL" => InstrumentType::Call,
        _ => InstrumentType::Stock,
    }
}

fn approximate_ticker(issuer: &str) -> String {
    issuer.trim().to_uppercase().chars().take(TICKER_CHARS).collect()
}

impl RawHolding {
    fn into_holding(self) -> Holding {
        let shares = parse_amount(&self.shares);
        let reported = parse_amount(&self.value);
        Holding {
            ticker: approximate_ticker(&self.issuer),
            cusip: self.cusip.trim().to_string(),
            shares,
            market_value: normalize_market_value(reported, shares),
            instrument_type: instrument_type(&self.put_call),
        }
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn xml_child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name().eq_ignore_ascii_case(name))
}

fn xml_child_text(node: roxmltree::Node<'_, '_>, name: &str) -> String {
    xml_child(node, name)
        .and_then(|child| child.text())
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}

/// Namespace-agnostic scan of a well-formed XML information table.
fn parse_xml_rows(text: &str) -> Result<Vec<RawHolding>, roxmltree::Error> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = roxmltree::Document::parse_with_options(text, options)?;

    Ok(doc
        .descendants()
        .filter(|node| {
            node.is_element() && node.tag_name().name().eq_ignore_ascii_case("infoTable")
        })
        .map(|row| RawHolding {
            issuer: xml_child_text(row, "nameOfIssuer"),
            cusip: xml_child_text(row, "cusip"),
            value: xml_child_text(row, "value"),
            shares: xml_child(row, "shrsOrPrnAmt")
                .map(|amount| xml_child_text(amount, "sshPrnamt"))
                .unwrap_or_default(),
            put_call: xml_child_text(row, "putCall"),
        })
        .collect())
}

fn soup_elements<'a>(root: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    root.descendants().skip(1).filter_map(ElementRef::wrap)
}

fn soup_find<'a>(root: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    soup_elements(root).find(|el| local_name(el.value().name()).eq_ignore_ascii_case(name))
}

fn soup_text(root: ElementRef<'_>, name: &str) -> String {
    soup_find(root, name).map(element_text).unwrap_or_default()
}

/// Tag-soup scan tolerating malformed markup and `ns1:`-style prefixes.
fn parse_soup_rows(html: &Html) -> Vec<RawHolding> {
    soup_elements(html.root_element())
        .filter(|el| local_name(el.value().name()).eq_ignore_ascii_case("infoTable"))
        .map(|row| RawHolding {
            issuer: soup_text(row, "nameOfIssuer"),
            cusip: soup_text(row, "cusip"),
            value: soup_text(row, "value"),
            shares: soup_find(row, "shrsOrPrnAmt")
                .map(|amount| soup_text(amount, "sshPrnamt"))
                .unwrap_or_default(),
            put_call: soup_text(row, "putCall"),
        })
        .collect()
}

/// Column positions of a rendered information table.
#[derive(Debug, Default)]
struct ColumnMap {
    issuer: Option<usize>,
    cusip: Option<usize>,
    value: Option<usize>,
    shares: Option<usize>,
    put_call: Option<usize>,
}

impl ColumnMap {
    fn from_header(cells: &[String]) -> Option<Self> {
        let mut map = ColumnMap::default();
        for (idx, cell) in cells.iter().enumerate() {
            let cell = cell.to_lowercase();
            if cell.contains("issuer") {
                map.issuer.get_or_insert(idx);
            } else if cell.contains("cusip") {
                map.cusip.get_or_insert(idx);
            } else if cell.contains("value") {
                map.value.get_or_insert(idx);
            } else if cell.contains("shrs") || cell.contains("amt") || cell.contains("shares") {
                map.shares.get_or_insert(idx);
            } else if cell.contains("put") {
                map.put_call.get_or_insert(idx);
            }
        }
        (map.issuer.is_some() && map.cusip.is_some() && map.value.is_some()).then_some(map)
    }

    fn row(&self, cells: &[String]) -> Option<RawHolding> {
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| cells.get(i))
                .cloned()
                .unwrap_or_default()
        };
        let cusip = cell(self.cusip);
        if cusip.is_empty() {
            return None;
        }
        Some(RawHolding {
            issuer: cell(self.issuer),
            cusip,
            value: cell(self.value),
            shares: cell(self.shares),
            put_call: cell(self.put_call),
        })
    }
}

/// Rendered information tables, recognized by their header row.
fn parse_rendered_table_rows(html: &Html) -> Vec<RawHolding> {
    let (Ok(table_sel), Ok(row_sel), Ok(cell_sel)) = (
        Selector::parse("table"),
        Selector::parse("tr"),
        Selector::parse("td, th"),
    ) else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for table in html.select(&table_sel) {
        let mut columns: Option<ColumnMap> = None;
        for tr in table.select(&row_sel) {
            let cells: Vec<String> = tr.select(&cell_sel).map(element_text).collect();
            if let Some(map) = &columns {
                rows.extend(map.row(&cells));
            } else {
                columns = ColumnMap::from_header(&cells);
            }
        }
    }
    rows
}

/// Extracts holdings from a fetched information table.
pub fn extract_holdings(document: &ResolvedDocument) -> Result<Vec<Holding>> {
    extract_holdings_from_text(&document.text(), document.content_kind)
}

pub fn extract_holdings_from_text(text: &str, kind: ContentKind) -> Result<Vec<Holding>> {
    let rows = match kind {
        ContentKind::StructuredMarkup => match parse_xml_rows(text) {
            Ok(rows) if !rows.is_empty() => {
                log::debug!("XML scan found {} infoTable rows", rows.len());
                rows
            }
            Ok(_) => parse_soup_rows(&Html::parse_document(text)),
            Err(e) => {
                log::warn!("XML parse failed ({}), retrying as tag soup", e);
                let rows = parse_soup_rows(&Html::parse_document(text));
                if rows.is_empty() && !text.trim().is_empty() {
                    return Err(anyhow!("malformed information table: {}", e));
                }
                rows
            }
        },
        ContentKind::TaggedHtml => {
            let html = Html::parse_document(text);
            let rows = parse_soup_rows(&html);
            if rows.is_empty() {
                log::debug!("No infoTable elements in HTML, trying rendered tables");
                parse_rendered_table_rows(&html)
            } else {
                rows
            }
        }
    };

    let holdings: Vec<Holding> = rows.into_iter().map(RawHolding::into_holding).collect();
    log::info!("Extracted {} holdings", holdings.len());
    Ok(holdings)
}

/// Classifies the body first, then extracts.
pub fn extract_holdings_auto(text: &str) -> Result<Vec<Holding>> {
    extract_holdings_from_text(text, classify(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edgar::parsing::tests::read_test_file;

    #[test]
    fn test_scale_disambiguation() {
        assert_eq!(normalize_market_value(25_000_000, 10_000), 25_000);
        assert_eq!(normalize_market_value(500_000, 0), 500_000);
        // implied price of exactly 1000 stays in thousands
        assert_eq!(normalize_market_value(2_000_000, 2_000_000), 2_000_000);
        assert_eq!(normalize_market_value(2_000_001, 2_000_000), 2_000);
        assert_eq!(normalize_market_value(5_000_000, 0), 5_000_000);
    }

    #[test]
    fn test_namespaced_xml_table() {
        let text = read_test_file("infotable.xml");
        let holdings = extract_holdings_auto(&text).unwrap();
        assert_eq!(holdings.len(), 3);

        assert_eq!(holdings[0].ticker, "APPLE INC");
        assert_eq!(holdings[0].cusip, "037833100");
        assert_eq!(holdings[0].shares, 915_560_382);
        assert_eq!(holdings[0].market_value, 174_347_632);
        assert_eq!(holdings[0].instrument_type, InstrumentType::Stock);

        // reported in dollars
        assert_eq!(holdings[1].ticker, "BANK OF AM");
        assert_eq!(holdings[1].market_value, 25_000);

        assert_eq!(holdings[2].instrument_type, InstrumentType::Put);
        assert_eq!(holdings[2].shares, 0);
    }

    #[test]
    fn test_missing_shares_keeps_value() {
        let xml = r#"<?xml version="1.0"?>
<informationTable xmlns="http://www.sec.gov/edgar/document/thirteenf/informationtable">
  <infoTable>
    <nameOfIssuer>Tiny Corp</nameOfIssuer>
    <cusip>000000000</cusip>
    <value>500,000</value>
  </infoTable>
</informationTable>"#;
        let holdings = extract_holdings_auto(xml).unwrap();
        assert_eq!(
            holdings,
            vec![Holding {
                ticker: "TINY CORP".to_string(),
                cusip: "000000000".to_string(),
                shares: 0,
                market_value: 500_000,
                instrument_type: InstrumentType::Stock,
            }]
        );
    }

    #[test]
    fn test_malformed_xml_falls_back_to_tag_soup() {
        let xml = r#"<?xml version="1.0"?>
<ns1:informationTable xmlns:ns1="http://www.sec.gov/edgar/document/thirteenf/informationtable">
  <ns1:infoTable>
    <ns1:nameOfIssuer>AT&T INC</ns1:nameOfIssuer>
    <ns1:cusip>00206R102</ns1:cusip>
    <ns1:value>1200</ns1:value>
    <ns1:shrsOrPrnAmt><ns1:sshPrnamt>50000</ns1:sshPrnamt></ns1:shrsOrPrnAmt>
  </ns1:infoTable>
</ns1:informationTable>"#;
        let holdings = extract_holdings_auto(xml).unwrap();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].ticker, "AT&T INC");
        assert_eq!(holdings[0].shares, 50_000);
        assert_eq!(holdings[0].market_value, 1200);
    }

    #[test]
    fn test_unparsable_document_is_an_error() {
        assert!(extract_holdings_auto("<?xml version=\"1.0\"?><a><b></a>").is_err());
        assert!(extract_holdings_auto("").unwrap().is_empty());
    }

    #[test]
    fn test_rendered_html_table() {
        let text = read_test_file("infotable_rendered.html");
        let holdings = extract_holdings_from_text(&text, ContentKind::TaggedHtml).unwrap();
        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0].cusip, "594918104");
        assert_eq!(holdings[0].shares, 1_000);
        assert_eq!(holdings[0].market_value, 420);
        assert_eq!(holdings[1].instrument_type, InstrumentType::Call);
    }
}
