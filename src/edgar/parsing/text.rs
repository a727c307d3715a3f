use chrono::NaiveDate;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use unicode_normalization::UnicodeNormalization;

/// Tags whose text makes up the searchable body of a tagged document.
pub const STRUCTURAL_TAGS: [&str; 9] = ["div", "p", "td", "th", "span", "h1", "h2", "h3", "h4"];

static STRUCTURAL_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(&STRUCTURAL_TAGS.join(", ")).expect("static selector")
});

static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[/-](\d{1,2})[/-](\d{2,4})").expect("static regex"));
static WORDY_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+)\s+(\d{1,2}),\s+(\d{4})").expect("static regex"));
static NON_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d.]").expect("static regex"));

const TRANSACTION_DATE_FORMATS: [&str; 4] = ["%m/%d/%Y", "%m-%d-%Y", "%Y-%m-%d", "%d/%m/%Y"];

/// Collapses runs of whitespace into single spaces and trims.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().join(" ")
}

/// Text of an element with each text node trimmed and joined by a space.
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .join(" ")
}

/// Flat text of a whole document.
pub fn document_text(html: &Html) -> String {
    html.root_element().text().collect::<String>()
}

/// Block-level structural tags; `span` is inline and belongs to its enclosing block.
fn is_block(element: &ElementRef<'_>) -> bool {
    let name = element.value().name();
    name != "span" && STRUCTURAL_TAGS.contains(&name)
}

/// Text nodes whose nearest block ancestor is `block`, including inline children.
fn owned_text(block: ElementRef<'_>) -> String {
    block
        .descendants()
        .filter_map(|node| node.value().as_text().map(|text| (node, text)))
        .filter(|(node, _)| {
            node.ancestors()
                .filter_map(ElementRef::wrap)
                .find(is_block)
                .map_or(false, |owner| owner.id() == block.id())
        })
        .map(|(_, text)| text.trim())
        .filter(|s| !s.is_empty())
        .join(" ")
}

/// Searchable corpus of a tagged document: one line per block element holding
/// its own text, NFKC-normalized. Spans outside any block get a line of their
/// own. Falls back to flat text when there is no structure.
pub fn structural_corpus(html: &Html) -> String {
    let lines: Vec<String> = html
        .select(&STRUCTURAL_SELECTOR)
        .filter_map(|element| {
            if is_block(&element) {
                return Some(owned_text(element));
            }
            let nested = element
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|ancestor| STRUCTURAL_TAGS.contains(&ancestor.value().name()));
            (!nested).then(|| element_text(element))
        })
        .filter(|text| !text.is_empty())
        .collect();

    let corpus = if lines.is_empty() {
        document_text(html)
    } else {
        lines.join("\n")
    };
    corpus.nfkc().collect()
}

/// Holdings amounts: thousands separators stripped, fraction truncated.
/// Anything unparsable or negative becomes 0.
pub fn parse_amount(raw: &str) -> u64 {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => value.trunc() as u64,
        _ => 0,
    }
}

/// Keeps only digits and dots, then parses. Used for table cells such as `$1,000.50`.
pub fn parse_cell_number(raw: &str) -> Option<f64> {
    let cleaned = NON_NUMERIC.replace_all(raw, "");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_transaction_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    TRANSACTION_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

fn expand_year(raw: &str) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    match raw.len() {
        2 if year < 70 => Some(2000 + year),
        2 => Some(1900 + year),
        4 => Some(year),
        _ => None,
    }
}

/// First date mentioned in free text: `MM/DD/YYYY`, `MM-DD-YY` or `Month D, YYYY`.
pub fn find_event_date(text: &str) -> Option<NaiveDate> {
    let numeric = NUMERIC_DATE.captures_iter(text).find_map(|caps| {
        let month = caps[1].parse().ok()?;
        let day = caps[2].parse().ok()?;
        NaiveDate::from_ymd_opt(expand_year(&caps[3])?, month, day)
    });
    if numeric.is_some() {
        return numeric;
    }

    WORDY_DATE.captures_iter(text).find_map(|caps| {
        let candidate = format!("{} {} {}", &caps[1], &caps[2], &caps[3]);
        NaiveDate::parse_from_str(&candidate, "%B %d %Y")
            .or_else(|_| NaiveDate::parse_from_str(&candidate, "%b %d %Y"))
            .ok()
    })
}
