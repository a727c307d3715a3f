use super::types::ContentKind;
use crate::edgar::utils::truncate_chars;

const SNIFF_CHARS: usize = 500;

/// Decides whether a body is machine XML or a rendered HTML page.
pub fn classify(text: &str) -> ContentKind {
    let head = truncate_chars(text, SNIFF_CHARS).to_ascii_lowercase();
    if head.contains("<!doctype html")
        || text.trim_start().to_ascii_lowercase().starts_with("<html")
    {
        ContentKind::TaggedHtml
    } else {
        ContentKind::StructuredMarkup
    }
}

/// True for a genuine XML payload: an XML declaration and no HTML doctype near the top.
pub fn is_raw_xml(text: &str) -> bool {
    text.trim_start().starts_with("<?xml")
        && !truncate_chars(text, SNIFF_CHARS).contains("<!DOCTYPE html")
}

/// Inline-XBRL or plain XBRL markers in a document's text or markup.
pub fn has_structured_data_markers(text: &str) -> bool {
    truncate_chars(text, SNIFF_CHARS).to_lowercase().contains("xbrl")
        || text.contains("us-gaap:")
        || text.contains("xbrli:")
}

/// An archive landing page served in place of a filing.
pub fn is_landing_page(text: &str) -> bool {
    let head = truncate_chars(text, SNIFF_CHARS).to_lowercase();
    head.contains("sec.gov") && head.contains("skip to")
}
