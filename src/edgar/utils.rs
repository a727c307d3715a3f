use anyhow::{anyhow, Result};
use url::Url;

/// CIKs appear zero-padded in feeds but unpadded in archive paths.
pub fn normalize_cik(cik: &str) -> String {
    let trimmed = cik.trim().trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn compact_accession(accession_number: &str) -> String {
    accession_number.trim().replace('-', "")
}

/// `{base}/Archives/edgar/data/{cik}/{accession}/`
pub fn archive_dir_url(base_url: &str, cik: &str, accession_number: &str) -> String {
    format!(
        "{}/Archives/edgar/data/{}/{}/",
        base_url.trim_end_matches('/'),
        normalize_cik(cik),
        compact_accession(accession_number)
    )
}

/// Resolves absolute, root-relative and relative hrefs against `page_url`.
pub fn resolve_href(page_url: &str, href: &str) -> Result<String> {
    let base = Url::parse(page_url).map_err(|e| anyhow!("invalid page url {}: {}", page_url, e))?;
    let resolved = base
        .join(href.trim())
        .map_err(|e| anyhow!("cannot resolve {} against {}: {}", href, page_url, e))?;
    Ok(resolved.to_string())
}

/// Pulls the wrapped document path out of an inline viewer URL (`/ix?doc=/Archives/...`).
pub fn viewer_doc_path(filing_url: &str) -> Option<String> {
    if !filing_url.contains("ix?doc=") {
        return None;
    }
    let url = Url::parse(filing_url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "doc")
        .map(|(_, value)| value.into_owned())
        .filter(|doc| !doc.is_empty())
}

/// Directory part of a path or URL, including the trailing slash.
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "",
    }
}

/// Truncates to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_dir_url() {
        assert_eq!(
            archive_dir_url("https://www.sec.gov", "0001067983", "0000950123-24-002518"),
            "https://www.sec.gov/Archives/edgar/data/1067983/000095012324002518/"
        );
        assert_eq!(normalize_cik("0000"), "0");
    }

    #[test]
    fn test_resolve_href_variants() {
        let page = "https://www.sec.gov/Archives/edgar/data/1/0001/0001-index.htm";
        assert_eq!(
            resolve_href(page, "https://other.example/a.xml").unwrap(),
            "https://other.example/a.xml"
        );
        assert_eq!(
            resolve_href(page, "/Archives/edgar/data/1/0001/infotable.xml").unwrap(),
            "https://www.sec.gov/Archives/edgar/data/1/0001/infotable.xml"
        );
        assert_eq!(
            resolve_href(page, "infotable.xml").unwrap(),
            "https://www.sec.gov/Archives/edgar/data/1/0001/infotable.xml"
        );
    }

    #[test]
    fn test_viewer_doc_path() {
        assert_eq!(
            viewer_doc_path(
                "https://www.sec.gov/ix?doc=/Archives/edgar/data/1045810/000104581024000113/nvda-20240221.htm"
            )
            .as_deref(),
            Some("/Archives/edgar/data/1045810/000104581024000113/nvda-20240221.htm")
        );
        assert_eq!(viewer_doc_path("https://www.sec.gov/Archives/x.htm"), None);
        assert_eq!(parent_dir("/Archives/a/b.htm"), "/Archives/a/");
    }

    #[test]
    fn test_truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("ÉÉÉ", 2), "ÉÉ");
        assert_eq!(truncate_chars("ab", 5), "ab");
    }
}
