use crate::core::error::FilingError;
use crate::core::types::FilingReference;
use crate::edgar::client::{decode_body, DocumentFetcher, RequestKind};
use crate::edgar::parsing::content::{classify, is_landing_page, is_raw_xml};
use crate::edgar::parsing::text::{collapse_whitespace, document_text};
use crate::edgar::parsing::types::ResolvedDocument;
use crate::edgar::report::ReportType;
use crate::edgar::utils::{
    archive_dir_url, compact_accession, normalize_cik, parent_dir, resolve_href, viewer_doc_path,
};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use strum::Display;

/// Historically observed information-table filenames, most common first.
pub const HOLDINGS_FILENAMES: [&str; 6] = [
    "Form13FInfoTable.xml",
    "infotable.xml",
    "InfoTable.xml",
    "form13finfotable.xml",
    "form13fInfoTable.xml",
    "Form13fInfoTable.xml",
];

/// Conventional primary-document names of material-event reports.
pub const EVENT_FILENAMES: [&str; 2] = ["d8k.htm", "d8ka.htm"];

const EVENT_LINK_FRAGMENT: &str = "d8k";
const TEXT_SCAN_EXCLUSIONS: [&str; 5] = ["xbrl", "ixbrl", "cover", "exhibit", "index"];
const READABILITY_PREFIX_BYTES: usize = 1000;

static FILENAME_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z0-9\-]+\.html?").expect("static regex"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// One way of finding the data-bearing document of a filing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LocateStrategy {
    /// HEAD each known filename in the archive directory.
    KnownNames,
    /// Follow matching anchors on the filing index page.
    IndexLinks,
    /// Try filename-like tokens in the index page text.
    IndexTextScan,
    /// Use the unwrapped viewer path or the supplied URL as-is.
    LastResort,
    /// The supplied URL is the document.
    Direct,
}

/// Where a filing's document was found, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub url: String,
    pub strategy: LocateStrategy,
}

/// Per-run derived paths plus the lazily fetched index page.
struct LocateContext<'r> {
    reference: &'r FilingReference,
    /// Directory that candidate filenames are resolved against.
    candidate_dir: String,
    index_url: String,
    viewer_doc: Option<String>,
    index_page: Option<Option<String>>,
}

pub struct Locator<'a> {
    fetcher: &'a dyn DocumentFetcher,
    base_url: String,
}

impl<'a> Locator<'a> {
    pub fn new(fetcher: &'a dyn DocumentFetcher, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Strategies tried for a filing, in order.
    pub fn plan(reference: &FilingReference) -> Vec<LocateStrategy> {
        let viewer = reference
            .filing_url
            .as_deref()
            .and_then(viewer_doc_path)
            .is_some();
        match reference.report_type {
            ReportType::Form13F => vec![LocateStrategy::KnownNames, LocateStrategy::IndexLinks],
            ReportType::Form8K if viewer => vec![
                LocateStrategy::IndexLinks,
                LocateStrategy::KnownNames,
                LocateStrategy::IndexTextScan,
                LocateStrategy::LastResort,
            ],
            _ => vec![LocateStrategy::Direct],
        }
    }

    fn context<'r>(&self, reference: &'r FilingReference) -> LocateContext<'r> {
        let archive_dir =
            archive_dir_url(&self.base_url, &reference.cik, &reference.accession_number);
        let viewer_doc = reference.filing_url.as_deref().and_then(viewer_doc_path);

        let (candidate_dir, index_url) = match (&reference.report_type, &viewer_doc) {
            (ReportType::Form8K, Some(doc)) => {
                let doc_dir = parent_dir(doc);
                let dir = if doc_dir.starts_with("http") {
                    doc_dir.to_string()
                } else {
                    format!("{}{}", self.base_url, doc_dir)
                };
                (dir, archive_dir)
            }
            _ => {
                let index = reference
                    .filing_url
                    .clone()
                    .unwrap_or_else(|| archive_dir.clone());
                (archive_dir, index)
            }
        };

        LocateContext {
            reference,
            candidate_dir,
            index_url,
            viewer_doc,
            index_page: None,
        }
    }

    /// Tries each planned strategy until one yields a URL.
    pub async fn resolve(&self, reference: &FilingReference) -> Result<Location, FilingError> {
        let mut ctx = self.context(reference);
        for strategy in Self::plan(reference) {
            log::info!("Locating {} document via {}", reference.report_type, strategy);
            match self.attempt(strategy, &mut ctx).await {
                Some(url) => {
                    log::info!("{} found document: {}", strategy, url);
                    return Ok(Location { url, strategy });
                }
                None => log::debug!("{} found nothing", strategy),
            }
        }
        Err(FilingError::DocumentNotFound {
            accession_number: reference.accession_number.clone(),
        })
    }

    async fn attempt(
        &self,
        strategy: LocateStrategy,
        ctx: &mut LocateContext<'_>,
    ) -> Option<String> {
        match strategy {
            LocateStrategy::KnownNames => self.known_names(ctx).await,
            LocateStrategy::IndexLinks => self.index_links(ctx).await,
            LocateStrategy::IndexTextScan => self.index_text_scan(ctx).await,
            LocateStrategy::LastResort => match &ctx.viewer_doc {
                Some(doc) if doc.starts_with("http") => Some(doc.clone()),
                Some(doc) => Some(format!("{}{}", self.base_url, doc)),
                None => ctx.reference.filing_url.clone(),
            },
            LocateStrategy::Direct => ctx.reference.filing_url.clone(),
        }
    }

    async fn is_reachable(&self, url: &str) -> bool {
        match self.fetcher.head(url).await {
            Ok(status) => (200..300).contains(&status),
            Err(e) => {
                log::debug!("HEAD {} failed: {}", url, e);
                false
            }
        }
    }

    /// Fetches a candidate and checks it is genuine XML rather than a rendered page.
    async fn is_structured_markup(&self, url: &str) -> bool {
        match self.fetcher.get(url, RequestKind::Lookup).await {
            Ok(body) => is_raw_xml(&decode_body(&body)),
            Err(e) => {
                log::debug!("GET {} failed: {}", url, e);
                false
            }
        }
    }

    async fn is_readable_filing(&self, url: &str) -> bool {
        if !self.is_reachable(url).await {
            return false;
        }
        match self.fetcher.get_prefix(url, READABILITY_PREFIX_BYTES).await {
            Ok(prefix) => {
                let prefix = String::from_utf8_lossy(&prefix);
                prefix.contains("Item") || prefix.contains("item")
            }
            Err(_) => false,
        }
    }

    async fn index_page(&self, ctx: &mut LocateContext<'_>) -> Option<String> {
        if ctx.index_page.is_none() {
            let page = match self.fetcher.get(&ctx.index_url, RequestKind::Index).await {
                Ok(body) => Some(decode_body(&body)),
                Err(e) => {
                    log::warn!("Index page {} unavailable: {}", ctx.index_url, e);
                    None
                }
            };
            ctx.index_page = Some(page);
        }
        ctx.index_page.clone().flatten()
    }

    async fn known_names(&self, ctx: &mut LocateContext<'_>) -> Option<String> {
        match ctx.reference.report_type {
            ReportType::Form13F => {
                for name in HOLDINGS_FILENAMES {
                    let url = format!("{}{}", ctx.candidate_dir, name);
                    if self.is_reachable(&url).await && self.is_structured_markup(&url).await {
                        return Some(url);
                    }
                }
                None
            }
            ReportType::Form8K => {
                for name in EVENT_FILENAMES {
                    let url = format!("{}{}", ctx.candidate_dir, name);
                    if self.is_reachable(&url).await {
                        return Some(url);
                    }
                }
                None
            }
            _ => None,
        }
    }

    async fn index_links(&self, ctx: &mut LocateContext<'_>) -> Option<String> {
        let page = self.index_page(ctx).await?;
        let hrefs = anchor_hrefs(&page);

        match ctx.reference.report_type {
            ReportType::Form13F => {
                let candidates = hrefs
                    .iter()
                    .filter(|href| is_holdings_link(href))
                    .filter_map(|href| resolve_href(&ctx.index_url, href).ok())
                    .unique()
                    .collect::<Vec<_>>();
                for url in candidates {
                    if self.is_structured_markup(&url).await {
                        return Some(url);
                    }
                }
                None
            }
            ReportType::Form8K => {
                let filing_dir = format!(
                    "/{}/{}/",
                    normalize_cik(&ctx.reference.cik),
                    compact_accession(&ctx.reference.accession_number)
                );
                hrefs
                    .iter()
                    .filter(|href| {
                        let lower = href.to_lowercase();
                        lower.contains(EVENT_LINK_FRAGMENT) && lower.ends_with(".htm")
                    })
                    .filter_map(|href| resolve_href(&ctx.candidate_dir, href).ok())
                    .find(|url| url.contains(&filing_dir) || url.starts_with(&ctx.candidate_dir))
            }
            _ => None,
        }
    }

    async fn index_text_scan(&self, ctx: &mut LocateContext<'_>) -> Option<String> {
        let page = self.index_page(ctx).await?;
        let text = document_text(&Html::parse_document(&page)).to_lowercase();
        let tokens = FILENAME_TOKEN
            .find_iter(&text)
            .map(|m| m.as_str().to_string())
            .filter(|token| !TEXT_SCAN_EXCLUSIONS.iter().any(|x| token.contains(x)))
            .unique()
            .collect::<Vec<_>>();
        log::debug!("Index text scan candidates: {:?}", tokens);

        for token in tokens {
            let url = format!("{}{}", ctx.candidate_dir, token);
            if self.is_readable_filing(&url).await {
                return Some(url);
            }
        }
        None
    }

    /// Downloads the located document, recovering once from an archive
    /// landing page, and classifies it.
    pub async fn fetch(
        &self,
        location: &Location,
        report_type: &ReportType,
    ) -> Result<ResolvedDocument, FilingError> {
        let mut url = location.url.clone();
        let mut raw_bytes = self.get_document(&url).await?;

        if matches!(report_type, ReportType::Form8K) {
            if let Some(target) = landing_page_target(&url, &decode_body(&raw_bytes)) {
                log::warn!("{} is an archive landing page, following {}", url, target);
                raw_bytes = self.get_document(&target).await?;
                url = target;
            }
        }

        let content_kind = classify(&decode_body(&raw_bytes));
        log::debug!("Fetched {} bytes from {} as {}", raw_bytes.len(), url, content_kind);
        Ok(ResolvedDocument {
            url,
            raw_bytes,
            content_kind,
        })
    }

    async fn get_document(&self, url: &str) -> Result<Vec<u8>, FilingError> {
        self.fetcher
            .get(url, RequestKind::Document)
            .await
            .map_err(|source| FilingError::Fetch {
                url: url.to_string(),
                source,
            })
    }
}

fn is_holdings_link(href: &str) -> bool {
    let lower = href.to_lowercase();
    lower.ends_with(".xml")
        && HOLDINGS_FILENAMES
            .iter()
            .any(|name| lower.contains(&name.to_lowercase()))
}

fn anchor_hrefs(page: &str) -> Vec<String> {
    Html::parse_document(page)
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect()
}

/// When `body` is an archive landing page, the first link into the filing data.
fn landing_page_target(page_url: &str, body: &str) -> Option<String> {
    let html = Html::parse_document(body);
    if !is_landing_page(&collapse_whitespace(&document_text(&html))) {
        return None;
    }
    html.select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| {
            let lower = href.to_lowercase();
            lower.contains("edgar") && lower.contains("data")
        })
        .and_then(|href| resolve_href(page_url, href).ok())
}
