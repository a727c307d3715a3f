use crate::core::config::ParserConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chardet::detect;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use reqwest::{header, Client};
use std::time::Duration;

/// Which timeout budget a request runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Lookup,
    Index,
    Document,
}

/// HTTP seam used by the locator and the pipeline.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Status code of a HEAD request.
    async fn head(&self, url: &str) -> Result<u16>;

    /// Body of a GET; non-success statuses are errors.
    async fn get(&self, url: &str, kind: RequestKind) -> Result<Vec<u8>>;

    /// At most `max_bytes` from the start of the body.
    async fn get_prefix(&self, url: &str, max_bytes: usize) -> Result<Vec<u8>> {
        let mut body = self.get(url, RequestKind::Lookup).await?;
        body.truncate(max_bytes);
        Ok(body)
    }
}

pub struct EdgarClient {
    client: Client,
    user_agent: String,
    lookup_timeout: Duration,
    index_timeout: Duration,
    document_timeout: Duration,
}

impl EdgarClient {
    pub fn new(config: &ParserConfig) -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .build()
            .map_err(|e| anyhow!("failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            lookup_timeout: config.lookup_timeout,
            index_timeout: config.index_timeout,
            document_timeout: config.document_timeout,
        })
    }

    fn timeout(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Lookup => self.lookup_timeout,
            RequestKind::Index => self.index_timeout,
            RequestKind::Document => self.document_timeout,
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        kind: RequestKind,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::ACCEPT_ENCODING, "gzip, deflate")
            .timeout(self.timeout(kind))
    }
}

#[async_trait]
impl DocumentFetcher for EdgarClient {
    async fn head(&self, url: &str) -> Result<u16> {
        log::debug!("HEAD {}", url);
        let response = self
            .request(reqwest::Method::HEAD, url, RequestKind::Lookup)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }

    async fn get(&self, url: &str, kind: RequestKind) -> Result<Vec<u8>> {
        log::debug!("GET {} ({:?})", url, kind);
        let response = self.request(reqwest::Method::GET, url, kind).send().await?;

        log::debug!("Response status: {}", response.status());
        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP request failed with status: {}",
                response.status()
            ));
        }

        let body = response.bytes().await?;
        log::debug!("Received content length: {}", body.len());
        Ok(body.to_vec())
    }

    async fn get_prefix(&self, url: &str, max_bytes: usize) -> Result<Vec<u8>> {
        let mut response = self
            .request(reqwest::Method::GET, url, RequestKind::Lookup)
            .header(header::RANGE, format!("bytes=0-{}", max_bytes.saturating_sub(1)))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP request failed with status: {}",
                response.status()
            ));
        }

        // Servers may ignore the range header, so stop reading once enough arrived
        let mut prefix = Vec::with_capacity(max_bytes);
        while prefix.len() < max_bytes {
            match response.chunk().await? {
                Some(chunk) => prefix.extend_from_slice(&chunk),
                None => break,
            }
        }
        prefix.truncate(max_bytes);
        Ok(prefix)
    }
}

/// Decodes a response body: UTF-8 when valid, then the detected charset,
/// then Windows-1252, which accepts any byte sequence.
pub fn decode_body(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    let charset = detect(&bytes.to_vec()).0;
    let encoding = Encoding::for_label(charset.as_bytes())
        .filter(|encoding| *encoding != UTF_8)
        .unwrap_or(WINDOWS_1252);
    log::debug!("Decoding body as {} (detected {:?})", encoding.name(), charset);

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors && encoding != WINDOWS_1252 {
        return WINDOWS_1252.decode(bytes).0.into_owned();
    }
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_passthrough() {
        assert_eq!(decode_body("Société Générale".as_bytes()), "Société Générale");
    }

    #[test]
    fn test_decode_invalid_utf8_never_fails() {
        let bytes = b"<nameOfIssuer>Soci\xe9t\xe9 G\xe9n\xe9rale</nameOfIssuer>";
        let text = decode_body(bytes);
        assert!(text.starts_with("<nameOfIssuer>Soci"));
        assert!(text.ends_with("</nameOfIssuer>"));
    }

    #[test]
    fn test_client_uses_configured_timeouts() {
        let config = ParserConfig::default();
        let client = EdgarClient::new(&config).unwrap();
        assert_eq!(client.timeout(RequestKind::Lookup), Duration::from_secs(10));
        assert_eq!(client.timeout(RequestKind::Index), Duration::from_secs(30));
        assert_eq!(client.timeout(RequestKind::Document), Duration::from_secs(120));
    }
}
