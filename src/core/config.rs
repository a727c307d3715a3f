use crate::edgar::parsing::earnings::EarningsPolicy;
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "filing-parser (software@example.com)";
pub const DEFAULT_BASE_URL: &str = "https://www.sec.gov";

#[derive(Clone, Debug)]
pub struct ParserConfig {
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub user_agent: String,
    pub base_url: String,
    pub lookup_timeout: Duration,
    pub index_timeout: Duration,
    pub document_timeout: Duration,
    pub earnings_policy: EarningsPolicy,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            store_key: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            lookup_timeout: Duration::from_secs(10),
            index_timeout: Duration::from_secs(30),
            document_timeout: Duration::from_secs(120),
            earnings_policy: EarningsPolicy::default(),
        }
    }
}

impl ParserConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests need not touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| lookup(*key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match var(&[key]) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| {
                        anyhow!("{} must be a whole number of seconds, got {:?}", key, raw)
                    }),
                None => Ok(default),
            }
        };

        let mut earnings_policy = match var(&["EARNINGS_POLICY_PATH"]) {
            Some(path) => EarningsPolicy::from_file(Path::new(&path))
                .with_context(|| format!("loading earnings policy from {}", path))?,
            None => defaults.earnings_policy,
        };
        if let Some(flag) = var(&["EARNINGS_STATIC_FALLBACK"]) {
            earnings_policy.static_fallback_enabled =
                matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }

        Ok(Self {
            store_url: var(&["FILING_STORE_URL", "SUPABASE_URL"]),
            store_key: var(&["FILING_STORE_KEY", "SUPABASE_SERVICE_KEY"]),
            user_agent: var(&["EDGAR_USER_AGENT", "USER_AGENT"]).unwrap_or(defaults.user_agent),
            base_url: var(&["EDGAR_BASE_URL"])
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            lookup_timeout: secs("LOOKUP_TIMEOUT_SECS", defaults.lookup_timeout)?,
            index_timeout: secs("INDEX_TIMEOUT_SECS", defaults.index_timeout)?,
            document_timeout: secs("DOCUMENT_TIMEOUT_SECS", defaults.document_timeout)?,
            earnings_policy,
        })
    }

    /// Credentials for the REST record store; only the REST store requires them.
    pub fn store_credentials(&self) -> Result<(&str, &str)> {
        let url = self
            .store_url
            .as_deref()
            .ok_or_else(|| anyhow!("FILING_STORE_URL environment variable not set"))?;
        let key = self
            .store_key
            .as_deref()
            .ok_or_else(|| anyhow!("FILING_STORE_KEY environment variable not set"))?;
        Ok((url, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ParserConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.lookup_timeout, Duration::from_secs(10));
        assert_eq!(config.document_timeout, Duration::from_secs(120));
        assert!(config.store_credentials().is_err());
        assert!(config.earnings_policy.static_fallback_enabled);
    }

    #[test]
    fn test_store_aliases_and_overrides() {
        let config = ParserConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://db.example.com"),
            ("SUPABASE_SERVICE_KEY", "secret"),
            ("EDGAR_BASE_URL", "http://localhost:8080/"),
            ("LOOKUP_TIMEOUT_SECS", "3"),
            ("EARNINGS_STATIC_FALLBACK", "false"),
        ]))
        .unwrap();
        assert_eq!(
            config.store_credentials().unwrap(),
            ("https://db.example.com", "secret")
        );
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.lookup_timeout, Duration::from_secs(3));
        assert!(!config.earnings_policy.static_fallback_enabled);
    }

    #[test]
    fn test_bad_timeout_is_rejected() {
        let result = ParserConfig::from_lookup(lookup(&[("DOCUMENT_TIMEOUT_SECS", "soon")]));
        assert!(result.is_err());
    }
}
