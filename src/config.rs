use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::EtlError;
use crate::fetch::DEFAULT_CONCURRENCY;
use crate::retry::{DEFAULT_ATTEMPTS, DEFAULT_DELAY};

pub const DEFAULT_CONFIG_FILE: &str = "ncbi-virus-etl.json";
pub const DEFAULT_QUERY: &str = r#"(SARS-CoV-2[Organism]) AND South Dakota[Location] AND ("2023/01/01"[PDAT]:"2023/03/31"[PDAT])"#;
pub const DEFAULT_EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/";
const MAX_RETMAX: u32 = 10_000;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub eutils_base_url: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub retmax: Option<u32>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub retry: RetryEntry,
    #[serde(default)]
    pub relational: RelationalEntry,
    #[serde(default)]
    pub search: SearchEntry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub delay_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RelationalEntry {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SearchEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub query: String,
    pub eutils_base_url: String,
    pub database: String,
    pub retmax: u32,
    pub cache_dir: Utf8PathBuf,
    pub concurrency: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub relational_path: Utf8PathBuf,
    pub relational_table: String,
    pub search_url: String,
    pub search_index: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, EtlError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            tracing::debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| EtlError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| EtlError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, EtlError> {
        let query = non_blank(config.query).unwrap_or_else(|| DEFAULT_QUERY.to_string());

        let mut eutils_base_url = non_blank(config.eutils_base_url)
            .unwrap_or_else(|| DEFAULT_EUTILS_BASE_URL.to_string());
        if !eutils_base_url.ends_with('/') {
            eutils_base_url.push('/');
        }

        let retmax = config.retmax.unwrap_or(1000);
        if retmax == 0 || retmax > MAX_RETMAX {
            return Err(EtlError::InvalidConfig(format!(
                "retmax must be between 1 and {MAX_RETMAX}, got {retmax}"
            )));
        }

        let concurrency = config.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(EtlError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let retry_attempts = config.retry.attempts.unwrap_or(DEFAULT_ATTEMPTS);
        if retry_attempts == 0 {
            return Err(EtlError::InvalidConfig(
                "retry.attempts must be at least 1".to_string(),
            ));
        }

        let relational_table =
            non_blank(config.relational.table).unwrap_or_else(|| "ncbi_records".to_string());
        if !is_identifier(&relational_table) {
            return Err(EtlError::InvalidConfig(format!(
                "relational.table is not a plain identifier: {relational_table}"
            )));
        }

        let search_index =
            non_blank(config.search.index).unwrap_or_else(|| "ncbi_records".to_string());
        if search_index.contains(['/', ' ', '?', '#']) {
            return Err(EtlError::InvalidConfig(format!(
                "search.index contains illegal characters: {search_index}"
            )));
        }

        Ok(ResolvedConfig {
            query,
            eutils_base_url,
            database: non_blank(config.database).unwrap_or_else(|| "nuccore".to_string()),
            retmax,
            cache_dir: Utf8PathBuf::from(
                non_blank(config.cache_dir).unwrap_or_else(|| "cache".to_string()),
            ),
            concurrency,
            retry_attempts,
            retry_delay: config
                .retry
                .delay_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DELAY),
            relational_path: Utf8PathBuf::from(
                non_blank(config.relational.path)
                    .unwrap_or_else(|| "ncbi_virus.sqlite".to_string()),
            ),
            relational_table,
            search_url: non_blank(config.search.url)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "http://elasticsearch:9200".to_string()),
            search_index,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(ch) if ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
