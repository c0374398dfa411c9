#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::io::Read;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use adreport_contracts::app::{
    AppRecord, Platform, CATALOG_DEFAULT_AUCTIONS, DEFAULT_PRIORITY, DEFAULT_TIER,
};
use url::Url;

use crate::enrich::{normalize_link, normalize_name};

const CATALOG_CONNECT_TIMEOUT_MS_DEFAULT: u64 = 5_000;
const CATALOG_READ_TIMEOUT_MS_DEFAULT: u64 = 20_000;

const COL_NAME: usize = 0;
const COL_BUNDLE: usize = 1;
const COL_OS: usize = 2;
const COL_LINK: usize = 3;
const COL_CATEGORY: usize = 5;
const COL_AUCTIONS: usize = 6;
const COL_TIER: usize = 7;
const COL_PRIORITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    Read(String),
    Fetch(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Read(msg) => write!(f, "catalog read failed: {msg}"),
            CatalogError::Fetch(msg) => write!(f, "catalog fetch failed: {msg}"),
        }
    }
}

impl std::error::Error for CatalogError {}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub app: AppRecord,
    pub norm_name: String,
    pub norm_link: String,
}

/// The app database. Built once from the published sheet and only read afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppCatalog {
    entries: Vec<CatalogEntry>,
}

impl AppCatalog {
    pub fn from_records(apps: Vec<AppRecord>) -> Self {
        let entries = apps
            .into_iter()
            .map(|app| CatalogEntry {
                norm_name: normalize_name(&app.name),
                norm_link: normalize_link(&app.link),
                app,
            })
            .collect();
        Self { entries }
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut apps = Vec::new();
        let mut skipped = 0usize;
        for record in rdr.records() {
            let record = record.map_err(|e| CatalogError::Read(e.to_string()))?;
            if record.iter().all(|f| f.is_empty()) {
                continue;
            }
            match parse_row(&record) {
                Some(app) => apps.push(app),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::debug!(skipped, "catalog rows without name or bundle were skipped");
        }
        tracing::info!(apps = apps.len(), "catalog loaded");
        Ok(Self::from_records(apps))
    }

    pub fn from_csv_str(text: &str) -> Result<Self, CatalogError> {
        Self::from_csv_reader(text.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Sorted, de-duplicated, non-empty category names.
    pub fn categories(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.app.category.as_str())
            .filter(|c| !c.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn find_by_link(&self, norm_link: &str) -> Option<&CatalogEntry> {
        if norm_link.is_empty() {
            return None;
        }
        self.entries.iter().find(|e| e.norm_link == norm_link)
    }

    pub fn find_by_name(&self, norm_name: &str) -> Option<&CatalogEntry> {
        if norm_name.is_empty() {
            return None;
        }
        self.entries.iter().find(|e| e.norm_name == norm_name)
    }
}

fn parse_row(record: &csv::StringRecord) -> Option<AppRecord> {
    let col = |i: usize| record.get(i).unwrap_or("");
    let name = col(COL_NAME);
    let bundle = col(COL_BUNDLE);
    if name.is_empty() || bundle.is_empty() {
        return None;
    }
    let tier = match col(COL_TIER) {
        "" => DEFAULT_TIER,
        t => t,
    };
    Some(AppRecord {
        name: name.to_string(),
        display_name: name.to_string(),
        bundle: bundle.to_string(),
        platform: Platform::from_os_label(col(COL_OS)),
        link: col(COL_LINK).to_string(),
        category: col(COL_CATEGORY).to_string(),
        auctions: parse_number_or(col(COL_AUCTIONS), CATALOG_DEFAULT_AUCTIONS),
        priority: parse_number_or(col(COL_PRIORITY), DEFAULT_PRIORITY),
        tier: tier.to_string(),
    })
}

/// Reads the leading number of a cell the way spreadsheet exports are usually
/// consumed: `"12abc"` is 12, `"12,5"` is 12 and signs are kept. Empty, zero,
/// non-numeric and non-finite cells fall back to `default`.
fn parse_number_or(raw: &str, default: f64) -> f64 {
    leading_number(raw)
        .filter(|v| v.is_finite() && *v != 0.0)
        .unwrap_or(default)
}

fn leading_number(raw: &str) -> Option<f64> {
    let text = raw.trim_start();
    text.char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .rev()
        .find_map(|end| text[..end].parse::<f64>().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogFetchConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl CatalogFetchConfig {
    pub fn mvp_v1() -> Self {
        Self {
            connect_timeout_ms: CATALOG_CONNECT_TIMEOUT_MS_DEFAULT,
            read_timeout_ms: CATALOG_READ_TIMEOUT_MS_DEFAULT,
        }
    }

    pub fn from_env() -> Self {
        Self {
            connect_timeout_ms: timeout_ms_from_env(
                "ADREPORT_CATALOG_CONNECT_TIMEOUT_MS",
                CATALOG_CONNECT_TIMEOUT_MS_DEFAULT,
            ),
            read_timeout_ms: timeout_ms_from_env(
                "ADREPORT_CATALOG_READ_TIMEOUT_MS",
                CATALOG_READ_TIMEOUT_MS_DEFAULT,
            ),
        }
    }
}

fn timeout_ms_from_env(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| (100..=120_000).contains(v))
        .unwrap_or(default)
}

/// Appends `t=<unix millis>` so intermediate caches never serve a stale sheet.
pub fn cache_busted_url(raw: &str, now_ms: u128) -> Result<Url, CatalogError> {
    let mut url = Url::parse(raw).map_err(|e| CatalogError::Fetch(format!("bad url: {e}")))?;
    url.query_pairs_mut().append_pair("t", &now_ms.to_string());
    Ok(url)
}

pub fn fetch_catalog(url: &str, config: &CatalogFetchConfig) -> Result<AppCatalog, CatalogError> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let url = cache_busted_url(url, now_ms)?;
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
        .timeout_read(Duration::from_millis(config.read_timeout_ms))
        .build();
    match agent.get(url.as_str()).call() {
        Ok(resp) => AppCatalog::from_csv_reader(resp.into_reader()),
        Err(ureq::Error::Status(code, _)) => Err(CatalogError::Fetch(format!(
            "catalog fetch failed with http status {code}"
        ))),
        Err(ureq::Error::Transport(err)) => Err(CatalogError::Fetch(format!(
            "catalog transport error: {err}"
        ))),
    }
}
