#![forbid(unsafe_code)]

use std::io::Read;

use adreport_contracts::app::{AppRecord, Platform};
use adreport_contracts::ContractViolation;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::catalog::{AppCatalog, CatalogError};

/// One line of a user-supplied whitelist: a name, a store link, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub link: String,
}

impl SourceEntry {
    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty() && self.link.trim().is_empty()
    }
}

/// Match key for app names: NFKC, lower-case, then only Latin letters,
/// Cyrillic letters and digits survive.
pub fn normalize_name(raw: &str) -> String {
    raw.nfkc()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || ('а'..='я').contains(c))
        .collect()
}

/// Match key for store links: lower-case, without the http(s) scheme, a
/// leading `www.` or one trailing slash. Path, query and fragment are kept verbatim.
pub fn normalize_link(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let bare = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let bare = bare.strip_prefix("www.").unwrap_or(bare);
    let bare = bare.strip_suffix('/').unwrap_or(bare);
    bare.trim().to_string()
}

/// Pasted whitelist text. Each non-empty line is `name,link`, a bare
/// `http…` link, or a bare name.
pub fn parse_whitelist_text(text: &str) -> Vec<SourceEntry> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            if let Some((name, link)) = line.split_once(',') {
                SourceEntry {
                    name: name.trim().to_string(),
                    link: link.trim().to_string(),
                }
            } else if line.starts_with("http") {
                SourceEntry {
                    name: String::new(),
                    link: line.to_string(),
                }
            } else {
                SourceEntry {
                    name: line.to_string(),
                    link: String::new(),
                }
            }
        })
        .collect()
}

/// Uploaded sheet with a header row, name in the first column and link in the second.
pub fn parse_whitelist_csv<R: Read>(reader: R) -> Result<Vec<SourceEntry>, CatalogError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| CatalogError::Read(e.to_string()))?;
        let entry = SourceEntry {
            name: record.get(0).unwrap_or("").to_string(),
            link: record.get(1).unwrap_or("").to_string(),
        };
        if !entry.is_blank() {
            out.push(entry);
        }
    }
    Ok(out)
}

/// Resolves an uploaded entry against the catalog, link first and then name.
/// Entries with no match get placeholder identity and boundary defaults.
pub fn enrich_entry(
    src: &SourceEntry,
    idx: usize,
    catalog: &AppCatalog,
) -> Result<AppRecord, ContractViolation> {
    let name = src.name.trim();
    let link = src.link.trim();
    let norm_link = normalize_link(link);

    let hit = catalog
        .find_by_link(&norm_link)
        .or_else(|| catalog.find_by_name(&normalize_name(name)));

    if let Some(entry) = hit {
        let mut app = entry.app.clone();
        if !name.is_empty() {
            app.display_name = name.to_string();
        }
        return Ok(app);
    }

    let display = if name.is_empty() {
        format!("App {}", idx + 1)
    } else {
        name.to_string()
    };
    let platform = if norm_link.contains("apple.com") {
        Platform::Ios
    } else {
        Platform::Android
    };
    let link = if link.is_empty() { "#" } else { link };
    AppRecord::unmatched(display, format!("unknown.{idx}"), platform, link.to_string())
}
