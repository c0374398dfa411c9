#![forbid(unsafe_code)]

use std::fs::File;

use adreport_contracts::alloc::{AllocationTotals, BidModel};
use adreport_contracts::app::PlatformFilter;
use adreport_engines::alloc::AllocationRuntime;
use adreport_engines::weight::WeightModel;
use adreport_os::catalog::{fetch_catalog, AppCatalog, CatalogFetchConfig};
use adreport_os::enrich::{parse_whitelist_csv, parse_whitelist_text, SourceEntry};
use adreport_os::report::{
    write_report_csv, DeliveryReport, ReportOutcome, ReportWiring, ReportWiringConfig,
};
use adreport_os::selection::{
    parse_blacklist, AllocationSetBuilder, CategoryShare, SelectionFilters, SelectionMode,
};
use rand::RngCore;
use serde::Deserialize;

pub const USAGE: &str = "usage: adreport generate --catalog <path|url> --config <json> [--seed <u64>] [--format json|csv]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "json" => Some(OutputFormat::Json),
            "csv" => Some(OutputFormat::Csv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateArgs {
    pub catalog: String,
    pub config_path: String,
    pub seed: Option<u64>,
    pub format: OutputFormat,
}

/// Flags after the `generate` subcommand.
pub fn parse_generate_args(args: &[String]) -> Result<GenerateArgs, String> {
    let mut catalog = None;
    let mut config_path = None;
    let mut seed = None;
    let mut format = OutputFormat::default();

    let mut it = args.iter();
    while let Some(flag) = it.next() {
        let value = it
            .next()
            .ok_or_else(|| format!("missing value for {flag}\n{USAGE}"))?;
        match flag.as_str() {
            "--catalog" => catalog = Some(value.clone()),
            "--config" => config_path = Some(value.clone()),
            "--seed" => {
                seed = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("--seed must be an unsigned integer, got '{value}'"))?,
                )
            }
            "--format" => {
                format = OutputFormat::parse(value)
                    .ok_or_else(|| format!("--format must be json or csv, got '{value}'"))?
            }
            _ => return Err(format!("unknown flag {flag}\n{USAGE}")),
        }
    }

    Ok(GenerateArgs {
        catalog: catalog.ok_or_else(|| format!("missing --catalog\n{USAGE}"))?,
        config_path: config_path.ok_or_else(|| format!("missing --config\n{USAGE}"))?,
        seed,
        format,
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunSelection {
    Global {
        categories: Vec<CategoryShare>,
    },
    Whitelist {
        /// Pasted text, one entry per line.
        #[serde(default)]
        lines: String,
        #[serde(default)]
        entries: Vec<SourceEntry>,
        /// Uploaded CSV sheet; when set it replaces `lines` and `entries`.
        #[serde(default)]
        upload: Option<String>,
    },
}

impl RunSelection {
    fn to_mode(&self) -> Result<SelectionMode, String> {
        match self {
            RunSelection::Global { categories } => Ok(SelectionMode::Global {
                shares: categories.clone(),
            }),
            RunSelection::Whitelist {
                upload: Some(path), ..
            } => {
                let file = File::open(path)
                    .map_err(|e| format!("cannot open whitelist upload {path}: {e}"))?;
                let sources = parse_whitelist_csv(file).map_err(|e| e.to_string())?;
                tracing::info!(entries = sources.len(), "whitelist upload loaded");
                Ok(SelectionMode::Whitelist { sources })
            }
            RunSelection::Whitelist { lines, entries, .. } => {
                let mut sources = parse_whitelist_text(lines);
                sources.extend(entries.iter().cloned());
                Ok(SelectionMode::Whitelist { sources })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub impressions: u64,
    #[serde(default)]
    pub clicks: u64,
    #[serde(default)]
    pub views: u64,
    /// Zero or absent means "use the organic cost".
    #[serde(default)]
    pub budget: f64,
    pub base_rate: f64,
    pub bid_model: BidModel,
    pub selection: RunSelection,
    #[serde(default)]
    pub platform: PlatformFilter,
    #[serde(default)]
    pub minus_categories: Vec<String>,
    #[serde(default)]
    pub blacklist: String,
}

impl RunConfig {
    pub fn from_json(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("invalid run config: {e}"))
    }

    fn filters(&self) -> SelectionFilters {
        SelectionFilters {
            platform: self.platform,
            minus_categories: self
                .minus_categories
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            blacklist_bundles: parse_blacklist(&self.blacklist),
        }
    }
}

/// Local file path, or an http(s) URL fetched with env-tunable timeouts.
pub fn load_catalog(source: &str) -> Result<AppCatalog, String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        return fetch_catalog(source, &CatalogFetchConfig::from_env()).map_err(|e| e.to_string());
    }
    let file = File::open(source).map_err(|e| format!("cannot open catalog {source}: {e}"))?;
    AppCatalog::from_csv_reader(file).map_err(|e| e.to_string())
}

pub fn generate_report(
    catalog: &AppCatalog,
    config: &RunConfig,
    rng: &mut dyn RngCore,
) -> Result<DeliveryReport, String> {
    let totals = AllocationTotals::v1(
        config.impressions,
        config.clicks,
        config.views,
        config.budget,
        config.base_rate,
        config.bid_model,
    )
    .map_err(|e| format!("invalid totals: {e}"))?;

    let entities = AllocationSetBuilder::new(catalog, WeightModel::default())
        .build(&config.selection.to_mode()?, &config.filters())
        .map_err(|e| e.to_string())?;

    let wiring = ReportWiring::new(ReportWiringConfig::mvp_v1(), AllocationRuntime::default())
        .map_err(|e| e.to_string())?;
    match wiring
        .run_report(totals, entities, rng)
        .map_err(|e| format!("allocation failed: {e}"))?
    {
        ReportOutcome::Delivered(report) => Ok(report),
        ReportOutcome::Refused(r) => Err(format!(
            "report refused (reason 0x{:08X}): {}",
            r.reason_code.0, r.message
        )),
    }
}

pub fn render_report(report: &DeliveryReport, format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report).map_err(|e| e.to_string()),
        OutputFormat::Csv => {
            let mut buf = Vec::new();
            write_report_csv(report, &mut buf).map_err(|e| e.to_string())?;
            String::from_utf8(buf).map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SHEET: &str = "\
name,bundle,os,link,icon,category,auctions,tier,priority
Alpha,com.alpha,Android,https://alpha.example,,Games,20000,Tier 1,1
Beta,com.beta,iOS,https://beta.example,,Games,5000,Tier 2,1
Gamma,com.gamma,Android,https://gamma.example,,News,8000,Tier 3,2
";

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn at_report_cli_01_parses_flags() {
        let got = parse_generate_args(&args(&[
            "--catalog",
            "apps.csv",
            "--config",
            "run.json",
            "--seed",
            "42",
            "--format",
            "csv",
        ]))
        .unwrap();
        assert_eq!(got.catalog, "apps.csv");
        assert_eq!(got.seed, Some(42));
        assert_eq!(got.format, OutputFormat::Csv);

        assert!(parse_generate_args(&args(&["--catalog", "a.csv"])).is_err());
        assert!(parse_generate_args(&args(&["--catalog"])).is_err());
        assert!(parse_generate_args(&args(&[
            "--catalog", "a", "--config", "b", "--seed", "-1"
        ]))
        .is_err());
    }

    #[test]
    fn at_report_cli_02_global_run_is_reproducible_with_seed() {
        let catalog = AppCatalog::from_csv_str(SHEET).unwrap();
        let config = RunConfig::from_json(
            r#"{
                "impressions": 500000,
                "clicks": 4000,
                "views": 150000,
                "budget": 1500.5,
                "base_rate": 90.0,
                "bid_model": "CPM",
                "selection": {
                    "mode": "global",
                    "categories": [
                        {"category": "Games", "percent": 70},
                        {"category": "News", "percent": 30}
                    ]
                }
            }"#,
        )
        .unwrap();
        let a = generate_report(&catalog, &config, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = generate_report(&catalog, &config, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.rows.len(), 3);
        assert_eq!(a.totals.impressions, 500_000);
        assert_eq!(a.totals.clicks, 4_000);
        assert_eq!(a.totals.budget.to_string(), "1500.50");
        let json = render_report(&a, OutputFormat::Json).unwrap();
        assert!(json.contains("\"bid_model\": \"CPM\""));
    }

    #[test]
    fn at_report_cli_03_whitelist_with_filters() {
        let catalog = AppCatalog::from_csv_str(SHEET).unwrap();
        let config = RunConfig::from_json(
            r#"{
                "impressions": 10000,
                "clicks": 100,
                "base_rate": 0.4,
                "bid_model": "CPC",
                "platform": "android",
                "blacklist": "com.gamma",
                "selection": {
                    "mode": "whitelist",
                    "lines": "Alpha\nBeta,https://beta.example\nGamma\nNew Thing,https://play.google.com/store/apps/details?id=new.thing"
                }
            }"#,
        )
        .unwrap();
        let report = generate_report(&catalog, &config, &mut StdRng::seed_from_u64(1)).unwrap();
        let bundles: Vec<&str> = report.rows.iter().map(|r| r.bundle.as_str()).collect();
        assert_eq!(bundles.len(), 2);
        assert!(bundles.contains(&"com.alpha"));
        assert!(bundles.contains(&"unknown.3"));
        let csv = render_report(&report, OutputFormat::Csv).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn at_report_cli_04_empty_selection_and_bad_totals_fail() {
        let catalog = AppCatalog::from_csv_str(SHEET).unwrap();
        let mut config = RunConfig::from_json(
            r#"{
                "impressions": 1000,
                "base_rate": 1.0,
                "bid_model": "CPV",
                "minus_categories": ["Games", "News"],
                "selection": {"mode": "global", "categories": [{"category": "Games", "percent": 100}]}
            }"#,
        )
        .unwrap();
        let err = generate_report(&catalog, &config, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(err.contains("no data for report"));

        config.minus_categories.clear();
        config.impressions = 0;
        let err = generate_report(&catalog, &config, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(err.starts_with("invalid totals"));
    }

    #[test]
    fn at_report_cli_05_unknown_config_keys_are_rejected() {
        let err = RunConfig::from_json(
            r#"{"impressions": 1, "base_rate": 1, "bid_model": "CPM", "selection": {"mode": "global", "categories": []}, "budjet": 5}"#,
        )
        .unwrap_err();
        assert!(err.starts_with("invalid run config"));
    }

    #[test]
    fn at_report_cli_06_whitelist_upload_replaces_pasted_lines() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(1);
        let base = std::env::temp_dir().join(format!("adreport-cli-test-{suffix}"));
        fs::create_dir_all(&base).unwrap();
        let upload = base.join("whitelist.csv");
        fs::write(&upload, "App,Link\nGamma,https://gamma.example\n,\nAlpha\n").unwrap();

        let catalog = AppCatalog::from_csv_str(SHEET).unwrap();
        let mut config = RunConfig::from_json(
            r#"{
                "impressions": 20000,
                "clicks": 200,
                "base_rate": 50.0,
                "bid_model": "CPM",
                "minus_categories": ["Games"],
                "selection": {"mode": "whitelist", "lines": "Beta"}
            }"#,
        )
        .unwrap();
        if let RunSelection::Whitelist { upload: u, .. } = &mut config.selection {
            *u = Some(upload.to_string_lossy().into_owned());
        }
        let report = generate_report(&catalog, &config, &mut StdRng::seed_from_u64(3)).unwrap();
        let mut bundles: Vec<&str> = report.rows.iter().map(|r| r.bundle.as_str()).collect();
        bundles.sort_unstable();
        assert_eq!(bundles, vec!["com.alpha", "com.gamma"]);

        if let RunSelection::Whitelist { upload: u, .. } = &mut config.selection {
            *u = Some(base.join("missing.csv").to_string_lossy().into_owned());
        }
        let err = generate_report(&catalog, &config, &mut StdRng::seed_from_u64(3)).unwrap_err();
        assert!(err.starts_with("cannot open whitelist upload"));

        let _ = fs::remove_dir_all(base);
    }
}
