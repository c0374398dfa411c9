#![forbid(unsafe_code)]

use std::env;
use std::fs;
use std::io;

use adreport_tools::report_cli::{
    generate_report, load_catalog, parse_generate_args, render_report, RunConfig, USAGE,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.first().map(String::as_str) != Some("generate") {
        return Err(USAGE.to_string());
    }
    let parsed = parse_generate_args(&args[1..])?;

    let config_text = fs::read_to_string(&parsed.config_path)
        .map_err(|e| format!("cannot read config {}: {e}", parsed.config_path))?;
    let config = RunConfig::from_json(&config_text)?;
    let catalog = load_catalog(&parsed.catalog)?;

    let mut rng = match parsed.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let report = generate_report(&catalog, &config, &mut rng)?;
    tracing::info!(
        rows = report.rows.len(),
        impressions = report.totals.impressions,
        budget = %report.totals.budget,
        "report generated"
    );
    print!("{}", render_report(&report, parsed.format)?);
    Ok(())
}
