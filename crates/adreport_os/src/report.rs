#![forbid(unsafe_code)]

use std::io::Write;

use adreport_contracts::alloc::{
    percent_text, AllocationEntity, AllocationOk, AllocationRefuse, AllocationRequest,
    AllocationResponse, AllocationRow, AllocationTotals, BidModel, BudgetSource,
    MAX_ALLOCATION_ENTITIES,
};
use adreport_contracts::app::Platform;
use adreport_contracts::{ContractViolation, ReasonCodeId, Validate};
use adreport_engines::alloc::AllocationRuntime;
use rand::RngCore;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

pub mod reason_codes {
    use adreport_contracts::ReasonCodeId;

    // Report wiring reason-code namespace ("RP").
    pub const REPORT_EMPTY_SELECTION: ReasonCodeId = ReasonCodeId(0x5250_0101);
    pub const REPORT_POOL_TOO_LARGE: ReasonCodeId = ReasonCodeId(0x5250_0102);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWiringConfig {
    pub max_entities: usize,
}

impl ReportWiringConfig {
    pub fn mvp_v1() -> Self {
        Self {
            max_entities: MAX_ALLOCATION_ENTITIES,
        }
    }
}

pub trait AllocationEngine {
    fn run(&self, req: &AllocationRequest, rng: &mut dyn RngCore) -> AllocationResponse;
}

impl AllocationEngine for AllocationRuntime {
    fn run(&self, req: &AllocationRequest, rng: &mut dyn RngCore) -> AllocationResponse {
        AllocationRuntime::run(self, req, rng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub name: String,
    pub bundle: String,
    pub platform: Platform,
    pub link: String,
    pub impressions: u64,
    pub clicks: u64,
    pub ctr_pct: String,
    pub views: u64,
    pub vtr_pct: String,
    pub rate: Decimal,
    pub budget: Decimal,
}

impl ReportRow {
    fn from_allocation(row: &AllocationRow) -> Self {
        Self {
            name: row.name.clone(),
            bundle: row.bundle.clone(),
            platform: row.platform,
            link: row.link.clone(),
            impressions: row.impressions,
            clicks: row.clicks,
            ctr_pct: row.ctr_pct.clone(),
            views: row.views,
            vtr_pct: row.vtr_pct.clone(),
            rate: Decimal::from_f64(row.current_rate)
                .unwrap_or_default()
                .round_dp(2),
            budget: Decimal::new(row.row_budget_minor, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTotals {
    pub impressions: u64,
    pub clicks: u64,
    pub views: u64,
    /// Blended over all rows, not an average of row CTRs.
    pub ctr_pct: String,
    pub budget: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub reason_code: ReasonCodeId,
    pub bid_model: BidModel,
    pub budget_source: BudgetSource,
    pub rows: Vec<ReportRow>,
    pub totals: ReportTotals,
    pub clicks_residual: i64,
    pub views_residual: i64,
}

impl DeliveryReport {
    /// Rows ordered by impressions, largest first. Ties keep allocation order.
    pub fn assemble(ok: &AllocationOk, bid_model: BidModel) -> Self {
        let mut rows: Vec<ReportRow> = ok.rows.iter().map(ReportRow::from_allocation).collect();
        rows.sort_by(|a, b| b.impressions.cmp(&a.impressions));

        let impressions: u64 = rows.iter().map(|r| r.impressions).sum();
        let clicks: u64 = rows.iter().map(|r| r.clicks).sum();
        let views: u64 = rows.iter().map(|r| r.views).sum();
        let budget: Decimal = rows.iter().map(|r| r.budget).sum();

        Self {
            reason_code: ok.reason_code,
            bid_model,
            budget_source: ok.budget_source,
            totals: ReportTotals {
                impressions,
                clicks,
                views,
                ctr_pct: percent_text(clicks, impressions),
                budget: budget.round_dp(2),
            },
            rows,
            clicks_residual: ok.clicks_residual,
            views_residual: ok.views_residual,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Refused(AllocationRefuse),
    Delivered(DeliveryReport),
}

#[derive(Debug, Clone)]
pub struct ReportWiring<E>
where
    E: AllocationEngine,
{
    config: ReportWiringConfig,
    engine: E,
}

impl<E> ReportWiring<E>
where
    E: AllocationEngine,
{
    pub fn new(config: ReportWiringConfig, engine: E) -> Result<Self, ContractViolation> {
        if config.max_entities == 0 || config.max_entities > MAX_ALLOCATION_ENTITIES {
            return Err(ContractViolation::InvalidValue {
                field: "report_wiring_config.max_entities",
                reason: "must be within 1..=MAX_ALLOCATION_ENTITIES",
            });
        }
        Ok(Self { config, engine })
    }

    pub fn run_report(
        &self,
        totals: AllocationTotals,
        entities: Vec<AllocationEntity>,
        rng: &mut dyn RngCore,
    ) -> Result<ReportOutcome, ContractViolation> {
        totals.validate()?;

        if entities.is_empty() {
            return Ok(ReportOutcome::Refused(AllocationRefuse::v1(
                reason_codes::REPORT_EMPTY_SELECTION,
                "no data for report".to_string(),
            )?));
        }
        if entities.len() > self.config.max_entities {
            return Ok(ReportOutcome::Refused(AllocationRefuse::v1(
                reason_codes::REPORT_POOL_TOO_LARGE,
                "selection exceeds report entity limit".to_string(),
            )?));
        }

        let bid_model = totals.bid_model;
        let req = AllocationRequest::v1(totals, entities)?;
        let resp = self.engine.run(&req, rng);
        resp.validate()?;

        let ok = match resp {
            AllocationResponse::Refuse(r) => return Ok(ReportOutcome::Refused(r)),
            AllocationResponse::Ok(ok) => ok,
        };
        if ok.total_impressions != req.totals.impressions {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_ok.total_impressions",
                reason: "must equal requested impressions",
            });
        }
        if !ok.is_exact() {
            tracing::warn!(
                clicks_residual = ok.clicks_residual,
                views_residual = ok.views_residual,
                "report delivered with unplaced click or view units"
            );
        }
        Ok(ReportOutcome::Delivered(DeliveryReport::assemble(
            &ok, bid_model,
        )))
    }
}

/// Spreadsheet export: rates as fractions with four decimals, money with two.
pub fn write_report_csv<W: Write>(report: &DeliveryReport, writer: W) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "App",
        "Link",
        "Impressions",
        "Clicks",
        "CTR",
        "Views",
        "VTR",
        "Rate",
        "Budget",
    ])?;
    for row in &report.rows {
        wtr.write_record([
            row.name.clone(),
            row.link.clone(),
            row.impressions.to_string(),
            row.clicks.to_string(),
            fraction_text(row.clicks, row.impressions),
            row.views.to_string(),
            fraction_text(row.views, row.impressions),
            format!("{:.2}", row.rate),
            format!("{:.2}", row.budget),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn fraction_text(part: u64, whole: u64) -> String {
    if whole == 0 {
        return "0.0000".to_string();
    }
    format!("{:.4}", part as f64 / whole as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn totals(budget: f64) -> AllocationTotals {
        AllocationTotals::v1(100_000, 1_500, 40_000, budget, 120.0, BidModel::PerMille).unwrap()
    }

    fn entity(name: &str, weight: f64) -> AllocationEntity {
        AllocationEntity::v1(
            name.to_string(),
            format!("com.example.{}", name.to_lowercase()),
            Platform::Android,
            format!("https://example.com/{name}"),
            weight,
        )
        .unwrap()
    }

    fn wiring() -> ReportWiring<AllocationRuntime> {
        ReportWiring::new(ReportWiringConfig::mvp_v1(), AllocationRuntime::default()).unwrap()
    }

    fn expect_report(out: ReportOutcome) -> DeliveryReport {
        match out {
            ReportOutcome::Delivered(r) => r,
            ReportOutcome::Refused(r) => panic!("expected Delivered, got {}", r.message),
        }
    }

    struct RefusingEngine;

    impl AllocationEngine for RefusingEngine {
        fn run(&self, _req: &AllocationRequest, _rng: &mut dyn RngCore) -> AllocationResponse {
            AllocationResponse::Refuse(
                AllocationRefuse::v1(ReasonCodeId(0x414C_00F3), "weights collapsed".to_string())
                    .unwrap(),
            )
        }
    }

    #[test]
    fn at_report_01_rows_sorted_by_impressions_and_totals_match() {
        let mut rng = StdRng::seed_from_u64(11);
        let entities = vec![entity("Small", 1.0), entity("Big", 20.0), entity("Mid", 5.0)];
        let report = expect_report(wiring().run_report(totals(2_500.0), entities, &mut rng).unwrap());
        assert_eq!(report.rows[0].name, "Big");
        assert_eq!(report.rows[2].name, "Small");
        assert!(report
            .rows
            .windows(2)
            .all(|w| w[0].impressions >= w[1].impressions));
        assert_eq!(report.totals.impressions, 100_000);
        assert_eq!(report.totals.clicks, 1_500);
        assert_eq!(report.totals.views, 40_000);
        assert_eq!(report.totals.ctr_pct, "1.50");
        assert_eq!(report.totals.budget, Decimal::new(250_000, 2));
        assert_eq!(report.budget_source, BudgetSource::Requested);
    }

    #[test]
    fn at_report_02_empty_selection_is_refused_without_engine_call() {
        let mut rng = StdRng::seed_from_u64(0);
        let w = ReportWiring::new(ReportWiringConfig::mvp_v1(), RefusingEngine).unwrap();
        match w.run_report(totals(1.0), vec![], &mut rng).unwrap() {
            ReportOutcome::Refused(r) => {
                assert_eq!(r.reason_code, reason_codes::REPORT_EMPTY_SELECTION)
            }
            _ => panic!("expected Refused"),
        }
    }

    #[test]
    fn at_report_03_engine_refuse_is_forwarded() {
        let mut rng = StdRng::seed_from_u64(0);
        let w = ReportWiring::new(ReportWiringConfig::mvp_v1(), RefusingEngine).unwrap();
        match w
            .run_report(totals(1.0), vec![entity("A", 1.0)], &mut rng)
            .unwrap()
        {
            ReportOutcome::Refused(r) => assert_eq!(r.message, "weights collapsed"),
            _ => panic!("expected Refused"),
        }
    }

    #[test]
    fn at_report_04_pool_limit_and_config_are_enforced() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(ReportWiring::new(
            ReportWiringConfig { max_entities: 0 },
            AllocationRuntime::default()
        )
        .is_err());
        let w = ReportWiring::new(
            ReportWiringConfig { max_entities: 2 },
            AllocationRuntime::default(),
        )
        .unwrap();
        let entities = vec![entity("A", 1.0), entity("B", 1.0), entity("C", 1.0)];
        match w.run_report(totals(1.0), entities, &mut rng).unwrap() {
            ReportOutcome::Refused(r) => {
                assert_eq!(r.reason_code, reason_codes::REPORT_POOL_TOO_LARGE)
            }
            _ => panic!("expected Refused"),
        }
    }

    #[test]
    fn at_report_05_csv_export_uses_fractions_and_two_decimal_money() {
        let mut rng = StdRng::seed_from_u64(3);
        let report = expect_report(
            wiring()
                .run_report(totals(1_000.0), vec![entity("Solo", 1.0)], &mut rng)
                .unwrap(),
        );
        let mut buf = Vec::new();
        write_report_csv(&report, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "App,Link,Impressions,Clicks,CTR,Views,VTR,Rate,Budget"
        );
        assert_eq!(
            lines.next().unwrap(),
            "Solo,https://example.com/Solo,100000,1500,0.0150,40000,0.4000,10.00,1000.00"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn at_report_06_fraction_text_handles_zero_denominator() {
        assert_eq!(fraction_text(0, 0), "0.0000");
        assert_eq!(fraction_text(1, 3), "0.3333");
    }
}
