#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;

use adreport_contracts::alloc::AllocationEntity;
use adreport_contracts::app::{AppRecord, PlatformFilter};
use adreport_contracts::ContractViolation;
use adreport_engines::weight::WeightModel;
use serde::{Deserialize, Serialize};

use crate::catalog::AppCatalog;
use crate::enrich::{enrich_entry, SourceEntry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub category: String,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionMode {
    /// Every catalog app in each listed category, the category's share split by weight.
    Global { shares: Vec<CategoryShare> },
    /// Only the supplied entries, each matched against the catalog.
    Whitelist { sources: Vec<SourceEntry> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionFilters {
    pub platform: PlatformFilter,
    pub minus_categories: BTreeSet<String>,
    pub blacklist_bundles: BTreeSet<String>,
}

impl SelectionFilters {
    /// Platform and blacklist; both modes apply these.
    pub fn admits(&self, app: &AppRecord) -> bool {
        self.platform.admits(app.platform) && !self.blacklist_bundles.contains(&app.bundle)
    }

    /// Minus-categories only narrow the global mode.
    fn admits_global(&self, app: &AppRecord) -> bool {
        self.admits(app) && !self.minus_categories.contains(&app.category)
    }
}

/// Bundle ids separated by newlines or commas; blanks dropped.
pub fn parse_blacklist(text: &str) -> BTreeSet<String> {
    text.split(['\n', ','])
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionError {
    /// Nothing survived mode and filters.
    EmptyPool,
    Contract(ContractViolation),
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::EmptyPool => write!(f, "no data for report: selection is empty"),
            SelectionError::Contract(v) => write!(f, "selection produced invalid entity: {v}"),
        }
    }
}

impl std::error::Error for SelectionError {}

impl From<ContractViolation> for SelectionError {
    fn from(v: ContractViolation) -> Self {
        SelectionError::Contract(v)
    }
}

/// Turns a selection mode plus filters into the entity set handed to the engine.
#[derive(Debug, Clone)]
pub struct AllocationSetBuilder<'a> {
    catalog: &'a AppCatalog,
    weights: WeightModel,
}

impl<'a> AllocationSetBuilder<'a> {
    pub fn new(catalog: &'a AppCatalog, weights: WeightModel) -> Self {
        Self { catalog, weights }
    }

    pub fn build(
        &self,
        mode: &SelectionMode,
        filters: &SelectionFilters,
    ) -> Result<Vec<AllocationEntity>, SelectionError> {
        let entities = match mode {
            SelectionMode::Global { shares } => self.build_global(shares, filters)?,
            SelectionMode::Whitelist { sources } => self.build_whitelist(sources, filters)?,
        };
        if entities.is_empty() {
            return Err(SelectionError::EmptyPool);
        }
        tracing::debug!(entities = entities.len(), "allocation set built");
        Ok(entities)
    }

    fn build_global(
        &self,
        shares: &[CategoryShare],
        filters: &SelectionFilters,
    ) -> Result<Vec<AllocationEntity>, ContractViolation> {
        let mut out = Vec::new();
        for share in shares {
            let category = share.category.trim();
            if category.is_empty() || !share.percent.is_finite() || share.percent <= 0.0 {
                continue;
            }
            let members: Vec<(&AppRecord, f64)> = self
                .catalog
                .entries()
                .iter()
                .map(|e| &e.app)
                .filter(|app| app.category == category && filters.admits_global(app))
                .map(|app| (app, self.weights.weight_of(app)))
                .collect();
            let category_weight: f64 = members.iter().map(|(_, w)| w).sum();
            if members.is_empty() || category_weight <= 0.0 {
                tracing::debug!(category, "category has no admissible apps");
                continue;
            }
            for (app, w) in members {
                out.push(entity_for(app, w / category_weight * share.percent)?);
            }
        }
        Ok(out)
    }

    fn build_whitelist(
        &self,
        sources: &[SourceEntry],
        filters: &SelectionFilters,
    ) -> Result<Vec<AllocationEntity>, ContractViolation> {
        let mut out = Vec::new();
        for (idx, src) in sources.iter().enumerate() {
            if src.is_blank() {
                continue;
            }
            let app = enrich_entry(src, idx, self.catalog)?;
            if filters.admits(&app) {
                out.push(entity_for(&app, self.weights.weight_of(&app))?);
            }
        }
        Ok(out)
    }
}

fn entity_for(app: &AppRecord, base_weight: f64) -> Result<AllocationEntity, ContractViolation> {
    AllocationEntity::v1(
        app.display_name.clone(),
        app.bundle.clone(),
        app.platform,
        app.link.clone(),
        base_weight,
    )
}
