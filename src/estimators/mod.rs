//! Estimator family
//!
//! Every estimator is a configuration of one pipeline:
//!
//! ```text
//! load -> filter -> responses -> stage 1 -> stage 2 -> variance -> format
//! ```
//!
//! An estimator only declares its evaluation type, its metrics, the columns it
//! needs and how to turn filtered records into response rows (plus, for
//! ratio-type estimates, its denominator). `run_estimate` does the rest.
//! Failure at any stage aborts the estimate; nothing partial is returned.

pub mod area;
pub mod biomass;
pub mod carbon;
pub mod context;
pub mod grm;
pub mod grouping;
pub mod growth;
pub mod mortality;
pub mod output;
pub mod removals;
pub mod site_index;
pub mod tpa;
pub mod volume;

use std::fmt;
use std::time::Instant;

use crate::aggregation::{condition_sums, expand, ConditionRow, DenominatorScope, EstimationPlan, ResponseRow};
use crate::config::EstimatorConfig;
use crate::data::{tables, TableSource};
use crate::domain::DomainFilter;
use crate::error::{FiaError, Result};
use crate::evaluation::{EvalId, EvalType};
use crate::stratification::StratificationCache;
use crate::variance::all_group_covariances;

pub use area::AreaEstimator;
pub use biomass::{BiomassComponent, BiomassEstimator};
pub use carbon::{CarbonEstimator, CarbonFluxEstimator, CarbonPool};
pub use context::{ConditionRecord, ConditionSet, EstimationContext, TreeSet};
pub use grm::{GrmComponent, GrmMeasure};
pub use grouping::{GroupPlan, LAND_TYPE, SIZE_CLASS};
pub use growth::{GrowthBasis, GrowthEstimator};
pub use mortality::{MortalityEstimator, MortalityMethod};
pub use output::{Estimate, FormatOptions, MetricSpec};
pub use removals::RemovalsEstimator;
pub use site_index::SiteIndexEstimator;
pub use tpa::TpaEstimator;
pub use volume::{VolumeEstimator, VolumeType};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Filter,
    Responses,
    Stage1,
    Stage2,
    Variance,
    Format,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Load => "load",
            Stage::Filter => "filter",
            Stage::Responses => "responses",
            Stage::Stage1 => "stage 1",
            Stage::Stage2 => "stage 2",
            Stage::Variance => "variance",
            Stage::Format => "format",
        };
        write!(f, "{}", s)
    }
}

/// A configuration of the shared estimation pipeline
pub trait Estimator: Sync {
    /// Name used in logs and `MissingColumn` errors
    fn name(&self) -> &'static str;

    /// Evaluation type the estimator is designed for
    fn eval_type(&self) -> EvalType;

    /// Number of response variables per record
    fn n_vars(&self) -> usize;

    /// Reported metrics over the response variables
    fn metrics(&self) -> Vec<MetricSpec>;

    /// Reject configurations the estimator cannot honour
    fn validate(&self, _config: &EstimatorConfig) -> Result<()> {
        Ok(())
    }

    /// Whether tree-level grouping columns (SPCD, SIZE_CLASS ...) are allowed
    fn allows_tree_groups(&self) -> bool {
        true
    }

    /// Whether TREE takes part (tree domain, tree grouping columns)
    fn uses_tree_table(&self, _config: &EstimatorConfig) -> bool {
        true
    }

    /// COND columns the estimator reads beyond the standard set
    fn condition_columns(&self, _config: &EstimatorConfig) -> Vec<String> {
        Vec::new()
    }

    /// Grouping columns appended to every request
    fn forced_groups(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether AREA_TOTAL is reported with totals
    fn reports_area_total(&self) -> bool {
        true
    }

    /// Numerator records
    fn responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>>;

    /// Denominator conditions: by default, the land/area domain split by
    /// condition-level groups
    fn denominator(&self, ctx: &EstimationContext<'_>) -> Result<(Vec<ConditionRow>, DenominatorScope)> {
        Ok((ctx.conditions.domain_rows(), DenominatorScope::ByConditionGroups))
    }
}

fn case_insensitive_contains(schema: &[String], name: &str) -> bool {
    schema.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// Run `estimator` over the plots of `evalids`
pub fn run_estimate(
    source: &dyn TableSource,
    cache: &mut StratificationCache,
    evalids: &[EvalId],
    estimator: &dyn Estimator,
    config: &EstimatorConfig,
) -> Result<Estimate> {
    let started = Instant::now();
    let name = estimator.name();
    if evalids.is_empty() {
        return Err(FiaError::NoEvaluationSelected);
    }
    estimator.validate(config)?;

    // ===================================================================
    // STEP 1: schemas, groups and domains
    // ===================================================================
    let column_names = |table: &str| -> Result<Vec<String>> {
        source.columns(table).map_err(|_| FiaError::MissingTable {
            estimator: name.to_string(),
            table: table.to_string(),
        })
    };
    let cond_schema = column_names(tables::COND)?;
    let plot_schema: Vec<String> = column_names(tables::PLOT)?
        .into_iter()
        .filter(|c| c != "CN")
        .collect();
    let tree_schema = if estimator.uses_tree_table(config) {
        Some(column_names(tables::TREE)?)
    } else {
        None
    };

    let mut requested = config.group_columns();
    for forced in estimator.forced_groups() {
        if !requested.iter().any(|c| c.eq_ignore_ascii_case(&forced)) {
            requested.push(forced);
        }
    }
    let groups = GroupPlan::resolve(&requested, &cond_schema, &plot_schema, tree_schema.as_deref())?;
    if groups.has_tree_groups() && !estimator.allows_tree_groups() {
        return Err(FiaError::InvalidConfig(format!(
            "{} estimates cannot be grouped by tree-level column(s) {:?}",
            name, groups.tree_columns
        )));
    }

    let mut area_columns = cond_schema.clone();
    area_columns.extend(plot_schema.iter().cloned());
    let area_domain = DomainFilter::parse_optional(config.area_domain.as_deref(), &area_columns)?;
    let tree_domain = match &tree_schema {
        Some(schema) => DomainFilter::parse_optional(config.tree_domain.as_deref(), schema)?,
        None => None,
    };

    let mut plot_columns = groups.plot_columns.clone();
    if let Some(domain) = &area_domain {
        for column in domain.columns() {
            if !case_insensitive_contains(&cond_schema, &column) && !plot_columns.contains(&column) {
                plot_columns.push(column);
            }
        }
    }
    tracing::debug!("{}: {} groups {:?}, plot columns {:?}", name, Stage::Load, groups.names(), plot_columns);

    // ===================================================================
    // STEP 2: stratification and conditions
    // ===================================================================
    let strat = cache.get_or_load(source, evalids, &plot_columns)?;
    let conditions = ConditionSet::load(
        source,
        &strat,
        config,
        &groups,
        area_domain.as_ref(),
        &plot_columns,
        &estimator.condition_columns(config),
        name,
    )?;
    tracing::debug!("{}: {} {} conditions", name, Stage::Filter, conditions.records.len());

    let ctx = EstimationContext {
        source,
        config,
        estimator: name,
        strat,
        groups,
        tree_domain,
        area_domain,
        conditions,
    };

    // ===================================================================
    // STEP 3: responses and denominator
    // ===================================================================
    let responses = estimator.responses(&ctx)?;
    let (denominator_conditions, scope) = estimator.denominator(&ctx)?;
    tracing::debug!(
        "{}: {} {} response rows, {} denominator conditions",
        name,
        Stage::Responses,
        responses.len(),
        denominator_conditions.len()
    );
    let plan = EstimationPlan {
        n_vars: estimator.n_vars(),
        cond_key_len: ctx.groups.cond_columns.len(),
        has_tree_groups: ctx.groups.has_tree_groups(),
        responses,
        conditions: denominator_conditions,
        denominator: scope,
    };

    // ===================================================================
    // STEP 4: two-stage aggregation and variance
    // ===================================================================
    let stage1 = condition_sums(&plan, &ctx.strat);
    tracing::debug!("{}: {} {} condition sums", name, Stage::Stage1, stage1.sums.len());
    let population = expand(&stage1, &plan, &ctx.strat);
    tracing::debug!("{}: {} {} groups", name, Stage::Stage2, population.groups.len());
    let covariances = all_group_covariances(&population, ctx.strat.strata());
    tracing::debug!("{}: {} done", name, Stage::Variance);

    // ===================================================================
    // STEP 5: format
    // ===================================================================
    let group_names = ctx.groups.names();
    let options = FormatOptions {
        group_names: &group_names,
        totals: config.totals,
        variance: config.variance,
        area_total: estimator.reports_area_total(),
        year: ctx.strat.report_year(),
    };
    let (table, format_warnings) = output::format_table(&population, &covariances, &estimator.metrics(), &options)?;
    tracing::debug!("{}: {} {} rows x {} cols", name, Stage::Format, table.height(), table.width());

    let mut warnings = ctx.strat.warnings().to_vec();
    warnings.extend(format_warnings);

    tracing::info!(
        "{} estimate over {} plots: {} row(s) in {:.3}s",
        name,
        ctx.strat.n_plots(),
        table.height(),
        started.elapsed().as_secs_f64()
    );
    Ok(Estimate {
        table,
        warnings,
        evalids: ctx.strat.evalids().to_vec(),
    })
}
