//! Table loading helpers with column validation
//!
//! Every estimator declares the columns it needs up front. These helpers check
//! them against the source schema before anything is materialized, so a missing
//! structural column fails fast with a `MissingColumn` error naming the
//! estimator instead of surfacing later as a zero.

use polars::prelude::*;
use rustc_hash::FxHashSet;

use crate::data::TableSource;
use crate::error::{FiaError, Result};

/// Column request for one table: required columns fail when absent,
/// optional columns are loaded only if the table has them.
#[derive(Debug, Clone, Default)]
pub struct ColumnRequest {
    required: Vec<String>,
    optional: Vec<String>,
}

impl ColumnRequest {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = Self::default();
        for name in required {
            request.require(name);
        }
        request
    }

    pub fn require(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    pub fn require_all<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.require(name);
        }
        self
    }

    pub fn optional(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.optional.contains(&name) && !self.required.contains(&name) {
            self.optional.push(name);
        }
        self
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }
}

/// Materialize a table with explicit column validation
///
/// # Errors
/// - `MissingTable` if the source has no such table
/// - `MissingColumn` listing every required column the table lacks
pub fn materialize_with_columns<S: TableSource + ?Sized>(
    source: &S,
    table: &str,
    request: &ColumnRequest,
    estimator: &str,
) -> Result<DataFrame> {
    let available: FxHashSet<String> = source
        .columns(table)
        .map_err(|_| FiaError::MissingTable {
            estimator: estimator.to_string(),
            table: table.to_string(),
        })?
        .into_iter()
        .collect();

    // VALIDATE: every required column is present
    let missing: Vec<String> = request
        .required
        .iter()
        .filter(|name| !available.contains(name.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(FiaError::missing_columns(estimator, table, missing));
    }

    let mut columns = request.required.clone();
    columns.extend(
        request
            .optional
            .iter()
            .filter(|name| available.contains(name.as_str()))
            .cloned(),
    );

    let df = source.load(table, &columns)?;
    tracing::debug!("{}: loaded {} ({} rows x {} cols)", estimator, table, df.height(), df.width());
    Ok(df)
}

/// Keep rows where `predicate` holds (null counts as false)
pub fn filter_rows(df: DataFrame, predicate: Option<Expr>) -> Result<DataFrame> {
    match predicate {
        Some(expr) => Ok(df.lazy().filter(expr).collect()?),
        None => Ok(df),
    }
}

/// Evaluate `predicate` per row without dropping rows (null counts as false)
pub fn predicate_mask(df: &DataFrame, predicate: Option<Expr>) -> Result<Vec<bool>> {
    let Some(expr) = predicate else {
        return Ok(vec![true; df.height()]);
    };
    let evaluated = df
        .clone()
        .lazy()
        .select([expr.alias("__mask")])
        .collect()?;
    let mask: Vec<bool> = evaluated
        .column("__mask")?
        .bool()?
        .into_iter()
        .map(|v| v.unwrap_or(false))
        .collect();
    // constant predicates evaluate to a single row
    if mask.len() == 1 && df.height() != 1 {
        return Ok(vec![mask[0]; df.height()]);
    }
    Ok(mask)
}
