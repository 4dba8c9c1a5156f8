//! Key lookups between tables
//!
//! FIA tables join on control numbers (PLT_CN -> PLOT.CN, TRE_CN -> TREE.CN).
//! Keys are normalised through `key_values` so integer and string CNs match,
//! the right side is indexed in an FxHashMap, and rows are gathered with
//! `DataFrame::take`.

use polars::prelude::*;
use rustc_hash::FxHashMap;

use crate::error::{FiaError, Result};
use crate::utils::columns::{has_column, key_values};

/// Index of each key's first row
pub fn index_by_key(df: &DataFrame, key: &str) -> Result<FxHashMap<String, usize>> {
    let keys = key_values(df, key)?;
    let mut index = FxHashMap::default();
    for (row, k) in keys.into_iter().enumerate() {
        if let Some(k) = k {
            index.entry(k).or_insert(row);
        }
    }
    Ok(index)
}

/// Append `columns` of `right` to `left`, matching `left[left_key]` to
/// `right[right_key]`.
///
/// With `keep_unmatched` every left row is kept (right columns null where no
/// match); otherwise unmatched left rows are dropped. Columns already present
/// on the left are not duplicated.
pub fn attach_columns(
    left: &DataFrame,
    left_key: &str,
    right: &DataFrame,
    right_key: &str,
    columns: &[String],
    keep_unmatched: bool,
) -> Result<DataFrame> {
    let index = index_by_key(right, right_key)?;
    let left_keys = key_values(left, left_key)?;

    let mut left_rows: Vec<IdxSize> = Vec::with_capacity(left.height());
    let mut right_rows: Vec<Option<IdxSize>> = Vec::with_capacity(left.height());
    for (row, k) in left_keys.iter().enumerate() {
        let matched = k.as_ref().and_then(|k| index.get(k)).map(|&r| r as IdxSize);
        if matched.is_some() || keep_unmatched {
            left_rows.push(row as IdxSize);
            right_rows.push(matched);
        }
    }

    let wanted: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|name| !has_column(left, name))
        .collect();
    for name in &wanted {
        if !has_column(right, name) {
            return Err(FiaError::Polars(PolarsError::ColumnNotFound(
                format!("{} (join on {})", name, right_key).into(),
            )));
        }
    }

    let left_idx = IdxCa::from_vec("idx".into(), left_rows);
    let gathered = left.take(&left_idx)?;
    if wanted.is_empty() {
        return Ok(gathered);
    }

    let right_idx = IdxCa::new("idx".into(), right_rows);
    let attached = right.select(wanted)?.take(&right_idx)?;
    Ok(gathered.hstack(attached.get_columns())?)
}
