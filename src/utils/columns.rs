//! Typed column extraction
//!
//! Filtered DataFrames are pulled into plain vectors before aggregation.
//! Numeric columns are cast so that integer/float storage differences between
//! parquet and CSV exports do not matter.

use polars::prelude::*;

use crate::error::Result;

/// Column as `f64` (integers are cast; nulls kept as `None`)
pub fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df.column(name)?;
    let cast = column.cast(&DataType::Float64)?;
    let values = cast.f64()?.into_iter().collect();
    Ok(values)
}

/// Column as `f64` or, when the table does not carry it, all-null
pub fn f64_values_or_null(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    if has_column(df, name) {
        f64_values(df, name)
    } else {
        Ok(vec![None; df.height()])
    }
}

/// Column as `i64` (floats are truncated toward zero)
pub fn i64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let column = df.column(name)?;
    let cast = column.cast(&DataType::Int64)?;
    let values = cast.i64()?.into_iter().collect();
    Ok(values)
}

pub fn i64_values_or_null(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    if has_column(df, name) {
        i64_values(df, name)
    } else {
        Ok(vec![None; df.height()])
    }
}

/// Column as owned strings
pub fn str_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df.column(name)?;
    let cast = column.cast(&DataType::String)?;
    let values = cast
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    Ok(values)
}

pub fn str_values_or_null(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    if has_column(df, name) {
        str_values(df, name)
    } else {
        Ok(vec![None; df.height()])
    }
}

/// Control-number column (CN, PLT_CN, PREV_TRE_CN ...) as strings
///
/// CNs are 64-bit integers in the FIA database but text in some exports.
/// Float-typed columns go through Int64 first so `12345.0` and `12345`
/// produce the same key.
pub fn key_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df.column(name)?;
    let column = if column.dtype().is_float() {
        column.cast(&DataType::Int64)?
    } else {
        column.clone()
    };
    let cast = column.cast(&DataType::String)?;
    let values = cast
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.trim().to_string()))
        .collect();
    Ok(values)
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}
