//! Grouping keys
//!
//! Grouping columns can be integers (SPCD, FORTYPCD), strings (SIZE_CLASS,
//! LAND_TYPE) or, rarely, floats. Each row's values are captured in a
//! hashable, totally ordered `GroupKey`; output tables are sorted by it.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use polars::prelude::*;

use crate::error::Result;

/// Float wrapper with bitwise equality and total ordering
#[derive(Debug, Clone, Copy)]
pub struct FloatKey(pub f64);

impl PartialEq for FloatKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatKey {}

impl Hash for FloatKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupValue {
    Null,
    Int(i64),
    Float(FloatKey),
    Str(String),
}

impl fmt::Display for GroupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupValue::Null => write!(f, "null"),
            GroupValue::Int(v) => write!(f, "{}", v),
            GroupValue::Float(v) => write!(f, "{}", v.0),
            GroupValue::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Values of the grouping columns for one row
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey(pub Vec<GroupValue>);

impl GroupKey {
    pub fn empty() -> Self {
        GroupKey(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Condition-level values followed by tree-level values
    pub fn concat(first: &GroupKey, second: &GroupKey) -> GroupKey {
        let mut values = Vec::with_capacity(first.0.len() + second.0.len());
        values.extend(first.0.iter().cloned());
        values.extend(second.0.iter().cloned());
        GroupKey(values)
    }

    /// "SPCD=131, FORTYPCD=161" for log and warning messages
    pub fn describe(&self, names: &[String]) -> String {
        if self.0.is_empty() {
            return "(all)".to_string();
        }
        names
            .iter()
            .zip(self.0.iter())
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Per-row group values of one DataFrame column
pub fn group_values(df: &DataFrame, name: &str) -> Result<Vec<GroupValue>> {
    let column = df.column(name)?;
    let dtype = column.dtype().clone();

    if dtype.is_integer() || dtype == DataType::Boolean {
        let cast = column.cast(&DataType::Int64)?;
        return Ok(cast
            .i64()?
            .into_iter()
            .map(|v| v.map_or(GroupValue::Null, GroupValue::Int))
            .collect());
    }
    if dtype.is_float() {
        let cast = column.cast(&DataType::Float64)?;
        return Ok(cast
            .f64()?
            .into_iter()
            .map(|v| match v {
                None => GroupValue::Null,
                // integral floats (CSV exports of code columns) group as integers
                Some(x) if x.fract() == 0.0 && x.abs() < 9.0e15 => GroupValue::Int(x as i64),
                Some(x) => GroupValue::Float(FloatKey(x)),
            })
            .collect());
    }
    let cast = column.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|v| v.map_or(GroupValue::Null, |s| GroupValue::Str(s.to_string())))
        .collect())
}

/// Build one output column per grouping column from the ordered keys
pub fn group_columns(names: &[String], keys: &[GroupKey]) -> Vec<Column> {
    names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let values: Vec<&GroupValue> = keys.iter().map(|k| &k.0[idx]).collect();
            build_group_column(name, &values)
        })
        .collect()
}

fn build_group_column(name: &str, values: &[&GroupValue]) -> Column {
    let floats = values.iter().any(|v| matches!(v, GroupValue::Float(_)));
    let strs = values.iter().any(|v| matches!(v, GroupValue::Str(_)));

    if !strs && !floats {
        let data: Vec<Option<i64>> = values
            .iter()
            .map(|v| match v {
                GroupValue::Int(x) => Some(*x),
                _ => None,
            })
            .collect();
        Column::new(name.into(), data)
    } else if !strs {
        let data: Vec<Option<f64>> = values
            .iter()
            .map(|v| match v {
                GroupValue::Int(x) => Some(*x as f64),
                GroupValue::Float(x) => Some(x.0),
                _ => None,
            })
            .collect();
        Column::new(name.into(), data)
    } else {
        let data: Vec<Option<String>> = values
            .iter()
            .map(|v| match v {
                GroupValue::Null => None,
                other => Some(other.to_string()),
            })
            .collect();
        Column::new(name.into(), data)
    }
}
