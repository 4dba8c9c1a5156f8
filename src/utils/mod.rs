//! Utility modules shared by the estimators
//!
//! - `lazy_helpers`: table materialization with column validation, row filters
//! - `columns`: typed column extraction
//! - `group_key`: hashable group keys and their output columns
//! - `join`: key-indexed column attachment

pub mod columns;
pub mod group_key;
pub mod join;
pub mod lazy_helpers;

pub use group_key::{GroupKey, GroupValue};
pub use lazy_helpers::{filter_rows, materialize_with_columns, predicate_mask, ColumnRequest};
