//! Domain filters
//!
//! User domains (`tree_domain`, `area_domain`) are SQL-like strings. They are
//! parsed once with nom into a typed `DomainExpr`, their column references
//! are checked against the schema of the table they filter, and the tree is
//! compiled to a polars expression. Anything that does not parse or names an unknown column
//! is a `DomainExpression` error carrying the original string.

pub mod ast;
pub mod parser;
pub mod presets;

use std::collections::BTreeSet;

use polars::prelude::Expr;
use rustc_hash::FxHashMap;

use crate::error::{FiaError, Result};

pub use ast::{CompareOp, DomainExpr, Literal, Operand};
pub use presets::{land_type_columns, land_type_predicate, tree_type_columns, tree_type_predicate};

/// A parsed and validated user domain
#[derive(Debug, Clone, PartialEq)]
pub struct DomainFilter {
    expression: String,
    expr: DomainExpr,
}

impl DomainFilter {
    /// Parse `expression` and resolve its columns against `known_columns`
    /// (case-insensitive; references are rewritten to the schema's spelling)
    pub fn parse(expression: &str, known_columns: &[String]) -> Result<Self> {
        let parsed = parser::parse(expression).map_err(|reason| FiaError::domain(expression, reason))?;

        let lookup: FxHashMap<String, &String> = known_columns
            .iter()
            .map(|name| (name.to_ascii_uppercase(), name))
            .collect();
        let resolve = |name: &str| lookup.get(&name.to_ascii_uppercase()).map(|s| s.to_string());
        let expr = parsed
            .resolve_columns(&resolve)
            .map_err(|reason| FiaError::domain(expression, reason))?;

        tracing::debug!("domain '{}' -> columns {:?}", expression, expr.columns());
        Ok(Self {
            expression: expression.to_string(),
            expr,
        })
    }

    /// Parse an optional domain string; blank strings mean no domain
    pub fn parse_optional(expression: Option<&str>, known_columns: &[String]) -> Result<Option<Self>> {
        match expression {
            Some(text) if !text.trim().is_empty() => Ok(Some(Self::parse(text, known_columns)?)),
            _ => Ok(None),
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn expr(&self) -> &DomainExpr {
        &self.expr
    }

    pub fn columns(&self) -> BTreeSet<String> {
        self.expr.columns()
    }

    pub fn to_polars(&self) -> Expr {
        self.expr.to_polars()
    }
}
