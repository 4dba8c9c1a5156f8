//! Inventory Table Sources
//!
//! The estimation core reads the FIA tables (PLOT, TREE, COND, POP_STRATUM,
//! POP_PLOT_STRATUM_ASSGN, POP_EVAL, POP_EVAL_TYP, TREE_GRM_COMPONENT,
//! TREE_GRM_MIDPT, TREE_GRM_BEGIN, ...) through the `TableSource` trait.
//! Column names follow the FIA database exactly; they are never renamed.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use polars::prelude::*;
use rustc_hash::FxHashMap;

use crate::error::{FiaError, Result};

pub mod tables {
    pub const PLOT: &str = "PLOT";
    pub const COND: &str = "COND";
    pub const TREE: &str = "TREE";
    pub const POP_STRATUM: &str = "POP_STRATUM";
    pub const POP_PLOT_STRATUM_ASSGN: &str = "POP_PLOT_STRATUM_ASSGN";
    pub const POP_EVAL: &str = "POP_EVAL";
    pub const POP_EVAL_TYP: &str = "POP_EVAL_TYP";
    pub const REF_SPECIES: &str = "REF_SPECIES";
    pub const TREE_GRM_COMPONENT: &str = "TREE_GRM_COMPONENT";
    pub const TREE_GRM_MIDPT: &str = "TREE_GRM_MIDPT";
    pub const TREE_GRM_BEGIN: &str = "TREE_GRM_BEGIN";
}

/// Read-only access to inventory tables
pub trait TableSource {
    /// Column names of a table, without loading its rows
    fn columns(&self, table: &str) -> Result<Vec<String>>;

    /// Load a table projected to `columns`
    fn load(&self, table: &str, columns: &[String]) -> Result<DataFrame>;

    fn has_table(&self, table: &str) -> bool {
        self.columns(table).is_ok()
    }
}

impl<T: TableSource + ?Sized> TableSource for &T {
    fn columns(&self, table: &str) -> Result<Vec<String>> {
        (**self).columns(table)
    }

    fn load(&self, table: &str, columns: &[String]) -> Result<DataFrame> {
        (**self).load(table, columns)
    }
}

/// Tables held in memory (tests, embedding, pre-fetched extracts)
#[derive(Default, Clone)]
pub struct MemorySource {
    tables: FxHashMap<String, DataFrame>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, df: DataFrame) -> Self {
        self.insert(name, df);
        self
    }

    pub fn insert(&mut self, name: &str, df: DataFrame) {
        self.tables.insert(name.to_ascii_uppercase(), df);
    }

    fn table(&self, name: &str) -> Result<&DataFrame> {
        self.tables
            .get(&name.to_ascii_uppercase())
            .ok_or_else(|| FiaError::Source(anyhow::anyhow!("table {} not loaded", name)))
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.tables.keys().collect();
        names.sort();
        f.debug_struct("MemorySource").field("tables", &names).finish()
    }
}

impl TableSource for MemorySource {
    fn columns(&self, table: &str) -> Result<Vec<String>> {
        let df = self.table(table)?;
        Ok(df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect())
    }

    fn load(&self, table: &str, columns: &[String]) -> Result<DataFrame> {
        let df = self.table(table)?;
        let col_exprs: Vec<Expr> = columns.iter().map(|name| col(name.as_str())).collect();
        let projected = df
            .clone()
            .lazy()
            .select(&col_exprs)
            .collect()
            .with_context(|| format!("Failed to project {} to {:?}", table, columns))?;
        Ok(projected)
    }
}

/// A directory of `<TABLE>.parquet` or `<TABLE>.csv` exports
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

enum TableFile {
    Parquet(PathBuf),
    Csv(PathBuf),
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(FiaError::Source(anyhow::anyhow!(
                "inventory directory not found: {:?}",
                root
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, table: &str) -> Result<TableFile> {
        let upper = table.to_ascii_uppercase();
        let parquet = self.root.join(format!("{}.parquet", upper));
        if parquet.is_file() {
            return Ok(TableFile::Parquet(parquet));
        }
        let csv = self.root.join(format!("{}.csv", upper));
        if csv.is_file() {
            return Ok(TableFile::Csv(csv));
        }
        Err(FiaError::Source(anyhow::anyhow!(
            "no {}.parquet or {}.csv in {:?}",
            upper,
            upper,
            self.root
        )))
    }

    fn scan(&self, table: &str) -> Result<LazyFrame> {
        match self.locate(table)? {
            TableFile::Parquet(path) => {
                let lf = LazyFrame::scan_parquet(&path, Default::default())
                    .with_context(|| format!("Failed to scan parquet: {:?}", path))?;
                Ok(lf)
            }
            TableFile::Csv(path) => {
                let df = CsvReadOptions::default()
                    .with_has_header(true)
                    .try_into_reader_with_file_path(Some(path.clone()))
                    .with_context(|| format!("Failed to create CSV reader: {:?}", path))?
                    .finish()
                    .with_context(|| format!("Failed to load CSV: {:?}", path))?;
                Ok(df.lazy())
            }
        }
    }
}

impl TableSource for DirectorySource {
    fn columns(&self, table: &str) -> Result<Vec<String>> {
        let mut lf = self.scan(table)?;
        let schema = lf
            .collect_schema()
            .with_context(|| format!("Failed to read schema of {}", table))?;
        Ok(schema.iter_names().map(|s| s.to_string()).collect())
    }

    fn load(&self, table: &str, columns: &[String]) -> Result<DataFrame> {
        let col_exprs: Vec<Expr> = columns.iter().map(|name| col(name.as_str())).collect();
        let df = self
            .scan(table)?
            .select(&col_exprs)
            .collect()
            .with_context(|| format!("Failed to load {} columns {:?}", table, columns))?;
        Ok(df)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_projection() {
        let plot = df![
            "CN" => &["1", "2"],
            "INVYR" => &[2020i64, 2021],
            "STATECD" => &[13i64, 13],
        ]
        .unwrap();
        let source = MemorySource::new().with_table("plot", plot);

        let cols = source.columns("PLOT").unwrap();
        assert_eq!(cols.len(), 3);

        let loaded = source
            .load("PLOT", &["CN".to_string(), "INVYR".to_string()])
            .unwrap();
        assert_eq!(loaded.width(), 2);
        assert_eq!(loaded.height(), 2);
    }

    #[test]
    fn test_memory_source_missing_table() {
        let source = MemorySource::new();
        assert!(source.columns("TREE").is_err());
        assert!(!source.has_table("TREE"));
    }

    #[test]
    fn test_directory_source_requires_directory() {
        assert!(DirectorySource::new("/definitely/not/a/real/fia/dir").is_err());
    }
}
