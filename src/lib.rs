//! FIA population estimation
//!
//! Design-based estimates (post-stratified ratio of means, Bechtold & Patterson
//! 2005) over USDA Forest Inventory and Analysis tables:
//!
//! - `data/`: table sources (in-memory, parquet/CSV directory)
//! - `evaluation/`, `stratification/`: EVALID selection and the stratified design
//! - `domain/`: SQL-like tree/area domain filters
//! - `aggregation/`, `variance/`: two-stage totals and stratified variance
//! - `estimators/`: area, TPA, volume, biomass, carbon, growth, mortality,
//!   removals, carbon flux, site index
//! - `panel/`: remeasurement panels
//!
//! Polars handles loading, projection and filtering; the numerical core works
//! on typed records.

pub mod aggregation;
pub mod basis;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod estimators;
pub mod evaluation;
pub mod panel;
pub mod session;
pub mod stratification;
pub mod utils;
pub mod variance;

// Re-export commonly used types
pub use basis::TreeBasis;
pub use config::{EstimatorConfig, LandType, TreeType};
pub use data::{DirectorySource, MemorySource, TableSource};
pub use domain::DomainFilter;
pub use error::{EstimationWarning, FiaError, Result};
pub use estimators::{
    AreaEstimator, BiomassComponent, BiomassEstimator, CarbonEstimator, CarbonFluxEstimator, CarbonPool, Estimate,
    Estimator, GrmMeasure, GrowthBasis, GrowthEstimator, MortalityEstimator, MortalityMethod, RemovalsEstimator,
    SiteIndexEstimator, TpaEstimator, VolumeEstimator, VolumeType,
};
pub use evaluation::{EvalId, EvalType};
pub use panel::{build_panel, PanelConfig, PanelLevel, TreeFate};
pub use session::FiaSession;
pub use stratification::{Stratification, StratificationCache};
