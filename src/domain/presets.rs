//! Built-in land and tree domains

use crate::config::{LandType, TreeType};

use super::ast::DomainExpr;

/// Productive site classes (at least 20 cubic feet/acre/year)
pub const TIMBER_SITE_CLASSES: [i64; 6] = [1, 2, 3, 4, 5, 6];

/// COND predicate for a land type (`None` = no restriction)
pub fn land_type_predicate(land_type: LandType) -> Option<DomainExpr> {
    match land_type {
        LandType::Forest => Some(DomainExpr::eq_int("COND_STATUS_CD", 1)),
        LandType::Timber => Some(
            DomainExpr::eq_int("COND_STATUS_CD", 1)
                .and(DomainExpr::in_ints("SITECLCD", &TIMBER_SITE_CLASSES))
                .and(DomainExpr::eq_int("RESERVCD", 0)),
        ),
        LandType::All => None,
    }
}

pub fn land_type_columns(land_type: LandType) -> &'static [&'static str] {
    match land_type {
        LandType::Forest => &["COND_STATUS_CD"],
        LandType::Timber => &["COND_STATUS_CD", "SITECLCD", "RESERVCD"],
        LandType::All => &[],
    }
}

/// TREE predicate for a tree type (`None` = no restriction)
pub fn tree_type_predicate(tree_type: TreeType) -> Option<DomainExpr> {
    match tree_type {
        TreeType::Live => Some(DomainExpr::eq_int("STATUSCD", 1)),
        TreeType::Dead => Some(DomainExpr::eq_int("STATUSCD", 2)),
        TreeType::GrowingStock => Some(
            DomainExpr::eq_int("STATUSCD", 1).and(DomainExpr::eq_int("TREECLCD", 2)),
        ),
        TreeType::All => None,
    }
}

pub fn tree_type_columns(tree_type: TreeType) -> &'static [&'static str] {
    match tree_type {
        TreeType::Live | TreeType::Dead => &["STATUSCD"],
        TreeType::GrowingStock => &["STATUSCD", "TREECLCD"],
        TreeType::All => &[],
    }
}
