//! End-to-end estimates over a synthetic inventory

mod common;

use approx::assert_relative_eq;
use common::*;
use fia_estimator::{
    BiomassComponent, EstimationWarning, EstimatorConfig, FiaError, FiaSession, LandType, MemorySource,
    VolumeType,
};

fn session(db: &FiaDb) -> FiaSession<MemorySource> {
    init_tracing();
    let mut session = FiaSession::new(db.build());
    session.select_evalids(&[EVALID]).unwrap();
    session
}

fn single(estimate: &fia_estimator::Estimate, column: &str) -> f64 {
    assert_eq!(estimate.height(), 1, "expected one row");
    estimate.value(column, 0).unwrap().unwrap()
}

#[test]
fn test_tpa_two_identical_plots() {
    let mut s = session(&two_plot_db());
    let est = s.tpa(&EstimatorConfig::default()).unwrap();

    assert_eq!(single(&est, "TPA"), 5.0);
    assert_relative_eq!(single(&est, "TPA_SE"), 0.0);
    assert_relative_eq!(single(&est, "BAA"), 0.005454154 * 64.0 * 5.0, epsilon = 1e-12);
    assert_eq!(est.n_plots().unwrap(), vec![Some(2)]);
    assert_eq!(est.value("YEAR", 0).unwrap(), Some(END_INVYR as f64));
    // fewer than 10 plots
    assert!(est
        .warnings
        .iter()
        .any(|w| matches!(w, EstimationWarning::InsufficientData { n_plots: 2, .. })));
}

#[test]
fn test_ratio_of_means_not_mean_of_ratios() {
    let db = FiaDb::new()
        .stratum("s1", 100.0)
        .plot("p1", "s1")
        .plot("p2", "s1")
        .cond(Cond::forest("p1", 1, 0.5))
        .cond(Cond::nonforest("p1", 2, 0.5))
        .cond(Cond::forest("p2", 1, 1.0))
        .tree(Tree::live("t1", "p1", 8.0, 10.0))
        .tree(Tree::live("t2", "p2", 8.0, 2.0));
    let est = session(&db).tpa(&EstimatorConfig::default()).unwrap();
    // (10 + 2) / (0.5 + 1.0); the mean of plot ratios would be 11
    assert_relative_eq!(single(&est, "TPA"), 8.0, epsilon = 1e-12);
}

#[test]
fn test_totals_and_area_total() {
    let mut s = session(&two_plot_db());
    let est = s.tpa(&EstimatorConfig::default().totals(true)).unwrap();
    assert_relative_eq!(single(&est, "TPA_TOTAL"), 1000.0);
    assert_relative_eq!(single(&est, "AREA_TOTAL"), 200.0);
    assert!(est.column_names().contains(&"TPA_TOTAL_SE".to_string()));
}

#[test]
fn test_empty_domain_gives_zero_not_nan() {
    let mut s = session(&two_plot_db());
    let est = s
        .tpa(&EstimatorConfig::default().area_domain("OWNGRPCD == 10"))
        .unwrap();
    assert_eq!(single(&est, "TPA"), 0.0);
    assert_eq!(single(&est, "TPA_SE"), 0.0);
    assert_eq!(est.n_plots().unwrap(), vec![Some(0)]);
}

#[test]
fn test_species_groups_sum_to_ungrouped() {
    let db = FiaDb::new()
        .stratum("s1", 100.0)
        .stratum("s2", 250.0)
        .plot("p1", "s1")
        .plot("p2", "s1")
        .plot("p3", "s2")
        .cond(Cond::forest("p1", 1, 1.0))
        .cond(Cond::forest("p2", 1, 0.7))
        .cond(Cond::nonforest("p2", 2, 0.3))
        .cond(Cond::forest("p3", 1, 1.0))
        .tree(Tree::live("a", "p1", 8.0, 6.0).biomass(400.0, 80.0))
        .tree(Tree::live("b", "p1", 12.0, 6.0).species(110).biomass(900.0, 180.0))
        .tree(Tree::live("c", "p2", 6.0, 6.0).biomass(250.0, 50.0))
        .tree(Tree::live("d", "p3", 15.0, 6.0).species(110).biomass(1400.0, 300.0));
    let mut s = session(&db);

    let all = s.biomass(BiomassComponent::Ag, &EstimatorConfig::default()).unwrap();
    let by_species = s
        .biomass(BiomassComponent::Ag, &EstimatorConfig::default().by_species(true))
        .unwrap();
    assert_eq!(by_species.height(), 2);
    let summed: f64 = by_species.column_f64("BIO_ACRE").unwrap().iter().flatten().sum();
    assert_relative_eq!(summed, single(&all, "BIO_ACRE"), epsilon = 1e-9);

    let carb = single(&all, "CARB_ACRE");
    assert_relative_eq!(carb, 0.47 * single(&all, "BIO_ACRE"), epsilon = 1e-12);
}

#[test]
fn test_microplot_subplot_boundary() {
    let db = FiaDb::new()
        .stratum_with_factors("s1", 100.0, 4.0, 1.0, 1.0)
        .plot("p1", "s1")
        .cond(Cond::forest("p1", 1, 1.0))
        .tree(Tree::live("small", "p1", 4.9, 10.0))
        .tree(Tree::live("large", "p1", 5.0, 10.0));
    let est = session(&db)
        .tpa(&EstimatorConfig::default().by_size_class(true))
        .unwrap();
    assert_eq!(est.height(), 2);
    let tpa = est.column_f64("TPA").unwrap();
    // sorted by SIZE_CLASS: 1.0-4.9 (microplot, x4), then 5.0-9.9 (subplot)
    assert_relative_eq!(tpa[0].unwrap(), 40.0);
    assert_relative_eq!(tpa[1].unwrap(), 10.0);
}

#[test]
fn test_macroplot_breakpoint() {
    let db = FiaDb::new()
        .stratum_with_factors("s1", 100.0, 1.0, 1.0, 2.0)
        .plot("p1", "s1")
        .macro_breakpoint("p1", 24.0)
        .cond(Cond::forest("p1", 1, 1.0))
        .tree(Tree::live("big", "p1", 30.0, 1.0));
    let est = session(&db).tpa(&EstimatorConfig::default()).unwrap();
    assert_relative_eq!(single(&est, "TPA"), 2.0);
}

#[test]
fn test_repeated_calls_are_identical() {
    let db = FiaDb::new()
        .stratum("s1", 100.0)
        .stratum("s2", 300.0)
        .plot("p1", "s1")
        .plot("p2", "s1")
        .plot("p3", "s2")
        .plot("p4", "s2")
        .cond(Cond::forest("p1", 1, 1.0))
        .cond(Cond::forest("p2", 1, 1.0))
        .cond(Cond::forest("p3", 1, 0.5))
        .cond(Cond::nonforest("p3", 2, 0.5))
        .cond(Cond::forest("p4", 1, 1.0))
        .tree(Tree::live("a", "p1", 8.0, 6.0).volume(10.0))
        .tree(Tree::live("b", "p2", 14.0, 6.0).volume(40.0))
        .tree(Tree::live("c", "p3", 9.0, 6.0).volume(12.0))
        .tree(Tree::live("d", "p4", 22.0, 6.0).volume(90.0));
    let mut s = session(&db);
    let config = EstimatorConfig::default().totals(true).by_species(true);
    let first = s.volume(VolumeType::Net, &config).unwrap();
    let second = s.volume(VolumeType::Net, &config).unwrap();
    assert!(first.table.equals_missing(&second.table));

    let se = first.column_f64("VOLCFNET_ACRE_SE").unwrap();
    assert!(se.iter().flatten().all(|v| v.is_finite() && *v >= 0.0));
    assert!(se.iter().flatten().any(|v| *v > 0.0));
}

#[test]
fn test_variance_is_squared_standard_error() {
    let db = FiaDb::new()
        .stratum("s1", 100.0)
        .plot("p1", "s1")
        .plot("p2", "s1")
        .plot("p3", "s1")
        .cond(Cond::forest("p1", 1, 1.0))
        .cond(Cond::forest("p2", 1, 1.0))
        .cond(Cond::forest("p3", 1, 1.0))
        .tree(Tree::live("a", "p1", 8.0, 3.0))
        .tree(Tree::live("b", "p2", 8.0, 9.0));
    let mut s = session(&db);
    let se = single(&s.tpa(&EstimatorConfig::default()).unwrap(), "TPA_SE");
    let var = single(&s.tpa(&EstimatorConfig::default().variance(true)).unwrap(), "TPA_VAR");
    assert!(se > 0.0);
    assert_relative_eq!(var, se * se, epsilon = 1e-9);
}

#[test]
fn test_timber_land_type() {
    let db = FiaDb::new()
        .stratum("s1", 100.0)
        .plot("p1", "s1")
        .plot("p2", "s1")
        .cond(Cond::forest("p1", 1, 1.0))
        .cond(Cond::forest("p2", 1, 1.0).site(Some(7), 0))
        .tree(Tree::live("a", "p1", 8.0, 4.0))
        .tree(Tree::live("b", "p2", 8.0, 8.0));
    let mut s = session(&db);
    let forest = single(&s.tpa(&EstimatorConfig::default()).unwrap(), "TPA");
    let timber = single(
        &s.tpa(&EstimatorConfig::default().land_type(LandType::Timber)).unwrap(),
        "TPA",
    );
    assert_relative_eq!(forest, 6.0);
    assert_relative_eq!(timber, 4.0);
}

#[test]
fn test_duplicate_assignments_warn_but_do_not_double_count() {
    let mut s = session(&two_plot_db().duplicate_assignments(1));
    let est = s.tpa(&EstimatorConfig::default()).unwrap();
    assert_eq!(single(&est, "TPA"), 5.0);
    assert_eq!(est.n_plots().unwrap(), vec![Some(2)]);
    assert!(est
        .warnings
        .iter()
        .any(|w| matches!(w, EstimationWarning::DuplicateStratification { .. })));
}

#[test]
fn test_overfull_plot_conditions_are_rejected() {
    let db = FiaDb::new()
        .stratum("s1", 100.0)
        .plot("p1", "s1")
        .plot("p2", "s1")
        .cond(Cond::forest("p1", 1, 0.8))
        .cond(Cond::forest("p1", 2, 0.8))
        .cond(Cond::forest("p2", 1, 1.0))
        .tree(Tree::live("t1", "p1", 8.0, 5.0));
    let mut s = session(&db);
    for result in [
        s.area(&EstimatorConfig::default().totals(true)),
        s.tpa(&EstimatorConfig::default()),
    ] {
        match result {
            Err(FiaError::InvalidData { table, column, reason }) => {
                assert_eq!(table, "COND");
                assert_eq!(column, "CONDPROP_UNADJ");
                assert!(reason.contains("p1"), "{}", reason);
            }
            other => panic!("expected InvalidData, got {:?}", other.map(|e| e.table)),
        }
    }
}

#[test]
fn test_split_plot_within_tolerance_is_accepted() {
    // 0.1 + 0.2 + 0.7 is not exactly 1.0 in floating point
    let db = FiaDb::new()
        .stratum("s1", 100.0)
        .plot("p1", "s1")
        .cond(Cond::forest("p1", 1, 0.1))
        .cond(Cond::forest("p1", 2, 0.2))
        .cond(Cond::forest("p1", 3, 0.7));
    let est = session(&db).area(&EstimatorConfig::default().totals(true)).unwrap();
    assert_relative_eq!(single(&est, "AREA"), 100.0, epsilon = 1e-9);
}

#[test]
fn test_fixture_plots_are_never_overfull() {
    let db = two_plot_db().tree(Tree::live("t3", "p1", 12.0, 5.0));
    for (plt, total) in db.plot_condprop_sums() {
        assert!(total <= 1.0 + 1e-9, "plot {} sums to {}", plt, total);
    }
}

#[test]
fn test_missing_column_is_fatal() {
    let db = two_plot_db();
    let mut source = db.build();
    source.insert("TREE", db.tree_table().drop("DIA").unwrap());
    let mut s = FiaSession::new(source);
    s.select_evalids(&[EVALID]).unwrap();
    match s.tpa(&EstimatorConfig::default()) {
        Err(FiaError::MissingColumn { estimator, table, columns }) => {
            assert_eq!(estimator, "tpa");
            assert_eq!(table, "TREE");
            assert!(columns.contains(&"DIA".to_string()));
        }
        other => panic!("expected MissingColumn, got {:?}", other.map(|e| e.table)),
    }
}

#[test]
fn test_bad_domain_is_fatal() {
    let mut s = session(&two_plot_db());
    let err = s.tpa(&EstimatorConfig::default().tree_domain("DIA >> 5")).unwrap_err();
    assert!(matches!(err, FiaError::DomainExpression { .. }));
    let err = s.tpa(&EstimatorConfig::default().tree_domain("NOT_A_COLUMN > 5")).unwrap_err();
    assert!(matches!(err, FiaError::DomainExpression { .. }));
}

#[test]
fn test_tree_domain_filters_trees() {
    let db = two_plot_db().tree(Tree::live("t3", "p1", 12.0, 5.0));
    let est = session(&db)
        .tpa(&EstimatorConfig::default().tree_domain("DIA >= 10"))
        .unwrap();
    assert_relative_eq!(single(&est, "TPA"), 2.5);
}

#[test]
fn test_unselected_session_refuses() {
    let mut s = FiaSession::new(two_plot_db().build());
    assert!(matches!(
        s.tpa(&EstimatorConfig::default()),
        Err(FiaError::NoEvaluationSelected)
    ));
    let est = s.tpa(&EstimatorConfig::default().most_recent(true)).unwrap();
    assert_eq!(single(&est, "TPA"), 5.0);
    assert!(est
        .warnings
        .iter()
        .any(|w| matches!(w, EstimationWarning::AutoSelectedEvaluation { .. })));
}

#[test]
fn test_config_from_json() {
    let config = EstimatorConfig::from_json_str(
        r#"{"by_species": true, "land_type": "timber", "tree_type": "gs", "totals": true}"#,
    )
    .unwrap();
    assert!(config.by_species);
    assert_eq!(config.land_type, LandType::Timber);
    assert_eq!(config.tree_type, fia_estimator::TreeType::GrowingStock);
}
