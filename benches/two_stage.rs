use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fia_estimator::aggregation::{condition_sums, expand, ConditionRow, DenominatorScope, EstimationPlan, ResponseRow};
use fia_estimator::utils::group_key::{GroupKey, GroupValue};
use fia_estimator::variance::all_group_covariances;
use fia_estimator::{EstimatorConfig, FiaSession, MemorySource, Stratification, TreeBasis};

const EVALID: i64 = 132101;
const STRATA: usize = 12;
const SPECIES: [i64; 6] = [110, 131, 316, 611, 802, 833];

/// Random single-evaluation inventory: one or two conditions per plot,
/// up to 25 trees per forested condition
fn inventory(n_plots: usize, seed: u64) -> MemorySource {
    let mut rng = StdRng::seed_from_u64(seed);

    let stratum_cns: Vec<String> = (0..STRATA).map(|s| format!("s{}", s)).collect();
    let expns: Vec<f64> = (0..STRATA).map(|_| rng.gen_range(2000.0..8000.0)).collect();
    let pop_stratum = df![
        "CN" => stratum_cns.clone(),
        "EVALID" => vec![EVALID; STRATA],
        "EXPNS" => expns,
        "ADJ_FACTOR_MICR" => vec![1.02; STRATA],
        "ADJ_FACTOR_SUBP" => vec![1.01; STRATA],
        "ADJ_FACTOR_MACR" => vec![1.0; STRATA],
    ]
    .unwrap();

    let plot_cns: Vec<String> = (0..n_plots).map(|p| format!("p{}", p)).collect();
    let assigned: Vec<String> = (0..n_plots).map(|_| stratum_cns[rng.gen_range(0..STRATA)].clone()).collect();
    let assgn = df![
        "PLT_CN" => plot_cns.clone(),
        "STRATUM_CN" => assigned,
        "EVALID" => vec![EVALID; n_plots],
    ]
    .unwrap();
    let plot = df![
        "CN" => plot_cns.clone(),
        "INVYR" => vec![2019i64; n_plots],
    ]
    .unwrap();

    let (mut c_plt, mut c_id, mut c_status, mut c_prop) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    let (mut t_plt, mut t_cond, mut t_spcd, mut t_dia, mut t_tpa) =
        (Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for plt in &plot_cns {
        let split: f64 = if rng.gen_bool(0.3) { rng.gen_range(0.2..0.8) } else { 1.0 };
        let conds = if split < 1.0 { vec![(1i64, split), (2, 1.0 - split)] } else { vec![(1, 1.0)] };
        for (condid, prop) in conds {
            let status = if rng.gen_bool(0.8) { 1i64 } else { 2 };
            c_plt.push(plt.clone());
            c_id.push(condid);
            c_status.push(status);
            c_prop.push(prop);
            if status != 1 {
                continue;
            }
            for _ in 0..rng.gen_range(0..25) {
                let dia: f64 = rng.gen_range(1.0..30.0);
                t_plt.push(plt.clone());
                t_cond.push(condid);
                t_spcd.push(SPECIES[rng.gen_range(0..SPECIES.len())]);
                t_dia.push(dia);
                t_tpa.push(if dia < 5.0 { 74.965282 } else { 6.018046 });
            }
        }
    }
    let n_trees = t_plt.len();
    let cond = df![
        "PLT_CN" => c_plt,
        "CONDID" => c_id,
        "COND_STATUS_CD" => c_status,
        "CONDPROP_UNADJ" => c_prop,
    ]
    .unwrap();
    let tree = df![
        "PLT_CN" => t_plt,
        "CONDID" => t_cond,
        "STATUSCD" => vec![1i64; n_trees],
        "SPCD" => t_spcd,
        "DIA" => t_dia,
        "TPA_UNADJ" => t_tpa,
    ]
    .unwrap();

    MemorySource::new()
        .with_table("POP_STRATUM", pop_stratum)
        .with_table("POP_PLOT_STRATUM_ASSGN", assgn)
        .with_table("PLOT", plot)
        .with_table("COND", cond)
        .with_table("TREE", tree)
}

/// Plan with `n_groups` tree-level groups over every plot of `strat`
fn plan(strat: &Stratification, n_groups: i64, seed: u64) -> EstimationPlan {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut responses = Vec::new();
    let mut conditions = Vec::new();
    for plt in strat.plot_cns() {
        conditions.push(ConditionRow {
            plt_cn: plt.clone(),
            condid: 1,
            condprop: 1.0,
            basis: TreeBasis::Subplot,
            cond_key: GroupKey::empty(),
        });
        for _ in 0..rng.gen_range(0..20) {
            responses.push(ResponseRow {
                plt_cn: plt.clone(),
                condid: 1,
                basis: Some(TreeBasis::Subplot),
                cond_key: GroupKey::empty(),
                tree_key: GroupKey(vec![GroupValue::Int(rng.gen_range(0..n_groups))]),
                values: [rng.gen_range(1.0..10.0), rng.gen_range(0.0..2.0)].into_iter().collect(),
            });
        }
    }
    EstimationPlan {
        n_vars: 2,
        cond_key_len: 0,
        has_tree_groups: true,
        responses,
        conditions,
        denominator: DenominatorScope::ByConditionGroups,
    }
}

fn bench_two_stage(c: &mut Criterion) {
    let mut group = c.benchmark_group("two_stage");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    for n_plots in [500usize, 5_000] {
        let source = inventory(n_plots, 7);
        let strat = Stratification::load(&source, &[EVALID.try_into().unwrap()], &[]).unwrap();
        let plan = plan(&strat, 40, 11);
        group.throughput(Throughput::Elements(plan.responses.len() as u64));
        group.bench_with_input(BenchmarkId::new("aggregate_and_variance", n_plots), &plan, |b, plan| {
            b.iter(|| {
                let stage1 = condition_sums(black_box(plan), &strat);
                let pop = expand(&stage1, plan, &strat);
                black_box(all_group_covariances(&pop, strat.strata()))
            })
        });
    }

    for n_plots in [500usize, 5_000] {
        let source = inventory(n_plots, 13);
        let config = EstimatorConfig::default().by_species(true).totals(true);
        let mut session = FiaSession::new(source);
        session.select_evalids(&[EVALID]).unwrap();
        group.bench_function(BenchmarkId::new("tpa_by_species", n_plots), |b| {
            b.iter(|| black_box(session.tpa(&config).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_two_stage);
criterion_main!(benches);
