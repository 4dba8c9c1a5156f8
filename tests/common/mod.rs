//! Synthetic FIA database for integration tests
//!
//! One evaluation (EVALID 132101, END_INVYR 2021) typed for every estimate;
//! adjustment factors default to 1 so expected values can be worked by hand.

#![allow(dead_code)]

use fia_estimator::MemorySource;
use polars::prelude::*;

pub const EVALID: i64 = 132101;
pub const END_INVYR: i64 = 2021;

#[derive(Debug, Clone)]
pub struct Stratum {
    pub cn: String,
    pub expns: f64,
    pub adj_micr: f64,
    pub adj_subp: f64,
    pub adj_macr: f64,
}

#[derive(Debug, Clone)]
pub struct Plot {
    pub cn: String,
    pub stratum: String,
    pub invyr: i64,
    pub remper: Option<f64>,
    pub prev_plt_cn: Option<String>,
    pub macro_breakpoint: Option<f64>,
    /// false for prior measurements that are not in the evaluation
    pub assigned: bool,
}

#[derive(Debug, Clone)]
pub struct Cond {
    pub plt_cn: String,
    pub condid: i64,
    pub status: i64,
    pub condprop: f64,
    pub prop_basis: String,
    pub siteclcd: Option<i64>,
    pub reservcd: i64,
    pub owngrpcd: i64,
    pub fortypcd: Option<i64>,
    pub sicond: Option<f64>,
    pub sibase: Option<i64>,
    pub trtcd1: Option<i64>,
}

impl Cond {
    pub fn forest(plt_cn: &str, condid: i64, condprop: f64) -> Self {
        Self {
            plt_cn: plt_cn.to_string(),
            condid,
            status: 1,
            condprop,
            prop_basis: "SUBP".to_string(),
            siteclcd: Some(3),
            reservcd: 0,
            owngrpcd: 40,
            fortypcd: Some(161),
            sicond: None,
            sibase: None,
            trtcd1: None,
        }
    }

    pub fn nonforest(plt_cn: &str, condid: i64, condprop: f64) -> Self {
        Self {
            status: 2,
            siteclcd: None,
            fortypcd: None,
            ..Self::forest(plt_cn, condid, condprop)
        }
    }

    pub fn status(mut self, status: i64) -> Self {
        self.status = status;
        self
    }

    pub fn owner(mut self, owngrpcd: i64) -> Self {
        self.owngrpcd = owngrpcd;
        self
    }

    pub fn site(mut self, siteclcd: Option<i64>, reservcd: i64) -> Self {
        self.siteclcd = siteclcd;
        self.reservcd = reservcd;
        self
    }

    pub fn site_index(mut self, sicond: f64, sibase: i64) -> Self {
        self.sicond = Some(sicond);
        self.sibase = Some(sibase);
        self
    }

    pub fn treatment(mut self, trtcd1: i64) -> Self {
        self.trtcd1 = Some(trtcd1);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    pub cn: String,
    pub prev_tre_cn: Option<String>,
    pub plt_cn: String,
    pub condid: i64,
    pub statuscd: i64,
    pub spcd: i64,
    pub dia: Option<f64>,
    pub tpa: f64,
    pub treeclcd: i64,
    pub volcfnet: Option<f64>,
    pub volcfgrs: Option<f64>,
    pub volcfsnd: Option<f64>,
    pub volcsnet: Option<f64>,
    pub volbfnet: Option<f64>,
    pub drybio_ag: Option<f64>,
    pub drybio_bg: Option<f64>,
    pub drybio_bole: Option<f64>,
    pub drybio_stump: Option<f64>,
    pub carbon_ag: Option<f64>,
    pub carbon_bg: Option<f64>,
    pub mortyr: Option<i64>,
}

impl Tree {
    pub fn live(cn: &str, plt_cn: &str, dia: f64, tpa: f64) -> Self {
        Self {
            cn: cn.to_string(),
            prev_tre_cn: None,
            plt_cn: plt_cn.to_string(),
            condid: 1,
            statuscd: 1,
            spcd: 131,
            dia: Some(dia),
            tpa,
            treeclcd: 2,
            volcfnet: None,
            volcfgrs: None,
            volcfsnd: None,
            volcsnet: None,
            volbfnet: None,
            drybio_ag: None,
            drybio_bg: None,
            drybio_bole: None,
            drybio_stump: None,
            carbon_ag: None,
            carbon_bg: None,
            mortyr: None,
        }
    }

    pub fn dead(mut self, mortyr: Option<i64>) -> Self {
        self.statuscd = 2;
        self.mortyr = mortyr;
        self
    }

    /// STATUSCD 3: removed (cut or diverted) since the last inventory
    pub fn removed(mut self) -> Self {
        self.statuscd = 3;
        self
    }

    pub fn condid(mut self, condid: i64) -> Self {
        self.condid = condid;
        self
    }

    pub fn species(mut self, spcd: i64) -> Self {
        self.spcd = spcd;
        self
    }

    pub fn previous(mut self, prev_tre_cn: &str) -> Self {
        self.prev_tre_cn = Some(prev_tre_cn.to_string());
        self
    }

    pub fn volume(mut self, volcfnet: f64) -> Self {
        self.volcfnet = Some(volcfnet);
        self.volcfgrs = Some(volcfnet * 1.1);
        self
    }

    pub fn biomass(mut self, ag: f64, bg: f64) -> Self {
        self.drybio_ag = Some(ag);
        self.drybio_bg = Some(bg);
        self
    }

    pub fn carbon(mut self, ag: f64, bg: f64) -> Self {
        self.carbon_ag = Some(ag);
        self.carbon_bg = Some(bg);
        self
    }
}

/// One TREE_GRM_COMPONENT row (AL/FOREST columns) with its midpoint and
/// beginning measures
#[derive(Debug, Clone)]
pub struct Grm {
    pub tre_cn: String,
    pub component: Option<String>,
    pub subptyp: i64,
    pub tpagrow: f64,
    pub tpamort: f64,
    pub tparemv: f64,
    pub begin_vol: Option<f64>,
    pub midpt_vol: Option<f64>,
    pub begin_bio: Option<f64>,
    pub midpt_bio: Option<f64>,
}

impl Grm {
    pub fn new(tre_cn: &str, component: &str, tpa: f64) -> Self {
        Self {
            tre_cn: tre_cn.to_string(),
            component: Some(component.to_string()),
            subptyp: 1,
            tpagrow: tpa,
            tpamort: tpa,
            tparemv: tpa,
            begin_vol: None,
            midpt_vol: None,
            begin_bio: None,
            midpt_bio: None,
        }
    }

    pub fn volumes(mut self, begin: f64, midpt: f64) -> Self {
        self.begin_vol = Some(begin);
        self.midpt_vol = Some(midpt);
        self
    }

    pub fn biomass(mut self, begin: f64, midpt: f64) -> Self {
        self.begin_bio = Some(begin);
        self.midpt_bio = Some(midpt);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FiaDb {
    pub strata: Vec<Stratum>,
    pub plots: Vec<Plot>,
    pub conds: Vec<Cond>,
    pub trees: Vec<Tree>,
    pub grm: Vec<Grm>,
    /// Repeat every plot assignment row this many extra times
    pub duplicate_assignments: usize,
}

impl FiaDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stratum(mut self, cn: &str, expns: f64) -> Self {
        self.strata.push(Stratum {
            cn: cn.to_string(),
            expns,
            adj_micr: 1.0,
            adj_subp: 1.0,
            adj_macr: 1.0,
        });
        self
    }

    pub fn stratum_with_factors(mut self, cn: &str, expns: f64, micr: f64, subp: f64, macr: f64) -> Self {
        self.strata.push(Stratum {
            cn: cn.to_string(),
            expns,
            adj_micr: micr,
            adj_subp: subp,
            adj_macr: macr,
        });
        self
    }

    pub fn plot(mut self, cn: &str, stratum: &str) -> Self {
        self.plots.push(Plot {
            cn: cn.to_string(),
            stratum: stratum.to_string(),
            invyr: 2019,
            remper: Some(5.0),
            prev_plt_cn: None,
            macro_breakpoint: None,
            assigned: true,
        });
        self
    }

    /// A remeasured plot and its (unassigned) prior measurement
    pub fn remeasured_plot(mut self, cn: &str, prev_cn: &str, stratum: &str, remper: f64) -> Self {
        self.plots.push(Plot {
            cn: prev_cn.to_string(),
            stratum: stratum.to_string(),
            invyr: 2014,
            remper: None,
            prev_plt_cn: None,
            macro_breakpoint: None,
            assigned: false,
        });
        self.plots.push(Plot {
            cn: cn.to_string(),
            stratum: stratum.to_string(),
            invyr: 2019,
            remper: Some(remper),
            prev_plt_cn: Some(prev_cn.to_string()),
            macro_breakpoint: None,
            assigned: true,
        });
        self
    }

    pub fn macro_breakpoint(mut self, plt_cn: &str, breakpoint: f64) -> Self {
        if let Some(p) = self.plots.iter_mut().find(|p| p.cn == plt_cn) {
            p.macro_breakpoint = Some(breakpoint);
        }
        self
    }

    pub fn cond(mut self, cond: Cond) -> Self {
        self.conds.push(cond);
        self
    }

    pub fn tree(mut self, tree: Tree) -> Self {
        self.trees.push(tree);
        self
    }

    pub fn grm(mut self, grm: Grm) -> Self {
        self.grm.push(grm);
        self
    }

    pub fn duplicate_assignments(mut self, copies: usize) -> Self {
        self.duplicate_assignments = copies;
        self
    }

    /// Sum of CONDPROP_UNADJ per plot, sorted by plot
    pub fn plot_condprop_sums(&self) -> Vec<(String, f64)> {
        let mut sums: Vec<(String, f64)> = Vec::new();
        for c in &self.conds {
            match sums.iter_mut().find(|(plt, _)| *plt == c.plt_cn) {
                Some((_, total)) => *total += c.condprop,
                None => sums.push((c.plt_cn.clone(), c.condprop)),
            }
        }
        sums.sort_by(|a, b| a.0.cmp(&b.0));
        sums
    }

    pub fn build(&self) -> MemorySource {
        MemorySource::new()
            .with_table("POP_EVAL", self.pop_eval())
            .with_table("POP_EVAL_TYP", self.pop_eval_typ())
            .with_table("POP_STRATUM", self.pop_stratum())
            .with_table("POP_PLOT_STRATUM_ASSGN", self.assignments())
            .with_table("PLOT", self.plot_table())
            .with_table("COND", self.cond_table())
            .with_table("TREE", self.tree_table())
            .with_table("TREE_GRM_COMPONENT", self.grm_table())
            .with_table("TREE_GRM_MIDPT", self.grm_measures(|g| (g.midpt_vol, g.midpt_bio)))
            .with_table("TREE_GRM_BEGIN", self.grm_measures(|g| (g.begin_vol, g.begin_bio)))
    }

    pub fn pop_eval(&self) -> DataFrame {
        df![
            "CN" => &["eval1"],
            "EVALID" => &[EVALID],
            "STATECD" => &[13i64],
            "END_INVYR" => &[END_INVYR],
        ]
        .unwrap()
    }

    pub fn pop_eval_typ(&self) -> DataFrame {
        let types = ["EXPCURR", "EXPVOL", "EXPGROW", "EXPMORT", "EXPREMV"];
        df![
            "EVAL_CN" => vec!["eval1"; types.len()],
            "EVAL_TYP" => types.to_vec(),
        ]
        .unwrap()
    }

    pub fn pop_stratum(&self) -> DataFrame {
        df![
            "CN" => self.strata.iter().map(|s| s.cn.clone()).collect::<Vec<_>>(),
            "EVALID" => vec![EVALID; self.strata.len()],
            "EXPNS" => self.strata.iter().map(|s| s.expns).collect::<Vec<_>>(),
            "ADJ_FACTOR_MICR" => self.strata.iter().map(|s| s.adj_micr).collect::<Vec<_>>(),
            "ADJ_FACTOR_SUBP" => self.strata.iter().map(|s| s.adj_subp).collect::<Vec<_>>(),
            "ADJ_FACTOR_MACR" => self.strata.iter().map(|s| s.adj_macr).collect::<Vec<_>>(),
        ]
        .unwrap()
    }

    pub fn assignments(&self) -> DataFrame {
        let assigned: Vec<&Plot> = self.plots.iter().filter(|p| p.assigned).collect();
        let copies = 1 + self.duplicate_assignments;
        let mut plt_cn = Vec::new();
        let mut stratum_cn = Vec::new();
        for _ in 0..copies {
            for p in &assigned {
                plt_cn.push(p.cn.clone());
                stratum_cn.push(p.stratum.clone());
            }
        }
        let n = plt_cn.len();
        df![
            "PLT_CN" => plt_cn,
            "STRATUM_CN" => stratum_cn,
            "EVALID" => vec![EVALID; n],
        ]
        .unwrap()
    }

    pub fn plot_table(&self) -> DataFrame {
        df![
            "CN" => self.plots.iter().map(|p| p.cn.clone()).collect::<Vec<_>>(),
            "PREV_PLT_CN" => self.plots.iter().map(|p| p.prev_plt_cn.clone()).collect::<Vec<_>>(),
            "STATECD" => vec![13i64; self.plots.len()],
            "INVYR" => self.plots.iter().map(|p| p.invyr).collect::<Vec<_>>(),
            "REMPER" => self.plots.iter().map(|p| p.remper).collect::<Vec<_>>(),
            "MACRO_BREAKPOINT_DIA" => self.plots.iter().map(|p| p.macro_breakpoint).collect::<Vec<_>>(),
        ]
        .unwrap()
    }

    pub fn cond_table(&self) -> DataFrame {
        let c = &self.conds;
        df![
            "PLT_CN" => c.iter().map(|c| c.plt_cn.clone()).collect::<Vec<_>>(),
            "CONDID" => c.iter().map(|c| c.condid).collect::<Vec<_>>(),
            "COND_STATUS_CD" => c.iter().map(|c| c.status).collect::<Vec<_>>(),
            "CONDPROP_UNADJ" => c.iter().map(|c| c.condprop).collect::<Vec<_>>(),
            "PROP_BASIS" => c.iter().map(|c| c.prop_basis.clone()).collect::<Vec<_>>(),
            "SITECLCD" => c.iter().map(|c| c.siteclcd).collect::<Vec<_>>(),
            "RESERVCD" => c.iter().map(|c| c.reservcd).collect::<Vec<_>>(),
            "OWNGRPCD" => c.iter().map(|c| c.owngrpcd).collect::<Vec<_>>(),
            "FORTYPCD" => c.iter().map(|c| c.fortypcd).collect::<Vec<_>>(),
            "SICOND" => c.iter().map(|c| c.sicond).collect::<Vec<_>>(),
            "SIBASE" => c.iter().map(|c| c.sibase).collect::<Vec<_>>(),
            "TRTCD1" => c.iter().map(|c| c.trtcd1).collect::<Vec<_>>(),
            "TRTCD2" => vec![None::<i64>; c.len()],
            "TRTCD3" => vec![None::<i64>; c.len()],
        ]
        .unwrap()
    }

    pub fn tree_table(&self) -> DataFrame {
        let t = &self.trees;
        df![
            "CN" => t.iter().map(|t| t.cn.clone()).collect::<Vec<_>>(),
            "PREV_TRE_CN" => t.iter().map(|t| t.prev_tre_cn.clone()).collect::<Vec<_>>(),
            "PLT_CN" => t.iter().map(|t| t.plt_cn.clone()).collect::<Vec<_>>(),
            "CONDID" => t.iter().map(|t| t.condid).collect::<Vec<_>>(),
            "STATUSCD" => t.iter().map(|t| t.statuscd).collect::<Vec<_>>(),
            "SPCD" => t.iter().map(|t| t.spcd).collect::<Vec<_>>(),
            "DIA" => t.iter().map(|t| t.dia).collect::<Vec<_>>(),
            "TPA_UNADJ" => t.iter().map(|t| t.tpa).collect::<Vec<_>>(),
            "TREECLCD" => t.iter().map(|t| t.treeclcd).collect::<Vec<_>>(),
            "VOLCFNET" => t.iter().map(|t| t.volcfnet).collect::<Vec<_>>(),
            "VOLCFGRS" => t.iter().map(|t| t.volcfgrs).collect::<Vec<_>>(),
            "VOLCFSND" => t.iter().map(|t| t.volcfsnd).collect::<Vec<_>>(),
            "VOLCSNET" => t.iter().map(|t| t.volcsnet).collect::<Vec<_>>(),
            "VOLBFNET" => t.iter().map(|t| t.volbfnet).collect::<Vec<_>>(),
            "DRYBIO_AG" => t.iter().map(|t| t.drybio_ag).collect::<Vec<_>>(),
            "DRYBIO_BG" => t.iter().map(|t| t.drybio_bg).collect::<Vec<_>>(),
            "DRYBIO_BOLE" => t.iter().map(|t| t.drybio_bole).collect::<Vec<_>>(),
            "DRYBIO_STUMP" => t.iter().map(|t| t.drybio_stump).collect::<Vec<_>>(),
            "CARBON_AG" => t.iter().map(|t| t.carbon_ag).collect::<Vec<_>>(),
            "CARBON_BG" => t.iter().map(|t| t.carbon_bg).collect::<Vec<_>>(),
            "MORTYR" => t.iter().map(|t| t.mortyr).collect::<Vec<_>>(),
        ]
        .unwrap()
    }

    pub fn grm_table(&self) -> DataFrame {
        let g = &self.grm;
        df![
            "TRE_CN" => g.iter().map(|g| g.tre_cn.clone()).collect::<Vec<_>>(),
            "SUBP_COMPONENT_AL_FOREST" => g.iter().map(|g| g.component.clone()).collect::<Vec<_>>(),
            "SUBP_SUBPTYP_GRM_AL_FOREST" => g.iter().map(|g| g.subptyp).collect::<Vec<_>>(),
            "SUBP_TPAGROW_UNADJ_AL_FOREST" => g.iter().map(|g| g.tpagrow).collect::<Vec<_>>(),
            "SUBP_TPAMORT_UNADJ_AL_FOREST" => g.iter().map(|g| g.tpamort).collect::<Vec<_>>(),
            "SUBP_TPAREMV_UNADJ_AL_FOREST" => g.iter().map(|g| g.tparemv).collect::<Vec<_>>(),
        ]
        .unwrap()
    }

    pub fn grm_measures(&self, pick: impl Fn(&Grm) -> (Option<f64>, Option<f64>)) -> DataFrame {
        let g = &self.grm;
        df![
            "TRE_CN" => g.iter().map(|g| g.tre_cn.clone()).collect::<Vec<_>>(),
            "VOLCFNET" => g.iter().map(|g| pick(g).0).collect::<Vec<_>>(),
            "DRYBIO_AG" => g.iter().map(|g| pick(g).1).collect::<Vec<_>>(),
        ]
        .unwrap()
    }
}

/// Two plots in one stratum (EXPNS 100), each one full forest condition
/// holding one live 8" tree at 5 TPA
pub fn two_plot_db() -> FiaDb {
    FiaDb::new()
        .stratum("s1", 100.0)
        .plot("p1", "s1")
        .plot("p2", "s1")
        .cond(Cond::forest("p1", 1, 1.0))
        .cond(Cond::forest("p2", 1, 1.0))
        .tree(Tree::live("t1", "p1", 8.0, 5.0))
        .tree(Tree::live("t2", "p2", 8.0, 5.0))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
