//! Evaluation (EVALID) selection
//!
//! An EVALID (`SSYYTT`: state, 2-digit year, type) selects one statistically
//! coherent set of plots and stratum assignments. Estimates are always scoped
//! to an explicit selection; "most recent" is only ever chosen on request and
//! reported as a warning.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::data::{tables, TableSource};
use crate::error::{EstimationWarning, FiaError, Result};
use crate::utils::columns::{i64_values, i64_values_or_null, key_values, str_values};
use crate::utils::lazy_helpers::{materialize_with_columns, ColumnRequest};

/// Six-digit evaluation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct EvalId(u32);

impl EvalId {
    pub fn new(code: i64) -> Result<Self> {
        if (10_000..=999_999).contains(&code) {
            Ok(EvalId(code as u32))
        } else {
            Err(FiaError::InvalidEvalId(code.to_string()))
        }
    }

    pub fn code(self) -> i64 {
        self.0 as i64
    }

    /// STATECD
    pub fn state(self) -> i64 {
        (self.0 / 10_000) as i64
    }

    /// Four-digit evaluation year
    pub fn year(self) -> i64 {
        2000 + ((self.0 / 100) % 100) as i64
    }

    /// Trailing type digits (00 all area, 01 volume/current area, 03 change/GRM ...)
    pub fn type_code(self) -> i64 {
        (self.0 % 100) as i64
    }
}

impl fmt::Display for EvalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

impl FromStr for EvalId {
    type Err = FiaError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.len() != 6 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FiaError::InvalidEvalId(s.to_string()));
        }
        let code: i64 = trimmed
            .parse()
            .map_err(|_| FiaError::InvalidEvalId(s.to_string()))?;
        EvalId::new(code)
    }
}

impl TryFrom<i64> for EvalId {
    type Error = FiaError;

    fn try_from(code: i64) -> Result<Self> {
        EvalId::new(code)
    }
}

impl From<EvalId> for i64 {
    fn from(id: EvalId) -> i64 {
        id.code()
    }
}

/// POP_EVAL_TYP.EVAL_TYP values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalType {
    ExpAll,
    ExpCurr,
    ExpVol,
    ExpGrow,
    ExpMort,
    ExpRemv,
    ExpChng,
    ExpDwm,
    ExpInv,
}

impl EvalType {
    pub fn tag(self) -> &'static str {
        match self {
            EvalType::ExpAll => "EXPALL",
            EvalType::ExpCurr => "EXPCURR",
            EvalType::ExpVol => "EXPVOL",
            EvalType::ExpGrow => "EXPGROW",
            EvalType::ExpMort => "EXPMORT",
            EvalType::ExpRemv => "EXPREMV",
            EvalType::ExpChng => "EXPCHNG",
            EvalType::ExpDwm => "EXPDWM",
            EvalType::ExpInv => "EXPINV",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let t = tag.trim().to_ascii_uppercase();
        let ty = match t.as_str() {
            "EXPALL" => EvalType::ExpAll,
            "EXPCURR" => EvalType::ExpCurr,
            "EXPVOL" => EvalType::ExpVol,
            "EXPGROW" => EvalType::ExpGrow,
            "EXPMORT" => EvalType::ExpMort,
            "EXPREMV" => EvalType::ExpRemv,
            "EXPCHNG" => EvalType::ExpChng,
            "EXPDWM" => EvalType::ExpDwm,
            "EXPINV" => EvalType::ExpInv,
            _ => return None,
        };
        Some(ty)
    }

    /// Types implied by the EVALID type digits when POP_EVAL_TYP is absent
    fn implied_by_code(type_code: i64) -> &'static [EvalType] {
        match type_code {
            0 => &[EvalType::ExpAll],
            1 => &[EvalType::ExpCurr, EvalType::ExpVol],
            3 => &[EvalType::ExpChng, EvalType::ExpGrow, EvalType::ExpMort, EvalType::ExpRemv],
            7 => &[EvalType::ExpDwm],
            9 => &[EvalType::ExpInv],
            _ => &[],
        }
    }
}

impl fmt::Display for EvalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One POP_EVAL row with its evaluation types
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    pub evalid: EvalId,
    pub statecd: i64,
    pub end_invyr: i64,
    pub eval_types: Vec<EvalType>,
}

/// Read POP_EVAL (and POP_EVAL_TYP when present)
pub fn load_evaluations<S: TableSource + ?Sized>(source: &S) -> Result<Vec<EvaluationRecord>> {
    let mut request = ColumnRequest::new(["CN", "EVALID"]);
    request.optional("STATECD").optional("END_INVYR");
    let pop_eval = materialize_with_columns(source, tables::POP_EVAL, &request, "evaluation")?;

    let cns = key_values(&pop_eval, "CN")?;
    let evalids = i64_values(&pop_eval, "EVALID")?;
    let states = i64_values_or_null(&pop_eval, "STATECD")?;
    let end_years = i64_values_or_null(&pop_eval, "END_INVYR")?;

    // EVAL_CN -> types
    let mut types_by_eval: FxHashMap<String, Vec<EvalType>> = FxHashMap::default();
    let has_types = source.has_table(tables::POP_EVAL_TYP);
    if has_types {
        let typ_request = ColumnRequest::new(["EVAL_CN", "EVAL_TYP"]);
        let typ = materialize_with_columns(source, tables::POP_EVAL_TYP, &typ_request, "evaluation")?;
        let eval_cns = key_values(&typ, "EVAL_CN")?;
        let tags = str_values(&typ, "EVAL_TYP")?;
        for (cn, tag) in eval_cns.into_iter().zip(tags) {
            if let (Some(cn), Some(ty)) = (cn, tag.as_deref().and_then(EvalType::from_tag)) {
                let entry = types_by_eval.entry(cn).or_default();
                if !entry.contains(&ty) {
                    entry.push(ty);
                }
            }
        }
    }

    let mut records = Vec::with_capacity(pop_eval.height());
    for i in 0..pop_eval.height() {
        let Some(code) = evalids[i] else { continue };
        let evalid = EvalId::new(code)?;
        let eval_types = match (&cns[i], has_types) {
            (Some(cn), true) => types_by_eval.get(cn).cloned().unwrap_or_default(),
            _ => EvalType::implied_by_code(evalid.type_code()).to_vec(),
        };
        records.push(EvaluationRecord {
            evalid,
            statecd: states[i].unwrap_or_else(|| evalid.state()),
            end_invyr: end_years[i].unwrap_or_else(|| evalid.year()),
            eval_types,
        });
    }
    Ok(records)
}

/// Evaluations of `eval_type`, optionally restricted to one state
pub fn find_evalids<S: TableSource + ?Sized>(
    source: &S,
    state: Option<i64>,
    eval_type: EvalType,
) -> Result<Vec<EvaluationRecord>> {
    let mut found: Vec<EvaluationRecord> = load_evaluations(source)?
        .into_iter()
        .filter(|r| state.map_or(true, |s| r.statecd == s))
        .filter(|r| r.eval_types.contains(&eval_type))
        .collect();
    found.sort_by_key(|r| (r.statecd, r.end_invyr, r.evalid));
    Ok(found)
}

/// Most recent evaluation of `eval_type` per state
///
/// Per state the evaluation with the greatest END_INVYR wins (ties go to the
/// greatest EVALID). A state without the requested type falls back to its
/// most recent EXPALL evaluation, reported as `NoMatchingEvaluation`.
pub fn most_recent<S: TableSource + ?Sized>(
    source: &S,
    states: Option<&[i64]>,
    eval_type: EvalType,
) -> Result<(Vec<EvalId>, Vec<EstimationWarning>)> {
    let records = load_evaluations(source)?;
    let mut all_states: Vec<i64> = records.iter().map(|r| r.statecd).collect();
    all_states.sort_unstable();
    all_states.dedup();
    let wanted: Vec<i64> = match states {
        Some(list) => list.to_vec(),
        None => all_states,
    };

    let pick = |state: i64, ty: EvalType| -> Option<EvalId> {
        records
            .iter()
            .filter(|r| r.statecd == state && r.eval_types.contains(&ty))
            .max_by_key(|r| (r.end_invyr, r.evalid))
            .map(|r| r.evalid)
    };

    let mut selected = Vec::new();
    let mut warnings = Vec::new();
    for state in wanted {
        if let Some(id) = pick(state, eval_type) {
            selected.push(id);
        } else if let Some(id) = pick(state, EvalType::ExpAll) {
            warnings.push(
                EstimationWarning::NoMatchingEvaluation {
                    detail: format!(
                        "state {} has no {} evaluation; falling back to EXPALL evaluation {}",
                        state, eval_type, id
                    ),
                }
                .emit(),
            );
            selected.push(id);
        } else {
            warnings.push(
                EstimationWarning::NoMatchingEvaluation {
                    detail: format!("state {} has no {} or EXPALL evaluation", state, eval_type),
                }
                .emit(),
            );
        }
    }

    if selected.is_empty() {
        return Err(FiaError::NoEvaluationSelected);
    }
    selected.sort();
    tracing::info!(
        "most recent {} evaluation(s): {}",
        eval_type,
        selected.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
    );
    Ok((selected, warnings))
}
