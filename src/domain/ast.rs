//! Domain expression tree and its polars compilation

use std::collections::BTreeSet;

use polars::prelude::{col, lit, Expr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// Operator with operands swapped (`5 < DIA` is `DIA > 5`)
    pub fn flipped(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::NotEq => CompareOp::NotEq,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Literal {
    fn to_polars(&self) -> Expr {
        match self {
            Literal::Int(v) => lit(*v),
            Literal::Float(v) => lit(*v),
            Literal::Str(v) => lit(v.clone()),
            Literal::Bool(v) => lit(*v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(Literal),
}

impl Operand {
    fn to_polars(&self) -> Expr {
        match self {
            Operand::Column(name) => col(name.as_str()),
            Operand::Literal(value) => value.to_polars(),
        }
    }
}

/// Typed domain expression
#[derive(Debug, Clone, PartialEq)]
pub enum DomainExpr {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    InList {
        operand: Operand,
        values: Vec<Literal>,
        negated: bool,
    },
    Between {
        operand: Operand,
        low: Operand,
        high: Operand,
        negated: bool,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    And(Box<DomainExpr>, Box<DomainExpr>),
    Or(Box<DomainExpr>, Box<DomainExpr>),
    Not(Box<DomainExpr>),
}

impl DomainExpr {
    pub fn compare(column: &str, op: CompareOp, value: Literal) -> Self {
        DomainExpr::Compare {
            left: Operand::Column(column.to_string()),
            op,
            right: Operand::Literal(value),
        }
    }

    pub fn eq_int(column: &str, value: i64) -> Self {
        Self::compare(column, CompareOp::Eq, Literal::Int(value))
    }

    pub fn in_ints(column: &str, values: &[i64]) -> Self {
        DomainExpr::InList {
            operand: Operand::Column(column.to_string()),
            values: values.iter().map(|v| Literal::Int(*v)).collect(),
            negated: false,
        }
    }

    pub fn in_strs(column: &str, values: &[&str]) -> Self {
        DomainExpr::InList {
            operand: Operand::Column(column.to_string()),
            values: values.iter().map(|v| Literal::Str(v.to_string())).collect(),
            negated: false,
        }
    }

    pub fn is_not_null(column: &str) -> Self {
        DomainExpr::IsNull {
            operand: Operand::Column(column.to_string()),
            negated: true,
        }
    }

    pub fn and(self, rhs: DomainExpr) -> Self {
        DomainExpr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: DomainExpr) -> Self {
        DomainExpr::Or(Box::new(self), Box::new(rhs))
    }

    pub fn negate(self) -> Self {
        DomainExpr::Not(Box::new(self))
    }

    /// AND together optional parts; `None` when every part is absent
    pub fn all(parts: impl IntoIterator<Item = Option<DomainExpr>>) -> Option<DomainExpr> {
        parts
            .into_iter()
            .flatten()
            .reduce(|acc, next| acc.and(next))
    }

    /// Column names referenced anywhere in the expression
    pub fn columns(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        self.collect_columns(&mut set);
        set
    }

    fn collect_columns(&self, set: &mut BTreeSet<String>) {
        let mut operand = |o: &Operand| {
            if let Operand::Column(name) = o {
                set.insert(name.clone());
            }
        };
        match self {
            DomainExpr::Compare { left, right, .. } => {
                operand(left);
                operand(right);
            }
            DomainExpr::InList { operand: o, .. } | DomainExpr::IsNull { operand: o, .. } => {
                operand(o)
            }
            DomainExpr::Between { operand: o, low, high, .. } => {
                operand(o);
                operand(low);
                operand(high);
            }
            DomainExpr::And(lhs, rhs) | DomainExpr::Or(lhs, rhs) => {
                lhs.collect_columns(set);
                rhs.collect_columns(set);
            }
            DomainExpr::Not(inner) => inner.collect_columns(set),
        }
    }

    /// Rewrite column references through `resolve` (case normalisation)
    pub(crate) fn resolve_columns<F>(self, resolve: &F) -> Result<DomainExpr, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fix = |o: Operand| -> Result<Operand, String> {
            match o {
                Operand::Column(name) => resolve(&name)
                    .map(Operand::Column)
                    .ok_or_else(|| format!("unknown column '{}'", name)),
                lit => Ok(lit),
            }
        };
        Ok(match self {
            DomainExpr::Compare { left, op, right } => DomainExpr::Compare {
                left: fix(left)?,
                op,
                right: fix(right)?,
            },
            DomainExpr::InList { operand, values, negated } => DomainExpr::InList {
                operand: fix(operand)?,
                values,
                negated,
            },
            DomainExpr::Between { operand, low, high, negated } => DomainExpr::Between {
                operand: fix(operand)?,
                low: fix(low)?,
                high: fix(high)?,
                negated,
            },
            DomainExpr::IsNull { operand, negated } => DomainExpr::IsNull {
                operand: fix(operand)?,
                negated,
            },
            DomainExpr::And(lhs, rhs) => DomainExpr::And(
                Box::new(lhs.resolve_columns(resolve)?),
                Box::new(rhs.resolve_columns(resolve)?),
            ),
            DomainExpr::Or(lhs, rhs) => DomainExpr::Or(
                Box::new(lhs.resolve_columns(resolve)?),
                Box::new(rhs.resolve_columns(resolve)?),
            ),
            DomainExpr::Not(inner) => DomainExpr::Not(Box::new(inner.resolve_columns(resolve)?)),
        })
    }

    /// Compile to a polars boolean expression (SQL null semantics: a null
    /// comparison is neither true nor false, and filters drop it)
    pub fn to_polars(&self) -> Expr {
        match self {
            DomainExpr::Compare { left, op, right } => {
                let (l, r) = (left.to_polars(), right.to_polars());
                match op {
                    CompareOp::Eq => l.eq(r),
                    CompareOp::NotEq => l.neq(r),
                    CompareOp::Lt => l.lt(r),
                    CompareOp::LtEq => l.lt_eq(r),
                    CompareOp::Gt => l.gt(r),
                    CompareOp::GtEq => l.gt_eq(r),
                }
            }
            DomainExpr::InList { operand, values, negated } => {
                let target = operand.to_polars();
                let any = values
                    .iter()
                    .map(|v| target.clone().eq(v.to_polars()))
                    .reduce(|acc, next| acc.or(next))
                    .unwrap_or_else(|| lit(false));
                if *negated {
                    any.not()
                } else {
                    any
                }
            }
            DomainExpr::Between { operand, low, high, negated } => {
                let target = operand.to_polars();
                let within = target
                    .clone()
                    .gt_eq(low.to_polars())
                    .and(target.lt_eq(high.to_polars()));
                if *negated {
                    within.not()
                } else {
                    within
                }
            }
            DomainExpr::IsNull { operand, negated } => {
                if *negated {
                    operand.to_polars().is_not_null()
                } else {
                    operand.to_polars().is_null()
                }
            }
            DomainExpr::And(lhs, rhs) => lhs.to_polars().and(rhs.to_polars()),
            DomainExpr::Or(lhs, rhs) => lhs.to_polars().or(rhs.to_polars()),
            DomainExpr::Not(inner) => inner.to_polars().not(),
        }
    }
}
