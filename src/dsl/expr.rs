//! The expression tree: an immutable algebraic data type over bar-series
//! fields. `eval` is deterministic and pure given a context; `signature`
//! is a canonical pre-order string used for novelty-filter dedup.

use super::kernels;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DIV_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Abs,
    Ln,
    Sqrt,
    Sign,
}

impl UnaryOp {
    fn apply(self, v: f64) -> f64 {
        match self {
            UnaryOp::Neg => -v,
            UnaryOp::Abs => v.abs(),
            UnaryOp::Ln => v.ln(),
            UnaryOp::Sqrt => v.sqrt(),
            UnaryOp::Sign => v.signum(),
        }
    }

    fn tag(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Ln => "ln",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Sign => "sign",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / (b.abs() + DIV_EPS),
        }
    }

    fn tag(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollingOp {
    Sma,
    Std,
    Min,
    Max,
    Ema,
}

impl RollingOp {
    fn tag(self) -> &'static str {
        match self {
            RollingOp::Sma => "sma",
            RollingOp::Std => "std",
            RollingOp::Min => "min",
            RollingOp::Max => "max",
            RollingOp::Ema => "ema",
        }
    }

    fn apply(self, x: &[f64], window: usize) -> Vec<f64> {
        match self {
            RollingOp::Sma => kernels::sma(x, window),
            RollingOp::Std => kernels::std(x, window),
            RollingOp::Min => kernels::min(x, window),
            RollingOp::Max => kernels::max(x, window),
            RollingOp::Ema => kernels::ema(x, window),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Field(String),
    Const(f64),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Rolling(RollingOp, Box<Expr>, usize),
    AdaptiveSmooth(Box<Expr>, f64, f64),
}

/// Evaluation context: a fixed-length set of named float series (open,
/// high, low, close, volume, plus any derived fields a caller injects).
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub fields: BTreeMap<String, Vec<f64>>,
    pub len: usize,
}

impl Context {
    pub fn new(len: usize) -> Self {
        Self {
            fields: BTreeMap::new(),
            len,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, series: Vec<f64>) -> Self {
        assert_eq!(series.len(), self.len, "field length must match context length");
        self.fields.insert(name.into(), series);
        self
    }
}

impl Expr {
    /// Evaluate the raw (un-sanitised) tree. Callers doing a top-level
    /// evaluation should call `eval_sanitized` instead; recursive calls
    /// during evaluation of a parent node must stay raw, since
    /// sanitisation is a single pass applied once at the root (§4.1).
    pub fn eval_raw(&self, ctx: &Context) -> Vec<f64> {
        match self {
            Expr::Field(name) => ctx
                .fields
                .get(name)
                .cloned()
                .unwrap_or_else(|| vec![f64::NAN; ctx.len]),
            Expr::Const(v) => vec![*v; ctx.len],
            Expr::Unary(op, child) => {
                let x = child.eval_raw(ctx);
                x.into_iter().map(|v| op.apply(v)).collect()
            }
            Expr::Binary(op, left, right) => {
                let l = left.eval_raw(ctx);
                let r = right.eval_raw(ctx);
                l.into_iter()
                    .zip(r)
                    .map(|(a, b)| op.apply(a, b))
                    .collect()
            }
            Expr::Rolling(op, child, window) => {
                let x = child.eval_raw(ctx);
                op.apply(&x, (*window).max(1))
            }
            Expr::AdaptiveSmooth(child, fast, slow) => {
                let x = child.eval_raw(ctx);
                kernels::adaptive_smooth(&x, *fast, *slow)
            }
        }
    }

    /// Evaluate then sanitise the root output (§4.1).
    pub fn eval(&self, ctx: &Context) -> Vec<f64> {
        let mut out = self.eval_raw(ctx);
        kernels::sanitize(&mut out);
        out
    }

    /// Canonical pre-order signature, stable under structurally identical
    /// subtrees: `F:name`, `C<value>`, `U:op(child)`, `B:op(left,right)`,
    /// `R:op:w(child)`, `A:fast:slow(child)`.
    pub fn signature(&self) -> String {
        match self {
            Expr::Field(name) => format!("F:{}", name),
            Expr::Const(v) => format!("C{}", v),
            Expr::Unary(op, child) => format!("U:{}({})", op.tag(), child.signature()),
            Expr::Binary(op, l, r) => {
                format!("B:{}({},{})", op.tag(), l.signature(), r.signature())
            }
            Expr::Rolling(op, child, w) => {
                format!("R:{}:{}({})", op.tag(), w, child.signature())
            }
            Expr::AdaptiveSmooth(child, fast, slow) => {
                format!("A:{}:{}({})", fast, slow, child.signature())
            }
        }
    }

    /// Node count, used as a search-budget / mutation-depth guard.
    pub fn complexity(&self) -> usize {
        match self {
            Expr::Field(_) | Expr::Const(_) => 1,
            Expr::Unary(_, c) => 1 + c.complexity(),
            Expr::Binary(_, l, r) => 1 + l.complexity() + r.complexity(),
            Expr::Rolling(_, c, _) => 1 + c.complexity(),
            Expr::AdaptiveSmooth(c, _, _) => 1 + c.complexity(),
        }
    }

    /// Boundary-only one-to-one lookup into PineScript-like text; kept out
    /// of the evaluation core per §4.1.
    pub fn to_pine(&self) -> String {
        match self {
            Expr::Field(name) => name.clone(),
            Expr::Const(v) => v.to_string(),
            Expr::Unary(op, c) => format!("{}({})", op.tag(), c.to_pine()),
            Expr::Binary(op, l, r) => {
                let sym = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                };
                format!("({} {} {})", l.to_pine(), sym, r.to_pine())
            }
            Expr::Rolling(op, c, w) => format!("ta.{}({}, {})", op.tag(), c.to_pine(), w),
            Expr::AdaptiveSmooth(c, fast, slow) => {
                format!("adaptive({}, {}, {})", c.to_pine(), fast, slow)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new(5).with_field("close", vec![1.0, 2.0, 3.0, 4.0, 5.0])
    }

    #[test]
    fn signature_stable_across_evaluations() {
        let e = Expr::Rolling(RollingOp::Sma, Box::new(Expr::Field("close".into())), 3);
        assert_eq!(e.signature(), e.signature());
    }

    #[test]
    fn eval_deterministic() {
        let e = Expr::Binary(
            BinaryOp::Div,
            Box::new(Expr::Field("close".into())),
            Box::new(Expr::Const(2.0)),
        );
        let c = ctx();
        assert_eq!(e.eval(&c), e.eval(&c));
    }

    #[test]
    fn division_guards_near_zero() {
        let e = Expr::Binary(BinaryOp::Div, Box::new(Expr::Const(1.0)), Box::new(Expr::Const(0.0)));
        let out = e.eval(&Context::new(3));
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn complexity_counts_nodes() {
        let e = Expr::Unary(UnaryOp::Abs, Box::new(Expr::Field("close".into())));
        assert_eq!(e.complexity(), 2);
    }
}
