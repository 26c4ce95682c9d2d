//! Seeded random tree synthesis and parameter mutation (§4.6 stage-agnostic
//! helper for the search optimizer's screen/mutate stages).

use crate::dsl::{BinaryOp, Expr, RollingOp, UnaryOp};
use rand::Rng;
use rand::rngs::SmallRng;

const MAX_WINDOW: usize = 60;
const MIN_WINDOW: usize = 2;

fn random_field(rng: &mut SmallRng, fields: &[&str]) -> Expr {
    let name = fields[rng.random_range(0..fields.len())];
    Expr::Field(name.to_string())
}

fn random_unary(rng: &mut SmallRng) -> UnaryOp {
    match rng.random_range(0..5) {
        0 => UnaryOp::Neg,
        1 => UnaryOp::Abs,
        2 => UnaryOp::Ln,
        3 => UnaryOp::Sqrt,
        _ => UnaryOp::Sign,
    }
}

fn random_binary(rng: &mut SmallRng) -> BinaryOp {
    match rng.random_range(0..4) {
        0 => BinaryOp::Add,
        1 => BinaryOp::Sub,
        2 => BinaryOp::Mul,
        _ => BinaryOp::Div,
    }
}

fn random_rolling(rng: &mut SmallRng) -> RollingOp {
    match rng.random_range(0..5) {
        0 => RollingOp::Sma,
        1 => RollingOp::Std,
        2 => RollingOp::Min,
        3 => RollingOp::Max,
        _ => RollingOp::Ema,
    }
}

fn random_window(rng: &mut SmallRng) -> usize {
    rng.random_range(MIN_WINDOW..=MAX_WINDOW)
}

/// Builds a random expression tree up to `max_depth`, drawing fields from
/// `fields` and leaning toward leaves as depth runs out so trees terminate.
pub fn random_tree(rng: &mut SmallRng, max_depth: usize, fields: &[&str]) -> Expr {
    if max_depth == 0 || rng.random_bool(0.25) {
        return if rng.random_bool(0.85) {
            random_field(rng, fields)
        } else {
            Expr::Const(rng.random_range(-5.0..5.0))
        };
    }
    match rng.random_range(0..4) {
        0 => Expr::Unary(random_unary(rng), Box::new(random_tree(rng, max_depth - 1, fields))),
        1 => Expr::Binary(
            random_binary(rng),
            Box::new(random_tree(rng, max_depth - 1, fields)),
            Box::new(random_tree(rng, max_depth - 1, fields)),
        ),
        2 => Expr::Rolling(
            random_rolling(rng),
            Box::new(random_tree(rng, max_depth - 1, fields)),
            random_window(rng),
        ),
        _ => {
            let slow = rng.random_range(0.01..0.2);
            let fast = rng.random_range(slow..0.9);
            Expr::AdaptiveSmooth(Box::new(random_tree(rng, max_depth - 1, fields)), fast, slow)
        }
    }
}

/// Parameter mutation: window/const/alpha jitter, or an at-most
/// depth-preserving subtree replace. Returns a structurally new tree;
/// callers accept the mutation only on strict score improvement (§4.6).
pub fn mutate(rng: &mut SmallRng, expr: &Expr, fields: &[&str]) -> Expr {
    match expr {
        Expr::Field(_) | Expr::Const(_) => {
            if rng.random_bool(0.5) {
                random_field(rng, fields)
            } else {
                Expr::Const(rng.random_range(-5.0..5.0))
            }
        }
        Expr::Unary(op, child) => {
            if rng.random_bool(0.5) {
                Expr::Unary(random_unary(rng), child.clone())
            } else {
                Expr::Unary(*op, Box::new(mutate(rng, child, fields)))
            }
        }
        Expr::Binary(op, l, r) => {
            if rng.random_bool(0.5) {
                Expr::Binary(*op, Box::new(mutate(rng, l, fields)), r.clone())
            } else {
                Expr::Binary(*op, l.clone(), Box::new(mutate(rng, r, fields)))
            }
        }
        Expr::Rolling(op, child, window) => {
            if rng.random_bool(0.6) {
                let jitter = rng.random_range(-5i64..=5).max(1 - *window as i64);
                let new_window = ((*window as i64 + jitter).max(MIN_WINDOW as i64) as usize).min(MAX_WINDOW);
                Expr::Rolling(*op, child.clone(), new_window)
            } else {
                Expr::Rolling(*op, Box::new(mutate(rng, child, fields)), *window)
            }
        }
        Expr::AdaptiveSmooth(child, fast, slow) => {
            if rng.random_bool(0.6) {
                let jitter_fast = (rng.random_range(-0.05..0.05) + fast).clamp(*slow, 0.95);
                let jitter_slow = (rng.random_range(-0.02..0.02) + slow).clamp(0.001, jitter_fast);
                Expr::AdaptiveSmooth(child.clone(), jitter_fast, jitter_slow)
            } else {
                Expr::AdaptiveSmooth(Box::new(mutate(rng, child, fields)), *fast, *slow)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn random_tree_is_deterministic_per_seed() {
        let fields = ["close", "volume"];
        let mut a = SmallRng::seed_from_u64(7);
        let mut b = SmallRng::seed_from_u64(7);
        let t1 = random_tree(&mut a, 4, &fields);
        let t2 = random_tree(&mut b, 4, &fields);
        assert_eq!(t1.signature(), t2.signature());
    }

    #[test]
    fn mutation_produces_valid_tree() {
        let fields = ["close"];
        let mut rng = SmallRng::seed_from_u64(3);
        let base = random_tree(&mut rng, 3, &fields);
        let mutated = mutate(&mut rng, &base, &fields);
        assert!(mutated.complexity() >= 1);
    }
}
