pub mod expr;
pub mod kernels;

pub use expr::{BinaryOp, Context, Expr, RollingOp, UnaryOp};
