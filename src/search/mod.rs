pub mod optimizer;

pub use optimizer::{run_funnel, Candidate, FunnelResult};
