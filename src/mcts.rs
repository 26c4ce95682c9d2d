//! PUCT tree search with Dirichlet root exploration (§4.10).

use crate::games::GameState;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Gamma};
use std::collections::HashMap;

pub const DIRICHLET_EPS: f64 = 0.25;
const C_PUCT: f64 = 1.5;

/// `alpha=0.3` for the small games (tic-tac-toe, connect-4), `0.15` for
/// Othello's larger action space.
pub fn dirichlet_alpha_for(action_size: usize) -> f64 {
    if action_size > 50 { 0.15 } else { 0.3 }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub prior: f64,
    pub to_play: i8,
    pub n: u32,
    pub w: f64,
    pub children: HashMap<usize, Node>,
    pub is_expanded: bool,
}

impl Node {
    fn leaf(prior: f64, to_play: i8) -> Self {
        Self { prior, to_play, n: 0, w: 0.0, children: HashMap::new(), is_expanded: false }
    }

    pub fn q(&self) -> f64 {
        if self.n == 0 { 0.5 } else { self.w / self.n as f64 }
    }
}

/// Evaluator contract: legal-masked softmax policy logits, a scalar value
/// in `[0,1]` from the evaluated state's own `to_play` perspective, and an
/// opaque latent embedding (passed through, not interpreted by MCTS).
pub trait Evaluator<G: GameState> {
    fn evaluate(&self, state: &G) -> (Vec<f64>, f64, Vec<f64>);
}

fn masked_softmax(logits: &[f64], legal: &[usize]) -> HashMap<usize, f64> {
    let max_logit = legal.iter().map(|&a| logits[a]).fold(f64::NEG_INFINITY, f64::max);
    let exps: HashMap<usize, f64> = legal
        .iter()
        .map(|&a| (a, (logits[a] - max_logit).exp()))
        .collect();
    let sum: f64 = exps.values().sum();
    exps.into_iter().map(|(a, e)| (a, e / sum)).collect()
}

fn sample_dirichlet(rng: &mut SmallRng, alpha: f64, k: usize) -> Vec<f64> {
    let gamma = Gamma::new(alpha, 1.0).expect("valid dirichlet alpha");
    let draws: Vec<f64> = (0..k).map(|_| gamma.sample(rng)).collect();
    let sum: f64 = draws.iter().sum();
    if sum <= 0.0 {
        vec![1.0 / k as f64; k]
    } else {
        draws.into_iter().map(|d| d / sum).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub simulations_done: usize,
    pub visits: HashMap<usize, u32>,
    pub q_values: HashMap<usize, f64>,
    pub policy: HashMap<usize, f64>,
}

pub struct Mcts<G: GameState> {
    pub root: Node,
    root_state: G,
}

impl<G: GameState> Mcts<G> {
    /// Constructs the root with the to-play player and `prior=1`, mixes in
    /// Dirichlet noise over the legal actions weighted by `dirichlet_eps`.
    pub fn new(state: G, evaluator: &impl Evaluator<G>, rng: &mut SmallRng) -> Self {
        let mut root = Node::leaf(1.0, state.to_play());
        expand(&mut root, &state, evaluator, Some(rng));
        Self { root, root_state: state }
    }

    /// Runs `n_sims` simulations, strictly serial (no virtual loss).
    /// `emit_every = Some(k)` emits a read-only snapshot after every `k`
    /// simulations; snapshots never mutate shared state.
    pub fn run(
        &mut self,
        evaluator: &impl Evaluator<G>,
        n_sims: usize,
        emit_every: Option<usize>,
        mut on_snapshot: impl FnMut(Snapshot),
    ) {
        for i in 1..=n_sims {
            simulate(&mut self.root, self.root_state.clone(), evaluator);
            if let Some(k) = emit_every
                && k > 0 && i % k == 0 {
                    on_snapshot(self.snapshot(i));
                }
        }
    }

    fn snapshot(&self, simulations_done: usize) -> Snapshot {
        let visits: HashMap<usize, u32> = self.root.children.iter().map(|(a, c)| (*a, c.n)).collect();
        let q_values: HashMap<usize, f64> = self.root.children.iter().map(|(a, c)| (*a, c.q())).collect();
        let policy = visit_policy(&self.root, 1.0);
        Snapshot { simulations_done, visits, q_values, policy }
    }

    /// Visit-count normalised policy. `temperature <= 1e-8` yields a
    /// one-hot on the argmax action; otherwise `pi ~ N^(1/t)`.
    pub fn policy(&self, temperature: f64) -> HashMap<usize, f64> {
        visit_policy(&self.root, temperature)
    }
}

fn visit_policy(root: &Node, temperature: f64) -> HashMap<usize, f64> {
    if root.children.is_empty() {
        return HashMap::new();
    }
    if temperature <= 1e-8 {
        let best = root
            .children
            .iter()
            .max_by_key(|(_, c)| c.n)
            .map(|(a, _)| *a)
            .unwrap();
        return [(best, 1.0)].into_iter().collect();
    }
    let powered: HashMap<usize, f64> = root
        .children
        .iter()
        .map(|(a, c)| (*a, (c.n as f64).powf(1.0 / temperature)))
        .collect();
    let sum: f64 = powered.values().sum();
    if sum <= 0.0 {
        let n = powered.len() as f64;
        powered.into_keys().map(|a| (a, 1.0 / n)).collect()
    } else {
        powered.into_iter().map(|(a, v)| (a, v / sum)).collect()
    }
}

fn expand<G: GameState>(
    node: &mut Node,
    state: &G,
    evaluator: &impl Evaluator<G>,
    root_rng: Option<&mut SmallRng>,
) -> f64 {
    if state.is_terminal() {
        node.is_expanded = true;
        return state.terminal_value(state.to_play());
    }
    let legal = state.legal_actions();
    let (logits, value, _latent) = evaluator.evaluate(state);
    let mut priors = masked_softmax(&logits, &legal);

    if let Some(rng) = root_rng {
        let alpha = dirichlet_alpha_for(G::action_size());
        let noise = sample_dirichlet(rng, alpha, legal.len());
        for (a, n) in legal.iter().zip(noise) {
            let p = priors.get(a).copied().unwrap_or(0.0);
            priors.insert(*a, (1.0 - DIRICHLET_EPS) * p + DIRICHLET_EPS * n);
        }
    }

    for &action in &legal {
        let child_state = state.apply_action(action).expect("legal action applies");
        node.children.insert(action, Node::leaf(priors[&action], child_state.to_play()));
    }
    node.is_expanded = true;
    value
}

fn select_action(node: &Node) -> usize {
    let parent_n = (node.n as f64).sqrt();
    node.children
        .iter()
        .map(|(a, child)| {
            let score = (1.0 - child.q()) + C_PUCT * child.prior * parent_n / (1.0 + child.n as f64);
            (*a, score)
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(a, _)| a)
        .expect("expanded node has children")
}

fn simulate<G: GameState>(node: &mut Node, state: G, evaluator: &impl Evaluator<G>) -> f64 {
    if !node.is_expanded {
        let v = expand(node, &state, evaluator, None);
        node.n += 1;
        node.w += v;
        return v;
    }
    if state.is_terminal() {
        let v = state.terminal_value(state.to_play());
        node.n += 1;
        node.w += v;
        return v;
    }
    let action = select_action(node);
    let child_state = state.apply_action(action).expect("legal action applies");
    let child = node.children.get_mut(&action).expect("selected child exists");
    let v = simulate(child, child_state, evaluator);
    let flipped = 1.0 - v;
    node.n += 1;
    node.w += flipped;
    flipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::tictactoe::TicTacToe;
    use rand::SeedableRng;

    struct UniformEvaluator;
    impl Evaluator<TicTacToe> for UniformEvaluator {
        fn evaluate(&self, _state: &TicTacToe) -> (Vec<f64>, f64, Vec<f64>) {
            (vec![0.0; TicTacToe::action_size()], 0.5, vec![0.0; 8])
        }
    }

    #[test]
    fn policy_mask_scenario() {
        let mut state = TicTacToe::initial();
        state = state.apply_action(0).unwrap(); // X
        state = state.apply_action(1).unwrap(); // O
        let legal: std::collections::HashSet<usize> = state.legal_actions().into_iter().collect();

        let mut rng = SmallRng::seed_from_u64(5);
        let mut mcts = Mcts::new(state, &UniformEvaluator, &mut rng);
        mcts.run(&UniformEvaluator, 50, None, |_| {});
        let pi = mcts.policy(1.0);

        let sum: f64 = pi.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        for (a, p) in &pi {
            assert!(legal.contains(a), "action {a} has prob {p} but is illegal");
        }
    }

    #[test]
    fn temperature_zero_is_one_hot() {
        let state = TicTacToe::initial();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut mcts = Mcts::new(state, &UniformEvaluator, &mut rng);
        mcts.run(&UniformEvaluator, 20, None, |_| {});
        let pi = mcts.policy(0.0);
        assert_eq!(pi.values().filter(|&&v| v == 1.0).count(), 1);
    }
}
