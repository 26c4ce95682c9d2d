//! Self-play trajectory generation (§4.11).

use crate::games::GameState;
use crate::mcts::{Evaluator, Mcts};
use crate::replay::{ReplaySample, Source};
use rand::Rng;
use rand::rngs::SmallRng;

const TEMPERATURE_PLIES: u32 = 8;

struct PendingStep {
    planes: Vec<f32>,
    pi: Vec<f32>,
    to_play: i8,
    ply: u32,
}

/// Plays one game to completion: temperature=1 (sampled from pi) for the
/// first 8 plies, then temperature=0 (argmax). Backfills `target_z` for
/// every recorded sample once the terminal reward is known.
pub fn play_game<G: GameState>(
    initial: G,
    game_id: &str,
    evaluator: &impl Evaluator<G>,
    sims_per_move: usize,
    rng: &mut SmallRng,
) -> Vec<ReplaySample> {
    let mut state = initial;
    let mut steps = Vec::new();
    let mut ply = 0u32;

    while !state.is_terminal() {
        let mut mcts = Mcts::new(state.clone(), evaluator, rng);
        mcts.run(evaluator, sims_per_move, None, |_| {});
        let temperature = if ply < TEMPERATURE_PLIES { 1.0 } else { 0.0 };
        let pi = mcts.policy(temperature);

        let mut pi_vec = vec![0.0f32; G::action_size()];
        for (a, p) in &pi {
            pi_vec[*a] = *p as f32;
        }

        steps.push(PendingStep {
            planes: state.planes(),
            pi: pi_vec,
            to_play: state.to_play(),
            ply,
        });

        let action = sample_action(&pi, rng, temperature);
        state = state.apply_action(action).expect("mcts only selects legal actions");
        ply += 1;
    }

    steps
        .into_iter()
        .map(|step| ReplaySample {
            game_id: game_id.to_string(),
            state_planes: step.planes,
            target_pi: step.pi,
            target_z: state.terminal_value(step.to_play) as f32,
            ply: step.ply,
            source: Source::SelfPlay,
            atlas_target: None,
        })
        .collect()
}

fn sample_action(pi: &std::collections::HashMap<usize, f64>, rng: &mut SmallRng, temperature: f64) -> usize {
    if temperature <= 1e-8 {
        return *pi.iter().max_by(|a, b| a.1.partial_cmp(b.1).unwrap()).map(|(a, _)| a).expect("non-empty policy");
    }
    let roll: f64 = rng.random_range(0.0..1.0);
    let mut cumulative = 0.0;
    for (a, p) in pi {
        cumulative += p;
        if roll <= cumulative {
            return *a;
        }
    }
    *pi.keys().next().expect("non-empty policy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::tictactoe::TicTacToe;
    use rand::SeedableRng;

    struct UniformEvaluator;
    impl Evaluator<TicTacToe> for UniformEvaluator {
        fn evaluate(&self, _state: &TicTacToe) -> (Vec<f64>, f64, Vec<f64>) {
            (vec![0.0; TicTacToe::action_size()], 0.5, vec![0.0; 4])
        }
    }

    #[test]
    fn self_play_produces_backfilled_rewards() {
        let mut rng = SmallRng::seed_from_u64(9);
        let samples = play_game(TicTacToe::initial(), "game-1", &UniformEvaluator, 20, &mut rng);
        assert!(!samples.is_empty());
        for s in &samples {
            assert!((0.0..=1.0).contains(&s.target_z));
            assert_eq!(s.target_pi.len(), TicTacToe::action_size());
        }
    }
}
