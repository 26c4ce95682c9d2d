//! Trainer loop: self-play -> gradient step -> arena-gated promotion
//! (§4.11). Hard weight-restore on arena rejection is the resolved Open
//! Question (a) — no soft-blending.

use crate::games::GameState;
use crate::mcts::Evaluator;
use crate::model::{Net, Sample};
use crate::replay::{ReplayBuffer, ShardWriter, Source};
use crate::selfplay;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub selfplay_games_per_cycle: usize,
    pub train_steps_per_cycle: usize,
    pub promotion_interval: usize,
    pub promotion_games: usize,
    pub promotion_threshold: f64,
    pub batch_size: usize,
    pub default_sims: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            selfplay_games_per_cycle: 4,
            train_steps_per_cycle: 8,
            promotion_interval: 20,
            promotion_games: 20,
            promotion_threshold: 0.55,
            batch_size: 64,
            default_sims: 200,
        }
    }
}

struct NetEvaluator<'a>(&'a Net);
impl<'a, G: GameState> Evaluator<G> for NetEvaluator<'a> {
    fn evaluate(&self, state: &G) -> (Vec<f64>, f64, Vec<f64>) {
        self.0.forward(&state.planes())
    }
}

pub struct TrainingStats {
    pub cycles_completed: usize,
    pub train_steps: usize,
    pub promotions: usize,
    pub buffer_len: usize,
}

/// Runs the full per-game trainer loop until `cancel` is observed. Flushes
/// all disk shards before returning on cancel, consistent with §5's
/// cancellation semantics.
pub fn run_trainer<G: GameState>(
    config: &TrainerConfig,
    mut candidate: Net,
    mut buffer: ReplayBuffer,
    mut shards: ShardWriter,
    seed: u64,
    cancel: Arc<AtomicBool>,
) -> (Net, TrainingStats) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut stats = TrainingStats { cycles_completed: 0, train_steps: 0, promotions: 0, buffer_len: 0 };
    let mut incumbent = candidate.clone_weights();
    let min_batch = config.batch_size.min(32);

    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        for g in 0..config.selfplay_games_per_cycle {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let evaluator = NetEvaluator(&candidate);
            let samples = selfplay::play_game(
                G::initial(),
                &format!("cycle{}-game{g}", stats.cycles_completed),
                &evaluator,
                config.default_sims,
                &mut rng,
            );
            for sample in samples {
                shards.append(sample.clone()).ok();
                buffer.push(sample);
            }
        }

        if buffer.len() >= min_batch {
            for _ in 0..config.train_steps_per_cycle {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let batch: Vec<Sample> = buffer
                    .sample_batch(&mut rng, config.batch_size)
                    .into_iter()
                    .map(to_training_sample)
                    .collect();
                candidate.train_step(&batch);
                stats.train_steps += 1;
            }
        }

        stats.cycles_completed += 1;

        if stats.train_steps > 0 && stats.train_steps.is_multiple_of(config.promotion_interval) {
            let win_rate = run_arena::<G>(config, &candidate, &incumbent, &mut rng);
            if win_rate >= config.promotion_threshold {
                incumbent = candidate.clone_weights();
                stats.promotions += 1;
            } else {
                candidate = incumbent.clone_weights();
            }
        }
    }

    shards.flush().ok();
    stats.buffer_len = buffer.len();
    (candidate, stats)
}

fn to_training_sample(s: &crate::replay::ReplaySample) -> Sample {
    Sample {
        planes: s.state_planes.clone(),
        target_pi: s.target_pi.iter().map(|&v| v as f64).collect(),
        target_z: s.target_z as f64,
        atlas_target: s.atlas_target.as_ref().map(|v| {
            let mut out = [0.0; 8];
            for (o, x) in out.iter_mut().zip(v) {
                *o = *x as f64;
            }
            out
        }),
    }
}

/// `promotion_games` alternating-colour games at `min(200, default_sims)`;
/// win=1, draw=0.5; returns the candidate's win rate.
fn run_arena<G: GameState>(config: &TrainerConfig, candidate: &Net, incumbent: &Net, rng: &mut SmallRng) -> f64 {
    let sims = config.default_sims.min(200);
    let candidate_eval = NetEvaluator(candidate);
    let incumbent_eval = NetEvaluator(incumbent);
    let mut score = 0.0;

    for game_idx in 0..config.promotion_games {
        let candidate_is_p1 = game_idx % 2 == 0;
        let mut state = G::initial();
        while !state.is_terminal() {
            let candidate_turn = (state.to_play() == 1) == candidate_is_p1;
            let mut mcts = if candidate_turn {
                crate::mcts::Mcts::new(state.clone(), &candidate_eval, rng)
            } else {
                crate::mcts::Mcts::new(state.clone(), &incumbent_eval, rng)
            };
            if candidate_turn {
                mcts.run(&candidate_eval, sims, None, |_| {});
            } else {
                mcts.run(&incumbent_eval, sims, None, |_| {});
            }
            let pi = mcts.policy(0.0);
            let action = *pi.keys().next().expect("one-hot policy has exactly one action");
            state = state.apply_action(action).expect("mcts only selects legal actions");
        }
        let candidate_perspective = if candidate_is_p1 { 1 } else { -1 };
        score += state.terminal_value(candidate_perspective);
    }

    score / config.promotion_games as f64
}

/// Seeds the replay buffer from a static position corpus before self-play
/// begins; falls back to a tiny built-in corpus on any ingest failure
/// (§4.11 step 2, §9 supplemented atlas-seed behavior).
pub fn seed_from_atlas<G: GameState>(
    corpus: Result<Vec<([f64; 6], Vec<f32>, Vec<f32>, f32)>, anyhow::Error>,
) -> Vec<crate::replay::ReplaySample> {
    let rows = corpus.unwrap_or_else(|e| {
        log::warn!("atlas corpus ingest failed, falling back to built-in corpus: {e}");
        vec![(
            [0.0; 6],
            G::initial().planes(),
            vec![1.0 / G::action_size() as f32; G::action_size()],
            0.5,
        )]
    });
    rows.into_iter()
        .map(|(source, planes, pi, z)| crate::replay::ReplaySample {
            game_id: "atlas-seed".into(),
            state_planes: planes,
            target_pi: pi,
            target_z: z,
            ply: 0,
            source: Source::AtlasSeed,
            atlas_target: Some(
                crate::model::pad_atlas_embedding(source)
                    .into_iter()
                    .map(|v| v as f32)
                    .collect(),
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::tictactoe::TicTacToe;

    #[test]
    fn trainer_respects_cancellation() {
        let cancel = Arc::new(AtomicBool::new(true));
        let dir = std::env::temp_dir().join(format!("discovery-trainer-test-{}", std::process::id()));
        let shards = ShardWriter::new(&dir, 64).unwrap();
        let net = Net::new(27, 9, 1);
        let buffer = ReplayBuffer::new(1000);
        let config = TrainerConfig::default();
        let (_net, stats) = run_trainer::<TicTacToe>(&config, net, buffer, shards, 1, cancel);
        assert_eq!(stats.cycles_completed, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn atlas_seed_falls_back_on_ingest_failure() {
        let samples = seed_from_atlas::<TicTacToe>(Err(anyhow::anyhow!("missing corpus file")));
        assert_eq!(samples.len(), 1);
        assert!(samples[0].atlas_target.is_some());
    }
}
