pub mod connect4;
pub mod othello;
pub mod tictactoe;

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Ongoing,
    P1Win,
    P2Win,
    Draw,
}

/// Common contract for the three perfect-information games: board state,
/// legal moves, terminals, rewards (§4.9). States clone by value; no
/// shared mutable board references.
pub trait GameState: Clone {
    fn initial() -> Self;
    fn to_play(&self) -> i8;
    fn legal_actions(&self) -> Vec<usize>;
    fn apply_action(&self, action: usize) -> Result<Self>;
    fn result(&self) -> GameResult;
    fn is_terminal(&self) -> bool {
        self.result() != GameResult::Ongoing
    }
    /// 1.0 for a win from `perspective`'s point of view, 0.0 for a loss,
    /// 0.5 for a draw.
    fn terminal_value(&self, perspective: i8) -> f64 {
        match self.result() {
            GameResult::Ongoing => 0.5,
            GameResult::Draw => 0.5,
            GameResult::P1Win => {
                if perspective == 1 {
                    1.0
                } else {
                    0.0
                }
            }
            GameResult::P2Win => {
                if perspective == -1 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
    fn action_size() -> usize;
    fn board_dims() -> (usize, usize);
    fn action_to_board_coord(action: usize) -> (usize, usize) {
        let (_, cols) = Self::board_dims();
        (action / cols, action % cols)
    }
    /// Encodes the board as float32 planes for the network/MCTS evaluator.
    fn planes(&self) -> Vec<f32>;
}

pub(crate) fn guard_not_terminal<G: GameState>(state: &G) -> Result<()> {
    if state.is_terminal() {
        bail!("cannot act on a terminal state");
    }
    Ok(())
}
