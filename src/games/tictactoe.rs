//! 3x3 tic-tac-toe, 9 actions (§4.9).

use super::{guard_not_terminal, GameResult, GameState};
use anyhow::{bail, Result};

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2], [3, 4, 5], [6, 7, 8],
    [0, 3, 6], [1, 4, 7], [2, 5, 8],
    [0, 4, 8], [2, 4, 6],
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicTacToe {
    board: [i8; 9],
    to_play: i8,
}

impl TicTacToe {
    /// Reconstructs a state from a raw board, for serving ad hoc move
    /// requests against a caller-supplied position.
    pub fn from_board(board: [i8; 9], to_play: i8) -> Self {
        Self { board, to_play }
    }

    fn winner(&self) -> Option<i8> {
        LINES
            .iter()
            .map(|line| line.map(|i| self.board[i]))
            .find(|cells| cells[0] != 0 && cells[0] == cells[1] && cells[1] == cells[2])
            .map(|cells| cells[0])
    }
}

impl GameState for TicTacToe {
    fn initial() -> Self {
        Self { board: [0; 9], to_play: 1 }
    }

    fn to_play(&self) -> i8 {
        self.to_play
    }

    fn legal_actions(&self) -> Vec<usize> {
        if self.is_terminal() {
            return Vec::new();
        }
        (0..9).filter(|&i| self.board[i] == 0).collect()
    }

    fn apply_action(&self, action: usize) -> Result<Self> {
        guard_not_terminal(self)?;
        if action >= 9 || self.board[action] != 0 {
            bail!("illegal action {action}");
        }
        let mut board = self.board;
        board[action] = self.to_play;
        Ok(Self { board, to_play: -self.to_play })
    }

    fn result(&self) -> GameResult {
        match self.winner() {
            Some(1) => GameResult::P1Win,
            Some(-1) => GameResult::P2Win,
            _ if self.board.iter().all(|&c| c != 0) => GameResult::Draw,
            _ => GameResult::Ongoing,
        }
    }

    fn action_size() -> usize {
        9
    }

    fn board_dims() -> (usize, usize) {
        (3, 3)
    }

    fn planes(&self) -> Vec<f32> {
        let mine: Vec<f32> = self.board.iter().map(|&c| (c == self.to_play) as i32 as f32).collect();
        let theirs: Vec<f32> = self.board.iter().map(|&c| (c == -self.to_play) as i32 as f32).collect();
        let turn = vec![1.0f32; 9];
        [mine, theirs, turn].concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_win_scenario() {
        let mut state = TicTacToe::initial();
        for action in [0, 3, 1, 4, 2] {
            state = state.apply_action(action).unwrap();
        }
        assert_eq!(state.result(), GameResult::P1Win);
    }

    #[test]
    fn terminal_has_no_legal_actions() {
        let mut state = TicTacToe::initial();
        for action in [0, 3, 1, 4, 2] {
            state = state.apply_action(action).unwrap();
        }
        assert!(state.legal_actions().is_empty());
        assert!(state.apply_action(5).is_err());
    }

    #[test]
    fn apply_action_is_clone_consistent() {
        let s0 = TicTacToe::initial();
        let s1 = s0.clone().apply_action(4).unwrap();
        let s2 = TicTacToe::initial().apply_action(4).unwrap();
        assert_eq!(s1, s2);
    }
}
