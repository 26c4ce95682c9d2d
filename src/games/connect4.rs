//! Connect-4, 6 rows x 7 columns, 7 actions (one per column) (§4.9).

use super::{guard_not_terminal, GameResult, GameState};
use anyhow::{bail, Result};

const ROWS: usize = 6;
const COLS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect4 {
    board: [i8; ROWS * COLS],
    to_play: i8,
}

fn idx(row: usize, col: usize) -> usize {
    row * COLS + col
}

impl Connect4 {
    fn column_height(&self, col: usize) -> usize {
        (0..ROWS).filter(|&r| self.board[idx(r, col)] != 0).count()
    }

    fn winner(&self) -> Option<i8> {
        let directions = [(0isize, 1isize), (1, 0), (1, 1), (1, -1)];
        for row in 0..ROWS as isize {
            for col in 0..COLS as isize {
                let player = self.board[idx(row as usize, col as usize)];
                if player == 0 {
                    continue;
                }
                for (dr, dc) in directions {
                    let run = (0..4).all(|k| {
                        let r = row + dr * k;
                        let c = col + dc * k;
                        r >= 0
                            && r < ROWS as isize
                            && c >= 0
                            && c < COLS as isize
                            && self.board[idx(r as usize, c as usize)] == player
                    });
                    if run {
                        return Some(player);
                    }
                }
            }
        }
        None
    }
}

impl GameState for Connect4 {
    fn initial() -> Self {
        Self { board: [0; ROWS * COLS], to_play: 1 }
    }

    fn to_play(&self) -> i8 {
        self.to_play
    }

    fn legal_actions(&self) -> Vec<usize> {
        if self.is_terminal() {
            return Vec::new();
        }
        (0..COLS).filter(|&c| self.column_height(c) < ROWS).collect()
    }

    fn apply_action(&self, action: usize) -> Result<Self> {
        guard_not_terminal(self)?;
        if action >= COLS {
            bail!("illegal column {action}");
        }
        let height = self.column_height(action);
        if height >= ROWS {
            bail!("column {action} is full");
        }
        let mut board = self.board;
        board[idx(height, action)] = self.to_play;
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
        COLS
    }

    fn board_dims() -> (usize, usize) {
        (ROWS, COLS)
    }

    fn planes(&self) -> Vec<f32> {
        let mine: Vec<f32> = self.board.iter().map(|&c| (c == self.to_play) as i32 as f32).collect();
        let theirs: Vec<f32> = self.board.iter().map(|&c| (c == -self.to_play) as i32 as f32).collect();
        let turn = vec![1.0f32; ROWS * COLS];
        [mine, theirs, turn].concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertical_win_scenario() {
        let mut state = Connect4::initial();
        for action in [0, 1, 0, 1, 0, 1, 0] {
            state = state.apply_action(action).unwrap();
        }
        assert_eq!(state.result(), GameResult::P1Win);
    }

    #[test]
    fn full_column_is_illegal() {
        let mut state = Connect4::initial();
        for _ in 0..6 {
            state = state.apply_action(0).unwrap();
        }
        assert!(state.apply_action(0).is_err());
    }
}
