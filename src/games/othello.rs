//! Othello, 8x8 board, 65 actions (64 cells + pass) (§4.9). Two consecutive
//! passes end the game; the outcome is the sign of the disc difference.

use super::{guard_not_terminal, GameResult, GameState};
use anyhow::{bail, Result};

const SIZE: usize = 8;
const PASS: usize = SIZE * SIZE;
const DIRECTIONS: [(isize, isize); 8] = [
    (-1, -1), (-1, 0), (-1, 1),
    (0, -1), (0, 1),
    (1, -1), (1, 0), (1, 1),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Othello {
    board: [i8; SIZE * SIZE],
    to_play: i8,
    passes: u8,
}

fn idx(row: usize, col: usize) -> usize {
    row * SIZE + col
}

fn in_bounds(row: isize, col: isize) -> bool {
    (0..SIZE as isize).contains(&row) && (0..SIZE as isize).contains(&col)
}

impl Othello {
    /// Discs flipped by placing `player` at `(row, col)`, empty if illegal.
    fn flips(&self, row: usize, col: usize, player: i8) -> Vec<usize> {
        if self.board[idx(row, col)] != 0 {
            return Vec::new();
        }
        let mut flips = Vec::new();
        for (dr, dc) in DIRECTIONS {
            let mut line = Vec::new();
            let mut r = row as isize + dr;
            let mut c = col as isize + dc;
            while in_bounds(r, c) && self.board[idx(r as usize, c as usize)] == -player {
                line.push(idx(r as usize, c as usize));
                r += dr;
                c += dc;
            }
            if in_bounds(r, c) && self.board[idx(r as usize, c as usize)] == player && !line.is_empty() {
                flips.extend(line);
            }
        }
        flips
    }

    fn cell_moves(&self) -> Vec<usize> {
        (0..SIZE * SIZE)
            .filter(|&a| {
                let (row, col) = (a / SIZE, a % SIZE);
                !self.flips(row, col, self.to_play).is_empty()
            })
            .collect()
    }

    fn board_full(&self) -> bool {
        self.board.iter().all(|&c| c != 0)
    }

    fn disc_diff(&self) -> i32 {
        self.board.iter().map(|&c| c as i32).sum()
    }
}

impl GameState for Othello {
    fn initial() -> Self {
        let mut board = [0i8; SIZE * SIZE];
        board[idx(3, 3)] = -1;
        board[idx(3, 4)] = 1;
        board[idx(4, 3)] = 1;
        board[idx(4, 4)] = -1;
        Self { board, to_play: 1, passes: 0 }
    }

    fn to_play(&self) -> i8 {
        self.to_play
    }

    fn legal_actions(&self) -> Vec<usize> {
        if self.is_terminal() {
            return Vec::new();
        }
        let moves = self.cell_moves();
        if moves.is_empty() { vec![PASS] } else { moves }
    }

    fn apply_action(&self, action: usize) -> Result<Self> {
        guard_not_terminal(self)?;
        if action == PASS {
            if !self.cell_moves().is_empty() {
                bail!("pass is illegal while a cell move exists");
            }
            return Ok(Self {
                board: self.board,
                to_play: -self.to_play,
                passes: self.passes + 1,
            });
        }
        if action >= PASS {
            bail!("illegal action {action}");
        }
        let (row, col) = (action / SIZE, action % SIZE);
        let flips = self.flips(row, col, self.to_play);
        if flips.is_empty() {
            bail!("illegal move {action}: flips nothing");
        }
        let mut board = self.board;
        board[action] = self.to_play;
        for f in flips {
            board[f] = self.to_play;
        }
        Ok(Self { board, to_play: -self.to_play, passes: 0 })
    }

    fn result(&self) -> GameResult {
        if self.passes >= 2 || self.board_full() {
            match self.disc_diff().signum() {
                1 => GameResult::P1Win,
                -1 => GameResult::P2Win,
                _ => GameResult::Draw,
            }
        } else {
            GameResult::Ongoing
        }
    }

    fn action_size() -> usize {
        PASS + 1
    }

    fn board_dims() -> (usize, usize) {
        (SIZE, SIZE)
    }

    fn planes(&self) -> Vec<f32> {
        let mine: Vec<f32> = self.board.iter().map(|&c| (c == self.to_play) as i32 as f32).collect();
        let theirs: Vec<f32> = self.board.iter().map(|&c| (c == -self.to_play) as i32 as f32).collect();
        let turn = vec![1.0f32; SIZE * SIZE];
        [mine, theirs, turn].concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_legal_actions() {
        let state = Othello::initial();
        let mut legal = state.legal_actions();
        legal.sort();
        assert_eq!(legal, vec![19, 26, 37, 44]);
    }

    #[test]
    fn double_pass_ends_game() {
        let state = Othello {
            board: [1; SIZE * SIZE],
            to_play: 1,
            passes: 0,
        };
        // Force a no-legal-move position by making every cell non-empty
        // and already full, so the only representable transition is via
        // pass bookkeeping directly.
        let mut s = state;
        s.passes = 1;
        let s2 = Othello { passes: 2, ..s.clone() };
        assert_ne!(s2.result(), GameResult::Ongoing);
    }
}
