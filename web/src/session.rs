//! Game session reconstruction and rules glue.
//!
//! A [`GameSession`] is the in-memory form of a stored [`SessionRecord`]:
//! the record plus a `chess::Game` rebuilt by replaying the stored move
//! history. Handles live in the engine pool and are looked up per request;
//! they are never part of the record, so any server instance can resume any
//! game.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use chess::{Board, ChessMove, Color, Game, GameResult, Piece, Square};
use session_store::SessionRecord;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("invalid or illegal move: {0}")]
    IllegalMove(String),
    #[error("no move to undo")]
    NoMoveToUndo,
    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

/// Terminal result from the user's point of view. The user always plays
/// White; the engine replies as Black.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    UserWins,
    EngineWins,
    Draw,
}

impl GameOutcome {
    pub fn result_string(&self) -> &'static str {
        match self {
            GameOutcome::UserWins => "1-0",
            GameOutcome::EngineWins => "0-1",
            GameOutcome::Draw => "1/2-1/2",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            GameOutcome::UserWins => "You win!",
            GameOutcome::EngineWins => "Engine wins!",
            GameOutcome::Draw => "It's a draw!",
        }
    }
}

/// One ongoing game: the persistable record plus the replayed position.
#[derive(Debug)]
pub struct GameSession {
    record: SessionRecord,
    game: Game,
}

impl GameSession {
    /// Start a fresh game at the given strength with a new game id.
    pub fn new(strength: u32) -> Self {
        let record = SessionRecord {
            game_id: Uuid::new_v4().to_string(),
            moves: Vec::new(),
            strength,
            last_active_at: unix_now(),
        };
        Self {
            record,
            game: Game::new(),
        }
    }

    /// Rebuild a session purely from its stored record by replaying the
    /// move history from the initial position.
    pub fn from_record(record: SessionRecord) -> Result<Self, GameError> {
        let mut game = Game::new();
        for (idx, uci) in record.moves.iter().enumerate() {
            let mv = parse_uci_move(&game.current_position(), uci)
                .map_err(|e| GameError::Corrupt(format!("half-move {}: {e}", idx + 1)))?;
            if !game.make_move(mv) {
                return Err(GameError::Corrupt(format!(
                    "half-move {} ({uci}) is not legal in its position",
                    idx + 1
                )));
            }
        }
        Ok(Self { record, game })
    }

    pub fn game_id(&self) -> &str {
        &self.record.game_id
    }

    pub fn strength(&self) -> u32 {
        self.record.strength
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn fen(&self) -> String {
        self.game.current_position().to_string()
    }

    pub fn turn(&self) -> &'static str {
        match self.game.side_to_move() {
            Color::White => "white",
            Color::Black => "black",
        }
    }

    pub fn move_count(&self) -> usize {
        self.record.moves.len()
    }

    /// Refresh the activity timestamp; called before every re-persist.
    pub fn touch(&mut self) {
        self.record.last_active_at = unix_now();
    }

    /// Apply one half-move in UCI notation. Rejects anything the rules
    /// collaborator considers illegal without touching the record.
    pub fn apply_move(&mut self, uci: &str) -> Result<(), GameError> {
        let mv = parse_uci_move(&self.game.current_position(), uci)
            .map_err(GameError::IllegalMove)?;
        if !self.game.make_move(mv) {
            return Err(GameError::IllegalMove(format!(
                "{uci} is not legal in this position"
            )));
        }
        self.record.moves.push(mv.to_string());
        Ok(())
    }

    /// Whether `uci` would be accepted in the current position.
    pub fn is_legal(&self, uci: &str) -> bool {
        parse_uci_move(&self.game.current_position(), uci).is_ok()
    }

    /// Terminal result of the current position, if any. Draws the players
    /// could declare (threefold repetition, fifty-move rule) count as
    /// terminal here since the engine opponent never plays on.
    pub fn outcome(&self) -> Option<GameOutcome> {
        if let Some(result) = self.game.result() {
            return Some(match result {
                GameResult::WhiteCheckmates | GameResult::BlackResigns => GameOutcome::UserWins,
                GameResult::BlackCheckmates | GameResult::WhiteResigns => GameOutcome::EngineWins,
                GameResult::Stalemate
                | GameResult::DrawAccepted
                | GameResult::DrawDeclared => GameOutcome::Draw,
            });
        }
        if self.game.can_declare_draw() {
            return Some(GameOutcome::Draw);
        }
        None
    }

    /// Take back the last full round: the user move plus the engine reply,
    /// or just the user move if the engine has not replied yet.
    pub fn undo_last_round(&mut self) -> Result<(), GameError> {
        if self.record.moves.is_empty() {
            return Err(GameError::NoMoveToUndo);
        }
        // The user plays White, so an even history means the engine moved
        // last and the whole round comes off.
        let half_moves = if self.record.moves.len() % 2 == 0 { 2 } else { 1 };
        for _ in 0..half_moves {
            self.record.moves.pop();
        }

        let rebuilt = Self::from_record(self.record.clone())?;
        self.game = rebuilt.game;
        Ok(())
    }
}

/// Parse a move in UCI coordinate notation ("e2e4", "e7e8q") and check it
/// against the position.
fn parse_uci_move(board: &Board, input: &str) -> Result<ChessMove, String> {
    let input = input.trim();
    if !input.is_ascii() || input.len() < 4 || input.len() > 5 {
        return Err(format!("'{input}' is not in long algebraic notation"));
    }

    let from = Square::from_str(&input[0..2])
        .map_err(|_| format!("'{input}' has an invalid source square"))?;
    let to = Square::from_str(&input[2..4])
        .map_err(|_| format!("'{input}' has an invalid destination square"))?;
    let promotion = match input.as_bytes().get(4) {
        None => None,
        Some(b'q') => Some(Piece::Queen),
        Some(b'r') => Some(Piece::Rook),
        Some(b'b') => Some(Piece::Bishop),
        Some(b'n') => Some(Piece::Knight),
        Some(_) => return Err(format!("'{input}' has an invalid promotion piece")),
    };

    let mv = ChessMove::new(from, to, promotion);
    if board.legal(mv) {
        Ok(mv)
    } else {
        Err(format!("'{input}' is not legal in this position"))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
