//! Response types for the web API.

use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Session store reachability: "ok" or "unreachable".
    pub store: String,
    /// Number of live engine processes.
    pub active_games: usize,
}

/// Response after starting a game.
#[derive(Serialize, Deserialize)]
pub struct NewGameResponse {
    pub game_id: String,
    /// Position after creation, as FEN.
    pub fen: String,
    /// Strength the engine was actually configured with.
    pub strength: u32,
    pub turn: String,
}

/// Response after playing a move.
#[derive(Serialize, Deserialize)]
pub struct MoveResponse {
    pub game_id: String,
    pub user_move: String,
    /// Engine reply; absent when the user's move ended the game.
    pub engine_move: Option<String>,
    pub fen: String,
    pub turn: String,
    pub game_over: bool,
    /// Terminal result ("1-0", "0-1", "1/2-1/2") when the game ended.
    pub result: Option<String>,
    /// Status message
    pub message: String,
}

/// One ranked engine line.
#[derive(Serialize, Deserialize)]
pub struct LineEntry {
    pub uci_move: String,
    /// Score in centipawns from the side to move, if not a forced mate.
    pub score_cp: Option<i32>,
    /// Moves until mate; negative when the side to move is being mated.
    pub mate_in: Option<i32>,
}

/// Top candidate lines for the current position.
#[derive(Serialize, Deserialize)]
pub struct TopLinesResponse {
    pub game_id: String,
    pub fen: String,
    pub lines: Vec<LineEntry>,
}

/// Commentary from the analysis collaborator.
#[derive(Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub game_id: String,
    pub fen: String,
    pub commentary: String,
}

/// A move transcribed from free text. The move is not applied.
#[derive(Serialize, Deserialize)]
pub struct VoiceMoveResponse {
    pub game_id: String,
    pub uci_move: String,
}

/// Position after an undo.
#[derive(Serialize, Deserialize)]
pub struct UndoResponse {
    pub game_id: String,
    pub fen: String,
    pub turn: String,
    /// Half-moves remaining in the history.
    pub moves_remaining: usize,
}

/// Acknowledgement of end-game. Ending an already-gone game is fine.
#[derive(Serialize, Deserialize)]
pub struct EndGameResponse {
    pub game_id: String,
    pub ended: bool,
}
