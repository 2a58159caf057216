//! Request types for the web API.

use serde::Deserialize;

/// Request to start a new game.
#[derive(Deserialize)]
pub struct NewGameRequest {
    /// Engine strength (Elo-like). Falls back to the configured default.
    #[serde(default)]
    pub strength: Option<u32>,
}

/// Request to play one user move.
#[derive(Deserialize)]
pub struct MoveRequest {
    /// Move in UCI coordinate notation, e.g. "e2e4" or "e7e8q".
    #[serde(rename = "move")]
    pub uci_move: String,
}

/// Query parameters for the top-lines endpoint.
#[derive(Deserialize)]
pub struct LinesQuery {
    /// Number of ranked lines to return.
    #[serde(default = "default_line_count")]
    pub count: usize,
}

fn default_line_count() -> usize {
    3
}

/// Request to turn free text into a move.
#[derive(Deserialize)]
pub struct VoiceMoveRequest {
    /// Free text, e.g. "knight takes e five".
    pub text: String,
}
