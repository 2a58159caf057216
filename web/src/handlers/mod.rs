//! HTTP request handlers.

mod analysis;
mod game;
mod health;

pub use analysis::*;
pub use game::*;
pub use health::*;

use axum::http::StatusCode;

use crate::session::GameError;
use engine_pool::PoolError;
use engine_uci::EngineError;
use session_store::StoreError;

/// Handlers report failures as a status code plus a plain-text detail.
pub(crate) type HandlerError = (StatusCode, String);

pub(crate) fn store_error(err: StoreError) -> HandlerError {
    match err {
        StoreError::NotFound(game_id) => (
            StatusCode::NOT_FOUND,
            format!("No active game with id {game_id}"),
        ),
        StoreError::Backend(msg) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Session store failure: {msg}"),
        ),
    }
}

pub(crate) fn pool_error(err: PoolError) -> HandlerError {
    match err {
        PoolError::NotFound(game_id) => (
            StatusCode::NOT_FOUND,
            format!("No engine for game {game_id}"),
        ),
        PoolError::Engine(EngineError::Unavailable(msg)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Engine unavailable: {msg}"),
        ),
        PoolError::Engine(EngineError::Compute(msg)) => (
            StatusCode::BAD_GATEWAY,
            format!("Engine failed, please retry: {msg}"),
        ),
        PoolError::Engine(EngineError::InvalidStrength { strength, min, max }) => (
            StatusCode::BAD_REQUEST,
            format!("Strength {strength} is outside the supported range {min}-{max}"),
        ),
    }
}

pub(crate) fn game_error(err: GameError) -> HandlerError {
    match err {
        GameError::IllegalMove(msg) => (
            StatusCode::BAD_REQUEST,
            format!("Invalid or illegal move: {msg}"),
        ),
        GameError::NoMoveToUndo => (StatusCode::BAD_REQUEST, "No move to undo".to_string()),
        GameError::Corrupt(msg) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Session record is corrupt: {msg}"),
        ),
    }
}
