//! Game lifecycle handlers: start, move, undo, end, top lines.
//!
//! Every mutating action is one transformation of the stored record: load,
//! reconstruct, act, then persist the new record or delete it if the game
//! ended. Engine handles are borrowed from the pool per request and never
//! survive a request.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use axum::http::StatusCode;
use tracing::info;

use crate::handlers::{game_error, pool_error, store_error, HandlerError};
use crate::metrics;
use crate::session::{GameOutcome, GameSession};
use crate::types::{
    EndGameResponse, LineEntry, LinesQuery, MoveRequest, MoveResponse, NewGameRequest,
    NewGameResponse, TopLinesResponse, UndoResponse,
};
use crate::AppState;
use engine_uci::Score;

/// Most lines MultiPV analysis will return per request.
const MAX_LINES: usize = 10;

/// Start a new game.
pub async fn new_game(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewGameRequest>,
) -> Result<Json<NewGameResponse>, HandlerError> {
    let strength = req.strength.unwrap_or(state.default_strength);
    let session = GameSession::new(strength);
    let game_id = session.game_id().to_string();

    // Record first, engine second: a handle without a record would be swept
    // as an orphan by the reaper.
    state.store.set(session.record()).await.map_err(store_error)?;
    let configured = match state.pool.acquire(&game_id, strength).await {
        Ok(configured) => configured,
        Err(e) => {
            let _ = state.store.delete(&game_id).await;
            return Err(pool_error(e));
        }
    };

    metrics::GAMES_CREATED.inc();
    metrics::GAMES_ACTIVE.set(state.pool.len() as i64);
    info!(game_id = %game_id, strength = configured, "Game started");

    Ok(Json(NewGameResponse {
        game_id,
        fen: session.fen(),
        strength: configured,
        turn: session.turn().to_string(),
    }))
}

/// Play one user move and compute the engine's reply.
pub async fn make_move(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<MoveResponse>, HandlerError> {
    let record = state.store.get(&game_id).await.map_err(store_error)?;
    let mut session = GameSession::from_record(record).map_err(game_error)?;

    // Rejected moves leave the stored record untouched.
    session.apply_move(&req.uci_move).map_err(game_error)?;
    metrics::MOVES_PLAYED.inc();

    if let Some(outcome) = session.outcome() {
        return finish_game(&state, session, req.uci_move, None, outcome).await;
    }

    // Re-acquire transparently recreates the handle at the stored strength
    // when this request landed on a fresh instance.
    state
        .pool
        .acquire(&game_id, session.strength())
        .await
        .map_err(pool_error)?;

    let timer = metrics::ENGINE_MOVE_SECONDS.start_timer();
    let reply = state
        .pool
        .best_move(&game_id, &session.fen(), state.search_limit)
        .await
        .map_err(pool_error)?;
    timer.observe_duration();

    session.apply_move(&reply).map_err(|e| {
        (
            StatusCode::BAD_GATEWAY,
            format!("Engine produced an unplayable move: {e}"),
        )
    })?;

    if let Some(outcome) = session.outcome() {
        return finish_game(&state, session, req.uci_move, Some(reply), outcome).await;
    }

    session.touch();
    state.store.set(session.record()).await.map_err(store_error)?;

    Ok(Json(MoveResponse {
        game_id,
        user_move: req.uci_move,
        engine_move: Some(reply.clone()),
        fen: session.fen(),
        turn: session.turn().to_string(),
        game_over: false,
        result: None,
        message: format!("Engine played {reply}"),
    }))
}

/// Tear the finished game down and report its result.
async fn finish_game(
    state: &Arc<AppState>,
    session: GameSession,
    user_move: String,
    engine_move: Option<String>,
    outcome: GameOutcome,
) -> Result<Json<MoveResponse>, HandlerError> {
    let game_id = session.game_id().to_string();
    state.pool.release(&game_id).await;
    state.store.delete(&game_id).await.map_err(store_error)?;

    metrics::GAMES_COMPLETED.inc();
    metrics::GAMES_ACTIVE.set(state.pool.len() as i64);
    info!(game_id = %game_id, result = outcome.result_string(), "Game over");

    Ok(Json(MoveResponse {
        game_id,
        user_move,
        engine_move,
        fen: session.fen(),
        turn: session.turn().to_string(),
        game_over: true,
        result: Some(outcome.result_string().to_string()),
        message: outcome.describe().to_string(),
    }))
}

/// Top candidate lines for the current position. Read-only: the stored
/// record is not touched or re-persisted.
pub async fn top_lines(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
    Query(query): Query<LinesQuery>,
) -> Result<Json<TopLinesResponse>, HandlerError> {
    let record = state.store.get(&game_id).await.map_err(store_error)?;
    let session = GameSession::from_record(record).map_err(game_error)?;

    state
        .pool
        .acquire(&game_id, session.strength())
        .await
        .map_err(pool_error)?;

    let count = query.count.clamp(1, MAX_LINES);
    let lines = state
        .pool
        .top_lines(&game_id, &session.fen(), count, state.search_limit)
        .await
        .map_err(pool_error)?;

    Ok(Json(TopLinesResponse {
        game_id,
        fen: session.fen(),
        lines: lines.into_iter().map(line_entry).collect(),
    }))
}

pub(crate) fn line_entry(line: engine_uci::ScoredLine) -> LineEntry {
    let (score_cp, mate_in) = match line.score {
        Score::Centipawns(cp) => (Some(cp), None),
        Score::Mate(in_moves) => (None, Some(in_moves)),
    };
    LineEntry {
        uci_move: line.uci_move,
        score_cp,
        mate_in,
    }
}

/// Take back the last round of moves.
pub async fn undo_move(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> Result<Json<UndoResponse>, HandlerError> {
    let record = state.store.get(&game_id).await.map_err(store_error)?;
    let mut session = GameSession::from_record(record).map_err(game_error)?;

    session.undo_last_round().map_err(game_error)?;
    session.touch();
    state.store.set(session.record()).await.map_err(store_error)?;

    Ok(Json(UndoResponse {
        game_id,
        fen: session.fen(),
        turn: session.turn().to_string(),
        moves_remaining: session.move_count(),
    }))
}

/// End the game: release the engine and delete the record. Idempotent.
pub async fn end_game(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> Result<Json<EndGameResponse>, HandlerError> {
    state.pool.release(&game_id).await;
    state.store.delete(&game_id).await.map_err(store_error)?;

    metrics::GAMES_ACTIVE.set(state.pool.len() as i64);
    info!(game_id = %game_id, "Game ended by client");

    Ok(Json(EndGameResponse {
        game_id,
        ended: true,
    }))
}
