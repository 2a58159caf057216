//! Analysis and voice handlers.
//!
//! Both delegate to the external analysis collaborator and are read-only on
//! session state.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::analysis::{AnalysisError, CandidateLine};
use crate::handlers::{game_error, pool_error, store_error, HandlerError};
use crate::session::GameSession;
use crate::types::{AnalysisResponse, VoiceMoveRequest, VoiceMoveResponse};
use crate::AppState;
use engine_uci::Score;

/// Lines forwarded to the commentary service.
const ANALYSIS_LINE_COUNT: usize = 3;

fn analysis_error(err: AnalysisError) -> HandlerError {
    (
        StatusCode::BAD_GATEWAY,
        format!("Analysis service failed: {err}"),
    )
}

/// Commentary on the current position: the engine's top lines are computed
/// and forwarded to the analysis collaborator.
pub async fn analyse_game(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> Result<Json<AnalysisResponse>, HandlerError> {
    let record = state.store.get(&game_id).await.map_err(store_error)?;
    let session = GameSession::from_record(record).map_err(game_error)?;

    state
        .pool
        .acquire(&game_id, session.strength())
        .await
        .map_err(pool_error)?;
    let lines = state
        .pool
        .top_lines(
            &game_id,
            &session.fen(),
            ANALYSIS_LINE_COUNT,
            state.search_limit,
        )
        .await
        .map_err(pool_error)?;

    let candidates: Vec<CandidateLine> = lines
        .into_iter()
        .map(|line| {
            let (score_cp, mate_in) = match line.score {
                Score::Centipawns(cp) => (Some(cp), None),
                Score::Mate(in_moves) => (None, Some(in_moves)),
            };
            CandidateLine {
                uci_move: line.uci_move,
                score_cp,
                mate_in,
            }
        })
        .collect();

    let commentary = state
        .analysis
        .commentary(&session.fen(), &candidates)
        .await
        .map_err(analysis_error)?;

    Ok(Json(AnalysisResponse {
        game_id,
        fen: session.fen(),
        commentary,
    }))
}

/// Turn free text into a move for the current position. The move is
/// validated against the position but not applied; the client plays it
/// through the normal move endpoint.
pub async fn voice_move(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
    Json(req): Json<VoiceMoveRequest>,
) -> Result<Json<VoiceMoveResponse>, HandlerError> {
    let record = state.store.get(&game_id).await.map_err(store_error)?;
    let session = GameSession::from_record(record).map_err(game_error)?;

    let uci_move = state
        .analysis
        .move_from_speech(&session.fen(), &req.text)
        .await
        .map_err(analysis_error)?;

    if !session.is_legal(&uci_move) {
        return Err((
            StatusCode::BAD_GATEWAY,
            format!("Analysis service suggested an illegal move: {uci_move}"),
        ));
    }

    Ok(Json(VoiceMoveResponse { game_id, uci_move }))
}
