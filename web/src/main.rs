//! Gambit Web Server
//!
//! Stateless HTTP service for playing chess against a UCI engine.
//! Endpoints:
//! - GET  /health             - Health check (pings the session store)
//! - GET  /metrics            - Prometheus metrics
//! - POST /game/new           - Start a new game at a requested strength
//! - POST /game/:id/move      - Play a move and get the engine's reply
//! - GET  /game/:id/lines     - Top candidate lines for the position
//! - POST /game/:id/analysis  - Commentary from the analysis service
//! - POST /game/:id/voice     - Turn free text into a move
//! - POST /game/:id/undo      - Take back the last round
//! - POST /game/:id/end       - End the game
//!
//! Session state lives in the external store; one engine process per active
//! game is owned by the pool. A background reaper reclaims sessions that go
//! quiet without calling end-game.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

mod analysis;
mod central_config;
mod handlers;
mod metrics;
mod reaper;
mod session;
#[cfg(test)]
mod test_support;
mod types;

use analysis::AnalysisClient;
use engine_pool::EnginePool;
use engine_uci::{SearchLimit, UciEngineFactory};
use handlers::{
    analyse_game, end_game, health, make_move, metrics_handler, new_game, top_lines, undo_move,
    voice_move,
};
use reaper::SessionReaper;
use session_store::{create_session_store, SessionStore};

/// Shared application state
pub struct AppState {
    /// Engine process pool, one handle per active game
    pub pool: Arc<EnginePool>,
    /// Session persistence between stateless requests
    pub store: Arc<dyn SessionStore>,
    /// Client for the analysis/voice collaborator
    pub analysis: AnalysisClient,
    /// Strength used when a new game does not request one
    pub default_strength: u32,
    /// Per-move search budget
    pub search_limit: SearchLimit,
}

/// Create the application router with the given state.
/// This is separated out for testing purposes.
pub fn create_app(state: Arc<AppState>) -> Router {
    // CORS layer for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/game/new", post(new_game))
        .route("/game/:id/move", post(make_move))
        .route("/game/:id/lines", get(top_lines))
        .route("/game/:id/analysis", post(analyse_game))
        .route("/game/:id/voice", post(voice_move))
        .route("/game/:id/undo", post(undo_move))
        .route("/game/:id/end", post(end_game))
        .layer(cors)
        .with_state(state)
}

/// Creates a future that completes when a shutdown signal is received.
/// Handles Ctrl+C on all platforms.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Shutdown signal received, stopping server...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("web=info".parse().unwrap()),
        )
        .init();

    metrics::init_metrics();

    // Session store
    let store_config = central_config::get_store_config();
    info!(backend = %store_config.backend, "Connecting session store");
    let store: Arc<dyn SessionStore> = Arc::from(create_session_store(&store_config).await?);
    match store.ping().await {
        Ok(()) => info!("Session store connected"),
        Err(e) => warn!("Session store ping failed: {e}"),
    }

    // Engine pool
    let binary = central_config::get_engine_binary();
    let factory = UciEngineFactory::new(binary.clone(), central_config::get_strength_range())
        .with_quit_grace(central_config::get_quit_grace());
    let pool = Arc::new(EnginePool::new(Arc::new(factory)));
    info!(binary = %binary, "Engine pool initialized");

    // Analysis collaborator
    let analysis = AnalysisClient::new(
        central_config::get_analysis_base_url(),
        central_config::get_analysis_timeout(),
    )?;

    // Stale session reaper
    let reaper = Arc::new(SessionReaper::new(
        Arc::clone(&store),
        Arc::clone(&pool),
        central_config::get_reaper_interval(),
        central_config::get_reaper_timeout(),
    ));
    let reaper_handle = tokio::spawn(Arc::clone(&reaper).run());

    let state = Arc::new(AppState {
        pool: Arc::clone(&pool),
        store,
        analysis,
        default_strength: central_config::get_default_strength(),
        search_limit: central_config::get_search_limit(),
    });

    // Build router
    let app = create_app(state);

    let addr = format!(
        "{}:{}",
        central_config::get_host(),
        central_config::get_port()
    );
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the reaper, then make sure no engine process outlives us.
    reaper.shutdown();
    reaper_handle.abort();
    let released = pool.shutdown_all().await;
    info!(released, "All engine processes stopped");

    info!("Server shut down gracefully");
    Ok(())
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{unix_now, StubEngineFactory};
    use crate::types::{
        EndGameResponse, HealthResponse, MoveResponse, NewGameResponse, TopLinesResponse,
        UndoResponse,
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use session_store::{MemorySessionStore, SessionRecord};
    use std::time::Duration;
    use tower::ServiceExt;

    /// Application state for testing: memory store, stub engines, and an
    /// analysis URL nothing listens on.
    fn create_test_state() -> Arc<AppState> {
        metrics::init_metrics();
        Arc::new(AppState {
            pool: Arc::new(EnginePool::new(Arc::new(StubEngineFactory::new()))),
            store: Arc::new(MemorySessionStore::new()),
            analysis: AnalysisClient::new("http://127.0.0.1:9", Duration::from_millis(200))
                .expect("analysis client"),
            default_strength: 1320,
            search_limit: SearchLimit::Depth(1),
        })
    }

    /// Helper to make a GET request and return response body as string
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body_str = String::from_utf8(body.to_vec()).unwrap();
        (status, body_str)
    }

    /// Helper to make a POST request with JSON body and return response
    async fn post_json(app: Router, uri: &str, json: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body_str = String::from_utf8(body.to_vec()).unwrap();
        (status, body_str)
    }

    const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    async fn start_game(state: &Arc<AppState>, strength: u32) -> NewGameResponse {
        let app = create_app(Arc::clone(state));
        let (status, body) = post_json(
            app,
            "/game/new",
            &format!(r#"{{"strength": {strength}}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "start failed: {body}");
        serde_json::from_str(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = create_test_state();
        let app = create_app(state);

        let (status, body) = get(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let response: HealthResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.status, "ok");
        assert_eq!(response.store, "ok");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = create_test_state();
        let app = create_app(state);

        let (status, body) = get(app, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("web_games_created_total"));
    }

    #[tokio::test]
    async fn test_new_game_returns_initial_position() {
        let state = create_test_state();

        let response = start_game(&state, 1500).await;

        assert_eq!(response.fen, INITIAL_FEN);
        assert_eq!(response.strength, 1500);
        assert_eq!(response.turn, "white");
        assert!(state.pool.contains(&response.game_id));
        assert!(state.store.get(&response.game_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_new_game_uses_default_strength() {
        let state = create_test_state();
        let app = create_app(Arc::clone(&state));

        let (status, body) = post_json(app, "/game/new", "{}").await;

        assert_eq!(status, StatusCode::OK);
        let response: NewGameResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.strength, 1320);
    }

    #[tokio::test]
    async fn test_new_game_rejects_out_of_range_strength() {
        let state = create_test_state();
        let app = create_app(Arc::clone(&state));

        let (status, body) = post_json(app, "/game/new", r#"{"strength": 100}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("supported range"));
        // The unusable record must not linger.
        assert!(state.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_gets_an_engine_reply() {
        let state = create_test_state();
        let game = start_game(&state, 1500).await;

        let app = create_app(Arc::clone(&state));
        let uri = format!("/game/{}/move", game.game_id);
        let (status, body) = post_json(app, &uri, r#"{"move": "e2e4"}"#).await;

        assert_eq!(status, StatusCode::OK, "move failed: {body}");
        let response: MoveResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.user_move, "e2e4");
        assert!(response.engine_move.is_some());
        assert!(!response.game_over);
        assert_eq!(response.turn, "white");

        // Both half-moves are in the stored record.
        let record = state.store.get(&game.game_id).await.unwrap();
        assert_eq!(record.moves.len(), 2);
        assert_eq!(record.moves[0], "e2e4");
    }

    #[tokio::test]
    async fn test_illegal_move_leaves_the_record_untouched() {
        let state = create_test_state();
        let game = start_game(&state, 1500).await;
        let before = state.store.get(&game.game_id).await.unwrap();

        let app = create_app(Arc::clone(&state));
        let uri = format!("/game/{}/move", game.game_id);
        let (status, body) = post_json(app, &uri, r#"{"move": "e2e5"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Invalid or illegal move"));
        assert_eq!(state.store.get(&game.game_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_move_on_unknown_game_is_not_found() {
        let state = create_test_state();
        let app = create_app(state);

        let (status, _) = post_json(app, "/game/nope/move", r#"{"move": "e2e4"}"#).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_checkmating_move_ends_and_deletes_the_game() {
        let state = create_test_state();

        // One move from scholar's mate; the user's next move mates, so the
        // engine is never consulted.
        let record = SessionRecord {
            game_id: "mate-in-one".to_string(),
            moves: ["e2e4", "e7e5", "f1c4", "b8c6", "d1h5", "g8f6"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            strength: 1500,
            last_active_at: unix_now(),
        };
        state.store.set(&record).await.unwrap();
        state.pool.acquire("mate-in-one", 1500).await.unwrap();

        let app = create_app(Arc::clone(&state));
        let (status, body) = post_json(app, "/game/mate-in-one/move", r#"{"move": "h5f7"}"#).await;

        assert_eq!(status, StatusCode::OK, "move failed: {body}");
        let response: MoveResponse = serde_json::from_str(&body).unwrap();
        assert!(response.game_over);
        assert_eq!(response.result.as_deref(), Some("1-0"));
        assert!(response.engine_move.is_none(), "winner gets no reply move");

        // Session is fully torn down.
        assert!(state.store.get("mate-in-one").await.is_err());
        assert!(!state.pool.contains("mate-in-one"));
    }

    #[tokio::test]
    async fn test_move_resumes_without_a_live_handle() {
        let state = create_test_state();
        let game = start_game(&state, 1500).await;

        // Simulate landing on a fresh instance: the record survives, the
        // handle does not.
        state.pool.release(&game.game_id).await;
        assert!(!state.pool.contains(&game.game_id));

        let app = create_app(Arc::clone(&state));
        let uri = format!("/game/{}/move", game.game_id);
        let (status, _) = post_json(app, &uri, r#"{"move": "d2d4"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert!(state.pool.contains(&game.game_id));
        assert_eq!(
            state.pool.configured_strength(&game.game_id).await,
            Some(1500),
            "recreated handle keeps the stored strength"
        );
    }

    #[tokio::test]
    async fn test_top_lines_returns_ranked_lines() {
        let state = create_test_state();
        let game = start_game(&state, 1500).await;

        let app = create_app(Arc::clone(&state));
        let uri = format!("/game/{}/lines?count=2", game.game_id);
        let (status, body) = get(app, &uri).await;

        assert_eq!(status, StatusCode::OK);
        let response: TopLinesResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.lines.len(), 2);
        assert!(response.lines[0].score_cp.is_some());

        // Read-only: the record still has no moves.
        assert!(state.store.get(&game.game_id).await.unwrap().moves.is_empty());
    }

    #[tokio::test]
    async fn test_undo_takes_back_a_full_round() {
        let state = create_test_state();
        let game = start_game(&state, 1500).await;

        {
            let app = create_app(Arc::clone(&state));
            let uri = format!("/game/{}/move", game.game_id);
            let (status, _) = post_json(app, &uri, r#"{"move": "e2e4"}"#).await;
            assert_eq!(status, StatusCode::OK);
        }

        let app = create_app(Arc::clone(&state));
        let uri = format!("/game/{}/undo", game.game_id);
        let (status, body) = post_json(app, &uri, "{}").await;

        assert_eq!(status, StatusCode::OK);
        let response: UndoResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.fen, INITIAL_FEN);
        assert_eq!(response.moves_remaining, 0);
        assert!(state.store.get(&game.game_id).await.unwrap().moves.is_empty());
    }

    #[tokio::test]
    async fn test_undo_with_no_moves_fails_and_keeps_the_record() {
        let state = create_test_state();
        let game = start_game(&state, 1500).await;

        let app = create_app(Arc::clone(&state));
        let uri = format!("/game/{}/undo", game.game_id);
        let (status, body) = post_json(app, &uri, "{}").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("No move to undo"));
        assert!(state.store.get(&game.game_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_end_game_is_idempotent() {
        let state = create_test_state();
        let game = start_game(&state, 1500).await;

        for _ in 0..2 {
            let app = create_app(Arc::clone(&state));
            let uri = format!("/game/{}/end", game.game_id);
            let (status, body) = post_json(app, &uri, "{}").await;
            assert_eq!(status, StatusCode::OK);
            let response: EndGameResponse = serde_json::from_str(&body).unwrap();
            assert!(response.ended);
        }

        assert!(state.store.get(&game.game_id).await.is_err());
        assert!(!state.pool.contains(&game.game_id));
    }

    #[tokio::test]
    async fn test_voice_move_reports_unreachable_service() {
        let state = create_test_state();
        let game = start_game(&state, 1500).await;

        let app = create_app(Arc::clone(&state));
        let uri = format!("/game/{}/voice", game.game_id);
        let (status, body) = post_json(app, &uri, r#"{"text": "pawn to e four"}"#).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("Analysis service failed"));
        // Session state untouched by collaborator failure.
        assert!(state.store.get(&game.game_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_analysis_reports_unreachable_service() {
        let state = create_test_state();
        let game = start_game(&state, 1500).await;

        let app = create_app(Arc::clone(&state));
        let uri = format!("/game/{}/analysis", game.game_id);
        let (status, body) = post_json(app, &uri, "{}").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("Analysis service failed"));
    }
}
