//! Prometheus metrics for the web server component.
//!
//! This module provides metrics for monitoring game session lifecycle,
//! engine move latency, and session reclamation.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Once;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ========== Game Session Metrics ==========

    /// Total game sessions created
    pub static ref GAMES_CREATED: IntCounter = IntCounter::with_opts(
        Opts::new("web_games_created_total", "Total game sessions created")
    ).unwrap();

    /// Currently active engine processes
    pub static ref GAMES_ACTIVE: IntGauge = IntGauge::with_opts(
        Opts::new("web_games_active", "Currently active engine processes")
    ).unwrap();

    /// Total user moves played across all games
    pub static ref MOVES_PLAYED: IntCounter = IntCounter::with_opts(
        Opts::new("web_moves_played_total", "Total user moves played across all games")
    ).unwrap();

    /// Games ended by a terminal result
    pub static ref GAMES_COMPLETED: IntCounter = IntCounter::with_opts(
        Opts::new("web_games_completed_total", "Total games completed")
    ).unwrap();

    // ========== Engine Metrics ==========

    /// Time for the engine to compute a move
    pub static ref ENGINE_MOVE_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("web_engine_move_seconds", "Time for the engine to compute a move")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0])
    ).unwrap();

    // ========== Reaper Metrics ==========

    /// Stale sessions reclaimed by the background reaper
    pub static ref SESSIONS_REAPED: IntCounter = IntCounter::with_opts(
        Opts::new("web_sessions_reaped_total", "Stale sessions reclaimed by the reaper")
    ).unwrap();
}

static INIT: Once = Once::new();

/// Initialize and register all metrics with the registry.
/// Safe to call multiple times - only initializes once.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY.register(Box::new(GAMES_CREATED.clone())).unwrap();
        REGISTRY.register(Box::new(GAMES_ACTIVE.clone())).unwrap();
        REGISTRY.register(Box::new(MOVES_PLAYED.clone())).unwrap();
        REGISTRY
            .register(Box::new(GAMES_COMPLETED.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(ENGINE_MOVE_SECONDS.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(SESSIONS_REAPED.clone()))
            .unwrap();
    });
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
