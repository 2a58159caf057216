//! Shared test doubles for the web server tests.

use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use engine_pool::EnginePool;
use engine_uci::{
    ChessEngine, EngineError, EngineFactory, EngineState, Score, ScoredLine, SearchLimit,
};

/// Engine double that plays the first legal move of the position. Good
/// enough for driving the orchestrator; terminal-position scenarios seed
/// the store so the user's own move ends the game.
pub(crate) struct StubEngine {
    strength: u32,
}

#[async_trait]
impl ChessEngine for StubEngine {
    fn strength(&self) -> u32 {
        self.strength
    }

    fn state(&self) -> EngineState {
        EngineState::Ready
    }

    async fn best_move(&mut self, fen: &str, _limit: SearchLimit) -> Result<String, EngineError> {
        let board =
            chess::Board::from_str(fen).map_err(|e| EngineError::Compute(e.to_string()))?;
        let mv = chess::MoveGen::new_legal(&board)
            .next()
            .ok_or_else(|| EngineError::Compute("no legal moves".into()))?;
        Ok(mv.to_string())
    }

    async fn top_lines(
        &mut self,
        fen: &str,
        count: usize,
        _limit: SearchLimit,
    ) -> Result<Vec<ScoredLine>, EngineError> {
        let board =
            chess::Board::from_str(fen).map_err(|e| EngineError::Compute(e.to_string()))?;
        Ok(chess::MoveGen::new_legal(&board)
            .take(count)
            .enumerate()
            .map(|(rank, mv)| ScoredLine {
                uci_move: mv.to_string(),
                score: Score::Centipawns(50 - rank as i32 * 10),
            })
            .collect())
    }

    async fn shutdown(&mut self) {}
}

pub(crate) struct StubEngineFactory {
    spawned: AtomicU32,
}

impl StubEngineFactory {
    pub(crate) fn new() -> Self {
        Self {
            spawned: AtomicU32::new(0),
        }
    }

    #[allow(dead_code)]
    pub(crate) fn spawn_count(&self) -> u32 {
        self.spawned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for StubEngineFactory {
    fn strength_range(&self) -> RangeInclusive<u32> {
        1320..=3190
    }

    async fn spawn(&self, strength: u32) -> Result<Box<dyn ChessEngine>, EngineError> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubEngine { strength }))
    }
}

pub(crate) fn stub_pool() -> Arc<EnginePool> {
    Arc::new(EnginePool::new(Arc::new(StubEngineFactory::new())))
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
