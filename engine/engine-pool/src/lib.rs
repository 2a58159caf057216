//! Engine process pool.
//!
//! Owns every live engine handle, keyed by game id. The pool enforces the
//! two invariants the rest of the service relies on:
//!
//! - at most one handle exists per game id at any time, and
//! - all operations on a given game id are mutually exclusive, while
//!   operations on different ids never block one another.
//!
//! The outer map lock is held only to look entries up and is never held
//! across engine I/O; each entry carries its own async lock that serializes
//! spawn/search/release for that game.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use engine_uci::{ChessEngine, EngineError, EngineFactory, ScoredLine, SearchLimit};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PoolError {
    /// No live engine for this game id; the caller should `acquire` first.
    #[error("no engine for game {0}")]
    NotFound(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Default)]
struct EngineSlot {
    engine: Option<Box<dyn ChessEngine>>,
}

type SlotHandle = Arc<AsyncMutex<EngineSlot>>;

pub struct EnginePool {
    factory: Arc<dyn EngineFactory>,
    entries: Mutex<HashMap<String, SlotHandle>>,
}

impl EnginePool {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Ensure a configured engine exists for `game_id` and return the
    /// strength it is actually running at.
    ///
    /// The first call for an id spawns and configures a process; later calls
    /// return the existing handle unchanged, so the returned strength is the
    /// one fixed at creation even if a different value is passed. Strength
    /// is validated against the factory's supported range.
    pub async fn acquire(&self, game_id: &str, strength: u32) -> Result<u32, PoolError> {
        let range = self.factory.strength_range();
        if !range.contains(&strength) {
            return Err(EngineError::InvalidStrength {
                strength,
                min: *range.start(),
                max: *range.end(),
            }
            .into());
        }

        let slot = {
            let mut entries = self.entries.lock().unwrap();
            entries.entry(game_id.to_string()).or_default().clone()
        };

        let mut guard = slot.lock().await;
        if let Some(engine) = guard.engine.as_ref() {
            return Ok(engine.strength());
        }

        debug!(game_id, strength, "spawning engine");
        let engine = self.factory.spawn(strength).await?;
        guard.engine = Some(engine);
        Ok(strength)
    }

    /// Non-creating lookup: the strength of the live engine for `game_id`,
    /// if one exists. Used by diagnostics and tests.
    pub async fn configured_strength(&self, game_id: &str) -> Option<u32> {
        let slot = self.slot(game_id)?;
        let guard = slot.lock().await;
        guard.engine.as_ref().map(|engine| engine.strength())
    }

    pub fn contains(&self, game_id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(game_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn game_ids(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    /// Terminate and discard the engine for `game_id`. Idempotent: returns
    /// `true` only if a handle was actually released. Waits for any
    /// in-flight call on the same game to finish first.
    pub async fn release(&self, game_id: &str) -> bool {
        let slot = { self.entries.lock().unwrap().remove(game_id) };
        let Some(slot) = slot else {
            return false;
        };

        let mut guard = slot.lock().await;
        if let Some(mut engine) = guard.engine.take() {
            engine.shutdown().await;
            info!(game_id, "engine released");
        }
        true
    }

    /// Ask the engine for its best move from `fen`.
    ///
    /// A compute failure terminates and discards the handle; the caller may
    /// retry by re-acquiring, which spawns a fresh process.
    pub async fn best_move(
        &self,
        game_id: &str,
        fen: &str,
        limit: SearchLimit,
    ) -> Result<String, PoolError> {
        let slot = self
            .slot(game_id)
            .ok_or_else(|| PoolError::NotFound(game_id.to_string()))?;
        let mut guard = slot.lock().await;
        let engine = guard
            .engine
            .as_mut()
            .ok_or_else(|| PoolError::NotFound(game_id.to_string()))?;

        match engine.best_move(fen, limit).await {
            Ok(mv) => Ok(mv),
            Err(e) => {
                self.discard(game_id, &slot, &mut guard).await;
                Err(e.into())
            }
        }
    }

    /// Analysis query: up to `count` ranked lines for `fen`. Side-effect
    /// free on session state; same failure policy as [`Self::best_move`].
    pub async fn top_lines(
        &self,
        game_id: &str,
        fen: &str,
        count: usize,
        limit: SearchLimit,
    ) -> Result<Vec<ScoredLine>, PoolError> {
        let slot = self
            .slot(game_id)
            .ok_or_else(|| PoolError::NotFound(game_id.to_string()))?;
        let mut guard = slot.lock().await;
        let engine = guard
            .engine
            .as_mut()
            .ok_or_else(|| PoolError::NotFound(game_id.to_string()))?;

        match engine.top_lines(fen, count, limit).await {
            Ok(lines) => Ok(lines),
            Err(e) => {
                self.discard(game_id, &slot, &mut guard).await;
                Err(e.into())
            }
        }
    }

    /// Release every handle whose game id satisfies the predicate. Returns
    /// the number of handles released. Safe to run concurrently with per-id
    /// operations on other ids.
    pub async fn sweep<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut released = 0;
        for game_id in self.game_ids() {
            if predicate(&game_id) && self.release(&game_id).await {
                released += 1;
            }
        }
        released
    }

    /// Release every handle; used at process shutdown.
    pub async fn shutdown_all(&self) -> usize {
        self.sweep(|_| true).await
    }

    fn slot(&self, game_id: &str) -> Option<SlotHandle> {
        self.entries.lock().unwrap().get(game_id).cloned()
    }

    /// Terminate a failed engine and drop its table entry, but only if the
    /// table still points at the slot we hold (a concurrent release +
    /// acquire may have replaced it).
    async fn discard(&self, game_id: &str, slot: &SlotHandle, guard: &mut EngineSlot) {
        warn!(game_id, "discarding failed engine");
        if let Some(mut engine) = guard.engine.take() {
            engine.shutdown().await;
        }
        let mut entries = self.entries.lock().unwrap();
        if let Some(current) = entries.get(game_id) {
            if Arc::ptr_eq(current, slot) {
                entries.remove(game_id);
            }
        }
    }
}
