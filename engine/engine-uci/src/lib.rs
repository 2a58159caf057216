//! UCI engine handle.
//!
//! Wraps one spawned UCI engine process (e.g. Stockfish) and exposes the
//! handful of operations the pool needs: configure a playing strength at
//! startup, search for a best move, produce a MultiPV analysis, and
//! terminate cleanly. All I/O with the child goes over stdin/stdout using
//! the UCI protocol.
//!
//! The [`ChessEngine`] and [`EngineFactory`] traits exist so the pool can be
//! driven by test doubles; [`UciEngine`]/[`UciEngineFactory`] are the real
//! implementations.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Default grace period between sending `quit` and force-killing the child.
const DEFAULT_QUIT_GRACE: Duration = Duration::from_secs(2);

/// Search budget for one engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchLimit {
    /// Fixed wall-clock time per move, in milliseconds.
    MoveTime(u64),
    /// Fixed search depth in plies.
    Depth(u8),
}

impl SearchLimit {
    fn go_command(&self) -> String {
        match self {
            SearchLimit::MoveTime(ms) => format!("go movetime {ms}"),
            SearchLimit::Depth(plies) => format!("go depth {plies}"),
        }
    }
}

/// Engine evaluation of a line, from the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    /// Moves until mate; negative when the side to move is being mated.
    Mate(i32),
}

/// One ranked candidate line from a MultiPV analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredLine {
    /// First move of the line, in UCI coordinate notation.
    pub uci_move: String,
    pub score: Score,
}

/// Process state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Ready,
    Busy,
    Terminated,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine process could not be started or configured.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    /// The engine process crashed or produced output we cannot use. The
    /// handle is unusable afterwards and must be discarded.
    #[error("engine failed: {0}")]
    Compute(String),
    /// Requested strength is outside the engine's supported range.
    #[error("strength {strength} outside supported range {min}..={max}")]
    InvalidStrength { strength: u32, min: u32, max: u32 },
}

/// One playing engine bound to a single game.
///
/// Calls must be serialized by the caller (the pool holds one async lock per
/// game). A handle that returns [`EngineError::Compute`] is terminated and
/// must not be reused.
#[async_trait]
pub trait ChessEngine: Send {
    /// Strength the engine was configured with at spawn time.
    fn strength(&self) -> u32;

    fn state(&self) -> EngineState;

    /// Search the given position and return the best move in UCI notation.
    async fn best_move(&mut self, fen: &str, limit: SearchLimit) -> Result<String, EngineError>;

    /// Return up to `count` ranked candidate lines for the position.
    async fn top_lines(
        &mut self,
        fen: &str,
        count: usize,
        limit: SearchLimit,
    ) -> Result<Vec<ScoredLine>, EngineError>;

    /// Terminate the engine process. Safe to call more than once.
    async fn shutdown(&mut self);
}

/// Spawns configured engines. The pool validates strengths against
/// [`EngineFactory::strength_range`] before spawning.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    fn strength_range(&self) -> RangeInclusive<u32>;

    async fn spawn(&self, strength: u32) -> Result<Box<dyn ChessEngine>, EngineError>;
}

/// Factory spawning real UCI engine processes.
pub struct UciEngineFactory {
    binary: String,
    strength_range: RangeInclusive<u32>,
    quit_grace: Duration,
}

impl UciEngineFactory {
    pub fn new(binary: impl Into<String>, strength_range: RangeInclusive<u32>) -> Self {
        Self {
            binary: binary.into(),
            strength_range,
            quit_grace: DEFAULT_QUIT_GRACE,
        }
    }

    /// Override the grace period between `quit` and force-kill.
    pub fn with_quit_grace(mut self, grace: Duration) -> Self {
        self.quit_grace = grace;
        self
    }
}

#[async_trait]
impl EngineFactory for UciEngineFactory {
    fn strength_range(&self) -> RangeInclusive<u32> {
        self.strength_range.clone()
    }

    async fn spawn(&self, strength: u32) -> Result<Box<dyn ChessEngine>, EngineError> {
        let engine = UciEngine::spawn(&self.binary, strength, self.quit_grace).await?;
        Ok(Box::new(engine))
    }
}

/// A live UCI engine child process.
pub struct UciEngine {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    strength: u32,
    state: EngineState,
    quit_grace: Duration,
}

impl UciEngine {
    /// Spawn the engine binary and configure it to the given strength via
    /// `UCI_LimitStrength`/`UCI_Elo`. Fails with [`EngineError::Unavailable`]
    /// if the process cannot be started or never completes the handshake.
    pub async fn spawn(
        binary: &str,
        strength: u32,
        quit_grace: Duration,
    ) -> Result<Self, EngineError> {
        let mut child = Command::new(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Unavailable(format!("failed to start '{binary}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine stdin pipe missing".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine stdout pipe missing".into()))?;

        let mut engine = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            strength,
            state: EngineState::Ready,
            quit_grace,
        };

        if let Err(e) = engine.handshake().await {
            engine.shutdown().await;
            return Err(EngineError::Unavailable(format!(
                "engine handshake failed: {e}"
            )));
        }

        debug!(binary, strength, "engine ready");
        Ok(engine)
    }

    async fn handshake(&mut self) -> Result<(), EngineError> {
        self.send("uci").await?;
        self.wait_for("uciok").await?;
        self.send("setoption name UCI_LimitStrength value true")
            .await?;
        self.send(&format!("setoption name UCI_Elo value {}", self.strength))
            .await?;
        self.send("setoption name Threads value 1").await?;
        self.send("setoption name Hash value 16").await?;
        self.send("isready").await?;
        self.wait_for("readyok").await
    }

    async fn send(&mut self, command: &str) -> Result<(), EngineError> {
        debug!(command, "uci send");
        let written = async {
            self.stdin.write_all(command.as_bytes()).await?;
            self.stdin.write_all(b"\n").await?;
            self.stdin.flush().await
        }
        .await;

        written.map_err(|e| {
            self.state = EngineState::Terminated;
            EngineError::Compute(format!("write to engine failed: {e}"))
        })
    }

    async fn read_line(&mut self) -> Result<String, EngineError> {
        match self.stdout.next_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => {
                self.state = EngineState::Terminated;
                Err(EngineError::Compute("engine closed its output stream".into()))
            }
            Err(e) => {
                self.state = EngineState::Terminated;
                Err(EngineError::Compute(format!("read from engine failed: {e}")))
            }
        }
    }

    async fn wait_for(&mut self, token: &str) -> Result<(), EngineError> {
        loop {
            if self.read_line().await?.trim() == token {
                return Ok(());
            }
        }
    }

    async fn search(&mut self, fen: &str, limit: SearchLimit) -> Result<String, EngineError> {
        self.send(&format!("position fen {fen}")).await?;
        self.send(&limit.go_command()).await?;
        loop {
            let line = self.read_line().await?;
            if let Some(rest) = line.strip_prefix("bestmove") {
                let mv = rest
                    .split_whitespace()
                    .next()
                    .ok_or_else(|| EngineError::Compute("malformed bestmove line".into()))?;
                if mv == "(none)" {
                    return Err(EngineError::Compute(
                        "engine found no move for the position".into(),
                    ));
                }
                return Ok(mv.to_string());
            }
        }
    }

    async fn analyse(
        &mut self,
        fen: &str,
        count: usize,
        limit: SearchLimit,
    ) -> Result<Vec<ScoredLine>, EngineError> {
        self.send(&format!("setoption name MultiPV value {count}"))
            .await?;
        self.send(&format!("position fen {fen}")).await?;
        self.send(&limit.go_command()).await?;

        // The engine re-emits each ranked line at every depth; keep the
        // deepest report per rank.
        let mut by_rank: BTreeMap<u32, ScoredLine> = BTreeMap::new();
        loop {
            let line = self.read_line().await?;
            if line.starts_with("bestmove") {
                break;
            }
            if let Some((rank, scored)) = parse_info_line(&line) {
                by_rank.insert(rank, scored);
            }
        }

        self.send("setoption name MultiPV value 1").await?;
        Ok(by_rank.into_values().take(count).collect())
    }
}

#[async_trait]
impl ChessEngine for UciEngine {
    fn strength(&self) -> u32 {
        self.strength
    }

    fn state(&self) -> EngineState {
        self.state
    }

    async fn best_move(&mut self, fen: &str, limit: SearchLimit) -> Result<String, EngineError> {
        if self.state == EngineState::Terminated {
            return Err(EngineError::Compute("engine already terminated".into()));
        }
        self.state = EngineState::Busy;
        let result = self.search(fen, limit).await;
        if self.state != EngineState::Terminated {
            self.state = EngineState::Ready;
        }
        result
    }

    async fn top_lines(
        &mut self,
        fen: &str,
        count: usize,
        limit: SearchLimit,
    ) -> Result<Vec<ScoredLine>, EngineError> {
        if self.state == EngineState::Terminated {
            return Err(EngineError::Compute("engine already terminated".into()));
        }
        self.state = EngineState::Busy;
        let result = self.analyse(fen, count, limit).await;
        if self.state != EngineState::Terminated {
            self.state = EngineState::Ready;
        }
        result
    }

    async fn shutdown(&mut self) {
        self.state = EngineState::Terminated;

        // Ask nicely first; a wedged engine gets killed after the grace
        // period so the child is never leaked.
        let _ = self.stdin.write_all(b"quit\n").await;
        let _ = self.stdin.flush().await;

        match tokio::time::timeout(self.quit_grace, self.child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "engine exited"),
            Ok(Err(e)) => warn!("waiting for engine exit failed: {e}"),
            Err(_) => {
                warn!("engine did not exit after quit, killing");
                if let Err(e) = self.child.kill().await {
                    warn!("failed to kill engine process: {e}");
                }
            }
        }
    }
}

/// Parse one MultiPV `info` line into its rank and first move.
///
/// Returns `None` for lines without a `multipv`/`score`/`pv` triple
/// (currmove reports, hash stats, and so on).
fn parse_info_line(line: &str) -> Option<(u32, ScoredLine)> {
    if !line.starts_with("info") {
        return None;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let value_after = |key: &str| -> Option<&str> {
        tokens
            .iter()
            .position(|t| *t == key)
            .and_then(|i| tokens.get(i + 1))
            .copied()
    };

    let rank: u32 = value_after("multipv").unwrap_or("1").parse().ok()?;
    let uci_move = value_after("pv")?.to_string();
    let score = match value_after("score")? {
        "cp" => Score::Centipawns(value_after("cp")?.parse().ok()?),
        "mate" => Score::Mate(value_after("mate")?.parse().ok()?),
        _ => return None,
    };

    Some((rank, ScoredLine { uci_move, score }))
}
