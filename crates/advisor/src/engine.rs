//! Streaming UCI engine wrapper (async I/O).
//!
//! The analysis panel feeds the currently displayed position in and consumes
//! candidate lines as they arrive; it never blocks on engine output. Engine
//! stderr is discarded and a dead engine just stops producing lines.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use tracing::debug;

use crate::error::AdvisorError;

/// One candidate line from the engine's current search.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineLine {
    pub depth: u32,
    /// 1-based rank of this line within the multi-PV set.
    pub multipv: u32,
    /// Centipawn score from the side to move's perspective.
    pub cp: Option<i32>,
    /// Mate in N (negative = getting mated).
    pub mate: Option<i32>,
    /// Principal variation in UCI notation.
    pub pv: Vec<String>,
}

impl EngineLine {
    pub fn best_move(&self) -> Option<&str> {
        self.pv.first().map(String::as_str)
    }
}

/// A UCI engine that has completed its handshake.
pub struct UciEngine {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl UciEngine {
    /// Spawn the engine binary and initialize UCI with `multipv` lines.
    pub async fn new(path: &str, multipv: u32) -> Result<Self, AdvisorError> {
        let mut process = Command::new(path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AdvisorError::Engine(format!("failed to spawn engine: {e}")))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| AdvisorError::Engine("engine stdin unavailable".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| AdvisorError::Engine("engine stdout unavailable".into()))?;

        let mut engine = Self {
            process,
            stdin,
            stdout: BufReader::new(stdout),
        };

        engine.send("uci").await?;
        engine.wait_for("uciok").await?;
        engine.send("setoption name Threads value 1").await?;
        engine
            .send(&format!("setoption name MultiPV value {multipv}"))
            .await?;
        engine.send("setoption name UCI_AnalyseMode value true").await?;
        engine.send("isready").await?;
        engine.wait_for("readyok").await?;

        Ok(engine)
    }

    async fn send(&mut self, cmd: &str) -> Result<(), AdvisorError> {
        debug!(cmd, "engine <");
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| AdvisorError::Engine(format!("failed to write to engine: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| AdvisorError::Engine(format!("failed to flush engine stdin: {e}")))?;
        Ok(())
    }

    async fn wait_for(&mut self, expected: &str) -> Result<(), AdvisorError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| AdvisorError::Engine(format!("failed to read from engine: {e}")))?;
            if n == 0 {
                return Err(AdvisorError::Engine("engine exited during handshake".into()));
            }
            let trimmed = line.trim();
            debug!(line = trimmed, "engine >");
            if trimmed == expected {
                return Ok(());
            }
        }
    }

    /// Split into a command handle and a stream of candidate lines. A reader
    /// task parses `info` output for as long as the receiver is alive.
    pub fn into_feed(self) -> (AnalysisHandle, mpsc::Receiver<EngineLine>) {
        let UciEngine {
            process,
            stdin,
            mut stdout,
        } = self;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut line = String::new();
            loop {
                line.clear();
                match stdout.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                if let Some(parsed) = parse_info_line(line.trim()) {
                    if tx.send(parsed).await.is_err() {
                        break;
                    }
                }
            }
        });

        (AnalysisHandle { process, stdin }, rx)
    }
}

/// Command side of a running feed.
pub struct AnalysisHandle {
    process: Child,
    stdin: ChildStdin,
}

impl AnalysisHandle {
    /// Point the search at a new position. Stops the previous search first;
    /// stale lines for the old position may still drain from the stream.
    pub async fn watch(&mut self, fen: &str) -> Result<(), AdvisorError> {
        self.send("stop").await?;
        self.send(&format!("position fen {fen}")).await?;
        self.send("go infinite").await?;
        Ok(())
    }

    pub async fn quit(mut self) -> Result<(), AdvisorError> {
        self.send("quit").await.ok();
        self.process
            .wait()
            .await
            .map_err(|e| AdvisorError::Engine(format!("engine did not exit: {e}")))?;
        Ok(())
    }

    async fn send(&mut self, cmd: &str) -> Result<(), AdvisorError> {
        debug!(cmd, "engine <");
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| AdvisorError::Engine(format!("failed to write to engine: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| AdvisorError::Engine(format!("failed to flush engine stdin: {e}")))?;
        Ok(())
    }
}

/// Parse a UCI `info` line carrying a PV. Returns `None` for anything else.
fn parse_info_line(line: &str) -> Option<EngineLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "info" {
        return None;
    }

    let mut depth = None;
    let mut multipv = 1;
    let mut cp = None;
    let mut mate = None;
    let mut pv = Vec::new();

    while let Some(token) = tokens.next() {
        match token {
            "depth" => depth = tokens.next().and_then(|t| t.parse().ok()),
            "multipv" => {
                if let Some(n) = tokens.next().and_then(|t| t.parse().ok()) {
                    multipv = n;
                }
            }
            "score" => match tokens.next() {
                Some("cp") => cp = tokens.next().and_then(|t| t.parse().ok()),
                Some("mate") => mate = tokens.next().and_then(|t| t.parse().ok()),
                _ => {}
            },
            "pv" => {
                pv = tokens.map(String::from).collect();
                break;
            }
            _ => {}
        }
    }

    if pv.is_empty() {
        return None;
    }
    Some(EngineLine {
        depth: depth?,
        multipv,
        cp,
        mate,
        pv,
    })
}
