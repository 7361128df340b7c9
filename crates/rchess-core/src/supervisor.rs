//! Drives sessions over private OS pipes.
//!
//! Each session gets its own pipe pair and its own runner thread. A script
//! is written into the command side while the response side is drained line
//! by line until the session closes it.

use std::io::{BufRead, BufReader, PipeReader, PipeWriter, Write};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::{SessionError, exit_status};
use crate::session::{SessionSetup, spawn_session};

/// Status reported for a runner thread that panicked.
pub const PANIC_STATUS: i32 = 101;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    Send(String),
    Pause(Duration),
    /// Holds back further input until a response line starts with `prefix`
    /// or `timeout` expires.
    Expect { prefix: String, timeout: Duration },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(mut self, line: &str) -> Self {
        self.steps.push(ScriptStep::Send(line.to_string()));
        self
    }

    pub fn pause(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Pause(duration));
        self
    }

    pub fn expect(mut self, prefix: &str, timeout: Duration) -> Self {
        self.steps.push(ScriptStep::Expect {
            prefix: prefix.to_string(),
            timeout,
        });
        self
    }

    /// Handshake, one timed search, then quit.
    pub fn standard(threads: usize, movetime_ms: u64) -> Self {
        Self::new()
            .send("uci")
            .expect("uciok", Duration::from_secs(5))
            .send(&format!("setoption name Threads value {threads}"))
            .send(&format!("go movetime {movetime_ms}"))
            .expect("bestmove", Duration::from_millis(movetime_ms) + Duration::from_secs(10))
            .send("quit")
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }
}

/// Everything a session wrote, and how it ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transcript {
    pub name: String,
    pub lines: Vec<String>,
    pub status: i32,
}

impl Transcript {
    fn failed(name: String, status: i32) -> Self {
        Self {
            name,
            lines: Vec::new(),
            status,
        }
    }
}

/// A running session and the far ends of its pipes.
pub struct PipedSession {
    name: String,
    commands: PipeWriter,
    responses: PipeReader,
    handle: JoinHandle<Result<(), SessionError>>,
}

impl PipedSession {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Opens a pipe pair and starts a session on it.
///
/// On failure every pipe end created so far is dropped, so no
/// half-started session is left behind.
pub fn open_session(setup: SessionSetup) -> Result<PipedSession, SessionError> {
    let name = setup.name().to_string();
    let (command_reader, commands) = std::io::pipe().map_err(SessionError::Pipe)?;
    let (responses, response_writer) = std::io::pipe().map_err(SessionError::Pipe)?;
    let handle = spawn_session(setup, command_reader, response_writer)?;
    log::debug!("[{name}] session opened");
    Ok(PipedSession {
        name,
        commands,
        responses,
        handle,
    })
}

/// Feeds `script` to the session, collects its output until the session
/// closes it, then joins the runner.
pub fn drive_session(session: PipedSession, script: &Script) -> Transcript {
    let PipedSession {
        name,
        commands,
        responses,
        handle,
    } = session;
    let (tx, rx) = crossbeam_channel::unbounded::<String>();

    let lines = thread::scope(|s| {
        let writer_name = name.clone();
        let spawned = thread::Builder::new()
            .name(format!("{name}-script"))
            .spawn_scoped(s, move || feed(commands, &writer_name, script, rx));
        if let Err(e) = spawned {
            // the command pipe went down with the closure; the session sees end of input
            log::error!("[{name}] failed to start script writer: {e}");
        }

        let mut lines = Vec::new();
        for line in BufReader::new(responses).lines() {
            match line {
                Ok(line) => {
                    let _ = tx.send(line.clone());
                    lines.push(line);
                }
                Err(e) => {
                    log::warn!("[{name}] read failed: {e}");
                    break;
                }
            }
        }
        drop(tx);
        lines
    });

    let status = match handle.join() {
        Ok(result) => exit_status(&result),
        Err(_) => {
            log::error!("[{name}] session thread panicked");
            PANIC_STATUS
        }
    };
    log::debug!("[{name}] session closed with status {status}");
    Transcript { name, lines, status }
}

fn feed(mut commands: PipeWriter, name: &str, script: &Script, responses: Receiver<String>) {
    for step in script.steps() {
        match step {
            ScriptStep::Send(line) => {
                if let Err(e) = writeln!(commands, "{line}") {
                    log::warn!("[{name}] command pipe closed: {e}");
                    return;
                }
            }
            ScriptStep::Pause(duration) => thread::sleep(*duration),
            ScriptStep::Expect { prefix, timeout } => {
                let deadline = Instant::now() + *timeout;
                loop {
                    match responses.recv_deadline(deadline) {
                        Ok(line) if line.starts_with(prefix.as_str()) => break,
                        Ok(_) => {}
                        Err(RecvTimeoutError::Timeout) => {
                            log::warn!("[{name}] no '{prefix}' within {timeout:?}");
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            }
        }
    }
}

/// Opens every session first so they all run at once, then drives each
/// one from its own thread.
pub fn run_concurrent(setups: Vec<SessionSetup>, script: &Script) -> Vec<Transcript> {
    thread::scope(|s| {
        let running: Vec<_> = setups
            .into_iter()
            .map(|setup| {
                let name = setup.name().to_string();
                let session = match open_session(setup) {
                    Ok(session) => session,
                    Err(e) => {
                        log::error!("[{name}] {e}");
                        return Err(Transcript::failed(name, e.status()));
                    }
                };
                thread::Builder::new()
                    .name(format!("{name}-driver"))
                    .spawn_scoped(s, move || drive_session(session, script))
                    .map_err(|e| {
                        log::error!("[{name}] failed to start driver: {e}");
                        Transcript::failed(name, SessionError::Spawn(e).status())
                    })
            })
            .collect();

        running
            .into_iter()
            .map(|driver| match driver {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Transcript::failed("?".to_string(), PANIC_STATUS)),
                Err(transcript) => transcript,
            })
            .collect()
    })
}
