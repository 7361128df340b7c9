//! UCI command loop of one session.
//!
//! Commands are read from the session's own [`SessionIo`] and applied to the
//! session's own pool and options. Malformed commands are logged and
//! skipped; only I/O and thread creation failures end the loop.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use chess::{Board, ChessMove};

use crate::error::SessionError;
use crate::limits::LimitsType;
use crate::options::OptionError;
use crate::position::{self, START_FEN, StateList};
use crate::search::{SearchContext, SearchParams};
use crate::session::SessionContext;
use crate::tablebases::EndgameTables;
use crate::thread::Worker;
use crate::thread_pool::ThreadPool;
use crate::types::{Depth, Value};

pub const ENGINE_NAME: &str = "rchess";
pub const ENGINE_AUTHOR: &str = "SH11235";

/// Parsed UCI command
#[derive(Debug, Clone, PartialEq)]
pub enum UciCommand {
    Uci,
    IsReady,
    SetOption { name: String, value: Option<String> },
    UciNewGame,
    /// `fen` is `None` for `startpos`.
    Position { fen: Option<String>, moves: Vec<String> },
    Go(GoParams),
    Stop,
    PonderHit,
    /// Debug print of the current position (`d`).
    Display,
    Quit,
    Unknown(String),
}

/// Parameters of `go`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoParams {
    pub wtime: Option<u64>,
    pub btime: Option<u64>,
    pub winc: Option<u64>,
    pub binc: Option<u64>,
    pub movestogo: Option<u32>,
    pub depth: Option<Depth>,
    pub nodes: Option<u64>,
    pub mate: Option<i32>,
    pub movetime: Option<u64>,
    pub infinite: bool,
    pub ponder: bool,
    pub searchmoves: Vec<String>,
}

impl GoParams {
    /// Builds the search limits.
    ///
    /// Unknown or illegal `searchmoves` match no root move, so a list made
    /// only of such moves leaves nothing to search.
    pub fn to_limits(&self, board: &Board) -> LimitsType {
        let mut limits = LimitsType::new();
        limits.time = [self.wtime.unwrap_or(0), self.btime.unwrap_or(0)];
        limits.inc = [self.winc.unwrap_or(0), self.binc.unwrap_or(0)];
        limits.movestogo = self.movestogo.unwrap_or(0);
        limits.depth = self.depth.unwrap_or(0);
        limits.nodes = self.nodes.unwrap_or(0);
        limits.mate = self.mate.unwrap_or(0);
        limits.movetime = self.movetime.unwrap_or(0);
        limits.infinite = self.infinite;
        limits.ponder = self.ponder;
        if !self.searchmoves.is_empty() {
            limits.searchmoves = Some(
                self.searchmoves
                    .iter()
                    .filter_map(|token| position::parse_move(board, token))
                    .collect(),
            );
        }
        limits
    }
}

/// Parses one input line. Empty lines yield `None`.
pub fn parse_uci_command(line: &str) -> Result<Option<UciCommand>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&head) = parts.first() else {
        return Ok(None);
    };

    let cmd = match head {
        "uci" => UciCommand::Uci,
        "isready" => UciCommand::IsReady,
        "ucinewgame" => UciCommand::UciNewGame,
        "stop" => UciCommand::Stop,
        "ponderhit" => UciCommand::PonderHit,
        "quit" => UciCommand::Quit,
        "d" => UciCommand::Display,
        "setoption" => parse_setoption(&parts[1..])?,
        "position" => parse_position(&parts[1..])?,
        "go" => UciCommand::Go(parse_go(&parts[1..])?),
        _ => UciCommand::Unknown(line.to_string()),
    };
    Ok(Some(cmd))
}

/// `setoption name <name...> [value <value...>]`
fn parse_setoption(parts: &[&str]) -> Result<UciCommand> {
    if parts.len() < 2 || parts[0] != "name" {
        bail!("Invalid setoption format");
    }
    let value_pos = parts.iter().position(|&p| p == "value");
    let name = parts[1..value_pos.unwrap_or(parts.len())].join(" ");
    let value = value_pos
        .map(|pos| parts[pos + 1..].join(" "))
        .filter(|v| !v.is_empty());
    Ok(UciCommand::SetOption { name, value })
}

/// `position (startpos | fen <fen...>) [moves <move...>]`
fn parse_position(parts: &[&str]) -> Result<UciCommand> {
    let moves_pos = parts.iter().position(|&p| p == "moves");
    let fen = match parts.first() {
        Some(&"startpos") => None,
        Some(&"fen") => {
            let end = moves_pos.unwrap_or(parts.len());
            if end <= 1 {
                bail!("position fen requires a FEN");
            }
            Some(parts[1..end].join(" "))
        }
        _ => bail!("position must start with 'startpos' or 'fen'"),
    };
    let moves = moves_pos
        .map(|pos| parts[pos + 1..].iter().map(|s| s.to_string()).collect())
        .unwrap_or_default();
    Ok(UciCommand::Position { fen, moves })
}

fn parse_go(parts: &[&str]) -> Result<GoParams> {
    fn value<T: std::str::FromStr>(parts: &[&str], i: usize) -> Result<T> {
        let token = parts.get(i).ok_or_else(|| anyhow!("go {} requires a value", parts[i - 1]))?;
        token
            .parse()
            .map_err(|_| anyhow!("Invalid {} value: {token}", parts[i - 1]))
    }

    let mut params = GoParams::default();
    let mut i = 0;
    while i < parts.len() {
        match parts[i] {
            "infinite" => params.infinite = true,
            "ponder" => params.ponder = true,
            "searchmoves" => {
                // consumes the rest of the line
                params.searchmoves = parts[i + 1..].iter().map(|s| s.to_string()).collect();
                break;
            }
            key @ ("wtime" | "btime" | "winc" | "binc" | "movetime" | "nodes") => {
                i += 1;
                let v: u64 = value(parts, i)?;
                match key {
                    "wtime" => params.wtime = Some(v),
                    "btime" => params.btime = Some(v),
                    "winc" => params.winc = Some(v),
                    "binc" => params.binc = Some(v),
                    "movetime" => params.movetime = Some(v),
                    _ => params.nodes = Some(v),
                }
            }
            "movestogo" => {
                i += 1;
                params.movestogo = Some(value(parts, i)?);
            }
            "depth" => {
                i += 1;
                params.depth = Some(value(parts, i)?);
            }
            "mate" => {
                i += 1;
                params.mate = Some(value(parts, i)?);
            }
            other => log::warn!("ignoring unknown go parameter: {other}"),
        }
        i += 1;
    }
    Ok(params)
}

// =============================================================================
// 出力の整形
// =============================================================================

pub fn engine_info() -> String {
    format!("{ENGINE_NAME} {}", env!("CARGO_PKG_VERSION"))
}

/// `info` lines for every reported principal variation of `w`.
pub fn pv_info(w: &Worker, ctx: &SearchContext<'_>, depth: Depth) -> Vec<String> {
    let elapsed = ctx.time().elapsed() + 1;
    let nodes = ctx.nodes_searched();
    let tb_hits = ctx.tb_hits();
    let hashfull = ctx.tt().hashfull();
    let multi_pv = ctx.multi_pv().min(w.root_moves.len());

    let mut lines = Vec::with_capacity(multi_pv);
    for (i, rm) in w.root_moves.iter().take(multi_pv).enumerate() {
        let updated = rm.score != -Value::INFINITE;
        if depth == 1 && !updated && i > 0 {
            continue;
        }

        let d = if updated { depth } else { (depth - 1).max(1) };
        let mut v = if updated { rm.uci_score } else { rm.previous_score };
        if v == -Value::INFINITE {
            v = Value::ZERO;
        }
        let tb = w.tb_config.root_in_tb && !v.is_decisive();
        if tb {
            v = rm.tb_score;
        }

        let mut line = format!(
            "info depth {d} seldepth {} multipv {} score {}",
            rm.sel_depth,
            i + 1,
            v.to_uci()
        );
        if i == w.pv_idx && !tb && updated {
            if rm.score_lowerbound {
                line.push_str(" lowerbound");
            } else if rm.score_upperbound {
                line.push_str(" upperbound");
            }
        }
        line.push_str(&format!(" nodes {nodes} nps {}", nodes * 1000 / elapsed));
        if elapsed > 1000 {
            line.push_str(&format!(" hashfull {hashfull}"));
        }
        line.push_str(&format!(" tbhits {tb_hits} time {elapsed} pv"));
        for mv in &rm.pv {
            line.push(' ');
            line.push_str(&mv.to_string());
        }
        lines.push(line);
    }
    lines
}

pub fn bestmove(best: Option<ChessMove>, ponder: Option<ChessMove>) -> String {
    match (best, ponder) {
        (None, _) => "bestmove (none)".to_string(),
        (Some(b), None) => format!("bestmove {b}"),
        (Some(b), Some(p)) => format!("bestmove {b} ponder {p}"),
    }
}

// =============================================================================
// UciLoop
// =============================================================================

pub struct UciLoop {
    pool: ThreadPool,
    session: Arc<SessionContext>,
    board: Board,
    /// History of the current position until the next `go` takes it.
    states: Option<StateList>,
}

impl UciLoop {
    pub fn new(pool: ThreadPool) -> Self {
        let session = Arc::clone(pool.session());
        let (board, states) = position::startpos();
        Self {
            pool,
            session,
            board,
            states: Some(states),
        }
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Processes commands until `quit` or end of input.
    pub fn run(&mut self) -> Result<(), SessionError> {
        let io = Arc::clone(self.session.io());
        loop {
            let Some(line) = io.read_line().map_err(SessionError::Io)? else {
                self.execute(UciCommand::Quit)?;
                return Ok(());
            };
            log::trace!("[{}] << {line}", io.name());
            match parse_uci_command(&line) {
                Ok(Some(cmd)) => {
                    if !self.execute(cmd)? {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("[{}] {e}: '{line}'", io.name()),
            }
        }
    }

    /// Applies one command. Returns `false` once the session should end.
    pub fn execute(&mut self, cmd: UciCommand) -> Result<bool, SessionError> {
        let session = Arc::clone(&self.session);
        let io = session.io();
        match cmd {
            UciCommand::Uci => {
                let options = session.options().read().to_string();
                let mut out = io.lock();
                out.line(&format!("id name {}", engine_info())).map_err(SessionError::Io)?;
                out.line(&format!("id author {ENGINE_AUTHOR}")).map_err(SessionError::Io)?;
                out.line("").map_err(SessionError::Io)?;
                for line in options.lines() {
                    out.line(line).map_err(SessionError::Io)?;
                }
                out.line("uciok").map_err(SessionError::Io)?;
            }
            UciCommand::IsReady => io.println("readyok").map_err(SessionError::Io)?,
            UciCommand::SetOption { name, value } => self.setoption(&name, value.as_deref().unwrap_or(""))?,
            UciCommand::UciNewGame => self.pool.search_clear(),
            UciCommand::Position { fen, moves } => {
                let fen = fen.as_deref().unwrap_or(START_FEN);
                match position::setup(fen, &moves) {
                    Ok((board, states)) => {
                        self.board = board;
                        self.states = Some(states);
                    }
                    Err(e) => log::warn!("[{}] {e}", io.name()),
                }
            }
            UciCommand::Go(params) => {
                let limits = params.to_limits(&self.board);
                let ponder = limits.ponder;
                self.pool.start_thinking(&self.board, &mut self.states, limits, ponder);
            }
            UciCommand::Stop => self.pool.stop(),
            UciCommand::PonderHit => self.pool.ponderhit(),
            UciCommand::Display => {
                let checkers: Vec<String> = self.board.checkers().map(|sq| sq.to_string()).collect();
                let mut out = io.lock();
                out.line(&format!("Fen: {}", self.board)).map_err(SessionError::Io)?;
                out.line(&format!("Key: {:016X}", self.board.get_hash()))
                    .map_err(SessionError::Io)?;
                out.line(&format!("Checkers: {}", checkers.join(" ")))
                    .map_err(SessionError::Io)?;
            }
            UciCommand::Quit => {
                self.pool.stop();
                return Ok(false);
            }
            UciCommand::Unknown(line) => {
                io.println(&format!("Unknown command: '{line}'"))
                    .map_err(SessionError::Io)?;
            }
        }
        Ok(true)
    }

    fn setoption(&mut self, name: &str, value: &str) -> Result<(), SessionError> {
        let session = Arc::clone(&self.session);
        if let Some(main) = self.pool.main() {
            main.wait_for_search_finished();
        }

        let result = session.options().write().set(name, value).map(str::to_string);
        let canonical = match result {
            Ok(canonical) => canonical,
            Err(e @ OptionError::Unknown(_)) => {
                return session.io().println(&e.to_string()).map_err(SessionError::Io);
            }
            Err(e) => {
                log::warn!("[{}] {e}", session.name());
                return Ok(());
            }
        };
        log::info!("[{}] option {canonical} = {value}", session.name());

        match canonical.as_str() {
            "Threads" => {
                let n = session.options().read().int("Threads").max(1) as usize;
                self.pool.set(n).map_err(SessionError::Spawn)?;
            }
            "Hash" => {
                let mb = session.options().read().int("Hash").max(1) as usize;
                session.tt().resize(mb, self.pool.size());
            }
            "Clear Hash" => self.pool.search_clear(),
            "SyzygyPath" => session.tablebases().init(value),
            name if SearchParams::is_tunable(name) => {
                let options = session.options().read();
                session.params().write().read_options(&options);
            }
            _ => {}
        }
        Ok(())
    }

    /// Stops any running search and joins every search thread.
    pub fn shutdown(&mut self) {
        self.pool.stop();
        if let Err(e) = self.pool.set(0) {
            log::error!("[{}] failed to release threads: {e}", self.session.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionSetup;
    use crate::session_io::{Capture, SessionIo};
    use regex::Regex;

    #[test]
    fn test_parse_setoption_with_spaces() {
        let cmd = parse_uci_command("setoption name Clear Hash").unwrap();
        assert_eq!(
            cmd,
            Some(UciCommand::SetOption {
                name: "Clear Hash".to_string(),
                value: None
            })
        );
        let cmd = parse_uci_command("setoption name SyzygyPath value /tb/a b").unwrap();
        assert_eq!(
            cmd,
            Some(UciCommand::SetOption {
                name: "SyzygyPath".to_string(),
                value: Some("/tb/a b".to_string())
            })
        );
    }

    #[test]
    fn test_parse_position_fen_and_moves() {
        let cmd = parse_uci_command("position fen 8/8/8/4k3/8/8/8/4K2R w K - 0 1 moves h1h8").unwrap();
        assert_eq!(
            cmd,
            Some(UciCommand::Position {
                fen: Some("8/8/8/4k3/8/8/8/4K2R w K - 0 1".to_string()),
                moves: vec!["h1h8".to_string()],
            })
        );
        assert!(parse_uci_command("position").is_err());
        assert!(parse_uci_command("position fen").is_err());
    }

    #[test]
    fn test_parse_go() {
        let Some(UciCommand::Go(go)) =
            parse_uci_command("go wtime 1000 btime 2000 winc 10 movestogo 5 ponder searchmoves e2e4 d2d4").unwrap()
        else {
            panic!("not a go command");
        };
        assert_eq!(go.wtime, Some(1000));
        assert_eq!(go.btime, Some(2000));
        assert_eq!(go.winc, Some(10));
        assert_eq!(go.movestogo, Some(5));
        assert!(go.ponder);
        assert_eq!(go.searchmoves, vec!["e2e4", "d2d4"]);

        let limits = go.to_limits(&Board::default());
        assert!(limits.use_time_management());
        assert_eq!(limits.searchmoves.as_ref().map(Vec::len), Some(2));

        assert!(parse_uci_command("go depth x").is_err());
        assert!(parse_uci_command("go movetime").is_err());
    }

    #[test]
    fn test_unknown_and_empty_lines() {
        assert_eq!(parse_uci_command("   ").unwrap(), None);
        assert_eq!(
            parse_uci_command("xyzzy 1").unwrap(),
            Some(UciCommand::Unknown("xyzzy 1".to_string()))
        );
    }

    #[test]
    fn test_bestmove_format() {
        let e4 = position::parse_move(&Board::default(), "e2e4");
        let board = Board::default().make_move_new(e4.unwrap());
        let e5 = position::parse_move(&board, "e7e5");
        assert_eq!(bestmove(None, None), "bestmove (none)");
        assert_eq!(bestmove(e4, None), "bestmove e2e4");
        assert_eq!(bestmove(e4, e5), "bestmove e2e4 ponder e7e5");
    }

    fn run_script(script: &str) -> String {
        let sink = Capture::default();
        let io = Arc::new(SessionIo::new("loop", std::io::Cursor::new(script.to_string()), sink.clone()));
        let session = Arc::new(SessionContext::new(SessionSetup::new("loop").with_option("Hash", "1"), io));
        let mut pool = ThreadPool::new(session);
        pool.set(1).unwrap();
        let mut uci = UciLoop::new(pool);
        uci.run().unwrap();
        uci.shutdown();
        assert_eq!(uci.pool().size(), 0);
        sink.text()
    }

    #[test]
    fn test_loop_handshake_and_errors() {
        let out = run_script("uci\nisready\nsetoption name Nope value 1\nfoo bar\nquit\nisready\n");
        let lines: Vec<_> = out.lines().collect();
        assert!(lines[0].starts_with("id name rchess"));
        assert!(lines.contains(&"option name Threads type spin default 1 min 1 max 1024"));
        assert!(lines.contains(&"uciok"));
        assert!(lines.contains(&"No such option: Nope"));
        assert!(lines.contains(&"Unknown command: 'foo bar'"));
        // nothing after quit is processed
        assert_eq!(lines.iter().filter(|l| **l == "readyok").count(), 1);
    }

    /// Runs `lines` through `execute` and waits for the search they start.
    fn run_search(lines: &[&str]) -> String {
        let sink = Capture::default();
        let io = Arc::new(SessionIo::new("go", std::io::empty(), sink.clone()));
        let session = Arc::new(SessionContext::new(SessionSetup::new("go").with_option("Hash", "1"), io));
        let mut pool = ThreadPool::new(session);
        pool.set(1).unwrap();
        let mut uci = UciLoop::new(pool);
        for line in lines {
            let cmd = parse_uci_command(line).unwrap().unwrap();
            assert!(uci.execute(cmd).unwrap());
        }
        uci.pool().main().unwrap().wait_for_search_finished();
        uci.shutdown();
        sink.text()
    }

    #[test]
    fn test_loop_searches_to_bestmove() {
        let out = run_search(&["setoption name Threads value 2", "position startpos moves e2e4", "go depth 3"]);
        let info = Regex::new(r"^info depth \d+ seldepth \d+ multipv 1 score (cp|mate) -?\d+").unwrap();
        assert!(out.lines().any(|l| info.is_match(l)), "{out}");
        let best = Regex::new(r"(?m)^bestmove [a-h][1-8][a-h][1-8][qrbn]?( ponder \S+)?$").unwrap();
        assert!(best.is_match(&out), "{out}");
    }

    #[test]
    fn test_checkmated_root_reports_none() {
        let out = run_search(&[
            "position fen rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
            "go depth 2",
        ]);
        let lines: Vec<_> = out.lines().collect();
        assert!(lines.contains(&"info depth 0 score mate 0"), "{out}");
        assert!(lines.contains(&"bestmove (none)"), "{out}");
    }

    #[test]
    fn test_illegal_searchmoves_leave_nothing_to_search() {
        let out = run_search(&["position startpos", "go depth 2 searchmoves e2e5"]);
        let lines: Vec<_> = out.lines().collect();
        assert!(lines.contains(&"info depth 0 score cp 0"), "{out}");
        assert_eq!(lines.last(), Some(&"bestmove (none)"), "{out}");
    }

    #[test]
    fn test_searchmoves_restrict_the_answer() {
        let out = run_search(&["position startpos", "go depth 2 searchmoves e2e5 g1f3"]);
        assert!(out.lines().any(|l| l.starts_with("bestmove g1f3")), "{out}");
    }
}
