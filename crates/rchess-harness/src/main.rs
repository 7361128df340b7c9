//! rchess-harness: runs several engine sessions side by side in one process
//! and prints what each of them said.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;

use rchess_core::{
    Script, SessionSetup, Transcript, drive_session, exit_status, open_session, run_concurrent, run_session,
};

#[derive(Parser, Debug)]
#[command(name = "rchess-harness", version, about = "Concurrent rchess session driver")]
struct Args {
    /// Number of sessions run concurrently before the foreground one
    #[arg(long, default_value_t = 3)]
    sessions: usize,

    /// Search threads per session
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Search time of each `go` in milliseconds
    #[arg(long, default_value_t = 200)]
    movetime: u64,

    /// Transposition table size per session in MB
    #[arg(long, default_value_t = 16)]
    hash: usize,

    /// Only run the foreground session
    #[arg(long)]
    skip_concurrent: bool,

    /// Attach a single session to stdin/stdout instead of scripting
    #[arg(long)]
    stdio: bool,

    /// Print transcripts as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    name: &'a str,
    status: i32,
    lines: &'a [String],
}

fn setup(name: &str, args: &Args) -> SessionSetup {
    SessionSetup::new(name)
        .with_option("Hash", &args.hash.to_string())
        .with_option("Threads", &args.threads.to_string())
}

fn print_transcript(out: &mut impl Write, transcript: &Transcript, json: bool) -> Result<()> {
    if json {
        let report = Report {
            name: &transcript.name,
            status: transcript.status,
            lines: &transcript.lines,
        };
        writeln!(out, "{}", serde_json::to_string(&report)?)?;
        return Ok(());
    }
    for line in &transcript.lines {
        writeln!(out, ">>> [{}] {line}", transcript.name)?;
    }
    writeln!(out, "=== [{}] status {}", transcript.name, transcript.status)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.stdio {
        let setup = setup("console", &args).with_banner(true);
        let result = run_session(setup, io::stdin(), io::stdout());
        let status = exit_status(&result);
        if status != 0 {
            std::process::exit(status);
        }
        return Ok(());
    }

    let script = Script::standard(args.threads, args.movetime);
    let mut transcripts = Vec::new();

    if !args.skip_concurrent && args.sessions > 0 {
        info!("starting {} concurrent sessions", args.sessions);
        let setups = (1..=args.sessions).map(|i| setup(&format!("session-{i}"), &args)).collect();
        transcripts.extend(run_concurrent(setups, &script));
    }

    info!("starting foreground session");
    let foreground = match open_session(setup("foreground", &args)) {
        Ok(session) => drive_session(session, &script),
        Err(e) => {
            log::error!("[foreground] {e}");
            Transcript {
                name: "foreground".to_string(),
                lines: Vec::new(),
                status: e.status(),
            }
        }
    };
    transcripts.push(foreground);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for transcript in &transcripts {
        print_transcript(&mut out, transcript, args.json).context("failed to write transcript")?;
    }
    out.flush()?;

    let worst = transcripts.iter().map(|t| t.status).find(|&s| s != 0).unwrap_or(0);
    if worst != 0 {
        std::process::exit(worst);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["rchess-harness"]);
        assert_eq!(args.sessions, 3);
        assert_eq!(args.threads, 2);
        assert!(!args.skip_concurrent && !args.stdio && !args.json);
    }

    #[test]
    fn test_text_transcript_format() {
        let transcript = Transcript {
            name: "s1".to_string(),
            lines: vec!["uciok".to_string(), "bestmove e2e4".to_string()],
            status: 0,
        };
        let mut buf = Vec::new();
        print_transcript(&mut buf, &transcript, false).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, ">>> [s1] uciok\n>>> [s1] bestmove e2e4\n=== [s1] status 0\n");

        let mut buf = Vec::new();
        print_transcript(&mut buf, &transcript, true).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["name"], "s1");
        assert_eq!(value["lines"][1], "bestmove e2e4");
    }
}
