//! Runs the harness binary end to end.

use assert_cmd::Command;
use regex::Regex;

#[test]
fn test_concurrent_sessions_each_report_bestmove() {
    let output = Command::cargo_bin("rchess-harness")
        .unwrap()
        .args(["--sessions", "2", "--threads", "1", "--movetime", "50", "--hash", "1"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let bestmove = Regex::new(r"^>>> \[(session-1|session-2|foreground)\] bestmove \S+").unwrap();
    let names: Vec<_> = stdout
        .lines()
        .filter_map(|l| bestmove.captures(l).map(|c| c[1].to_string()))
        .collect();
    assert_eq!(names.len(), 3, "{stdout}");
    for name in ["session-1", "session-2", "foreground"] {
        assert!(names.iter().any(|n| n == name), "missing {name}: {stdout}");
        assert!(stdout.contains(&format!("=== [{name}] status 0")));
    }
}

#[test]
fn test_json_output_skips_concurrent_sessions() {
    let output = Command::cargo_bin("rchess-harness")
        .unwrap()
        .args(["--skip-concurrent", "--json", "--threads", "1", "--movetime", "50", "--hash", "1"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let reports: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["name"], "foreground");
    assert_eq!(reports[0]["status"], 0);
    let lines = reports[0]["lines"].as_array().unwrap();
    assert!(lines.iter().any(|l| l == "uciok"));
    assert!(lines.last().and_then(|l| l.as_str()).is_some_and(|l| l.starts_with("bestmove ")));
}

#[test]
fn test_stdio_mode_answers_on_console() {
    let output = Command::cargo_bin("rchess-harness")
        .unwrap()
        .args(["--stdio", "--hash", "1", "--threads", "1"])
        .write_stdin("isready\nquit\n")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<_> = stdout.lines().collect();
    assert!(lines[0].starts_with("rchess "), "{stdout}");
    assert_eq!(lines[1..], ["readyok"]);
}
