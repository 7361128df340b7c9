//! Sessions driven over private pipes must never see each other's traffic.

use std::time::Duration;

use rchess_core::{Script, SessionSetup, drive_session, init_count, open_session, run_concurrent};
use regex::Regex;

fn small(name: &str) -> SessionSetup {
    SessionSetup::new(name).with_option("Hash", "1").with_option("Threads", "1")
}

#[test]
fn test_output_goes_only_to_its_own_session() {
    let a = open_session(small("a")).unwrap();
    let b = open_session(small("b")).unwrap();

    let talk = Script::new().send("uci").expect("uciok", Duration::from_secs(5)).send("quit");
    let silent = Script::new();

    // b gets no input at all: closing its command pipe ends it
    let (ta, tb) = std::thread::scope(|s| {
        let ha = s.spawn(|| drive_session(a, &talk));
        let hb = s.spawn(|| drive_session(b, &silent));
        (ha.join().unwrap(), hb.join().unwrap())
    });

    assert_eq!(ta.status, 0);
    assert_eq!(tb.status, 0);
    assert!(ta.lines.iter().any(|l| l.starts_with("id name rchess")));
    assert_eq!(ta.lines.last().map(String::as_str), Some("uciok"));
    assert!(tb.lines.is_empty(), "unexpected output in b: {:?}", tb.lines);
}

#[test]
fn test_option_changes_stay_in_one_session() {
    let a = open_session(small("opt-a")).unwrap();
    let b = open_session(small("opt-b")).unwrap();

    let search = |setup: Script| {
        setup
            .send("position startpos")
            .send("go depth 2")
            .expect("bestmove", Duration::from_secs(30))
            .send("quit")
    };
    // only a raises MultiPV; b must keep the default of 1
    let ta = drive_session(a, &search(Script::new().send("setoption name MultiPV value 3")));
    let tb = drive_session(b, &search(Script::new()));

    let has_multipv = |lines: &[String], n: usize| lines.iter().any(|l| l.contains(&format!(" multipv {n} ")));
    assert!(has_multipv(&ta.lines, 3), "{:?}", ta.lines);
    assert!(has_multipv(&tb.lines, 1));
    assert!(!has_multipv(&tb.lines, 2), "{:?}", tb.lines);
}

#[test]
fn test_many_concurrent_sessions_share_static_tables() {
    let setups: Vec<_> = (0..10).map(|i| small(&format!("c{i}"))).collect();
    let script = Script::standard(1, 50);
    let transcripts = run_concurrent(setups, &script);

    let bestmove = Regex::new(r"^bestmove ([a-h][1-8][a-h][1-8][qrbn]?|\(none\))( ponder [a-h][1-8][a-h][1-8][qrbn]?)?$")
        .unwrap();
    assert_eq!(transcripts.len(), 10);
    for (i, t) in transcripts.iter().enumerate() {
        assert_eq!(t.name, format!("c{i}"));
        assert_eq!(t.status, 0, "{} failed: {:?}", t.name, t.lines);
        let last = t.lines.last().expect("no output");
        assert!(bestmove.is_match(last), "{}: {last}", t.name);
        assert_eq!(t.lines.iter().filter(|l| l.starts_with("bestmove")).count(), 1);
    }
    assert_eq!(init_count(), 1);
}
