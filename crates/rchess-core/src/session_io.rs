//! Line-oriented input and output channels of one session.
//!
//! Every session reads commands from its own stream and writes responses to
//! its own sink. Nothing here touches the process-wide stdin/stdout unless a
//! caller hands those streams in.

use std::fmt::Display;
use std::io::{self, BufRead, BufReader, Write};

use parking_lot::{Mutex, MutexGuard};

pub struct SessionIo {
    name: String,
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl SessionIo {
    pub fn new<R, W>(name: &str, input: R, output: W) -> Self
    where
        R: io::Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            name: name.to_string(),
            input: Mutex::new(Box::new(BufReader::new(input))),
            output: Mutex::new(Box::new(output)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads one line without its terminator. `Ok(None)` at end of input.
    pub fn read_line(&self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.input.lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }

    /// Writes one line and flushes.
    pub fn println(&self, line: &str) -> io::Result<()> {
        self.lock().line(line)
    }

    /// Like [`SessionIo::println`], but a closed sink is only logged: the
    /// search keeps running even if nobody listens any more.
    pub fn emit(&self, line: impl Display) {
        if let Err(e) = self.println(&line.to_string()) {
            log::warn!("[{}] output failed: {e}", self.name);
        }
    }

    /// Writes several lines without letting another writer interleave.
    pub fn emit_lines(&self, lines: &[String]) {
        let mut out = self.lock();
        for line in lines {
            if let Err(e) = out.line(line) {
                log::warn!("[{}] output failed: {e}", self.name);
                return;
            }
        }
    }

    /// Holds the output lock; lines written through the guard stay together.
    pub fn lock(&self) -> EmitGuard<'_> {
        EmitGuard {
            out: self.output.lock(),
        }
    }
}

pub struct EmitGuard<'a> {
    out: MutexGuard<'a, Box<dyn Write + Send>>,
}

impl EmitGuard<'_> {
    pub fn line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }
}

impl Drop for EmitGuard<'_> {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}

/// A cloneable in-memory sink for tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Capture(std::sync::Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Capture {
    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

#[cfg(test)]
impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_read_line_strips_terminators() {
        let io = SessionIo::new("t", &b"uci\r\nisready\nquit"[..], io::sink());
        assert_eq!(io.read_line().unwrap().as_deref(), Some("uci"));
        assert_eq!(io.read_line().unwrap().as_deref(), Some("isready"));
        assert_eq!(io.read_line().unwrap().as_deref(), Some("quit"));
        assert_eq!(io.read_line().unwrap(), None);
    }

    #[test]
    fn test_emitted_lines_stay_grouped() {
        let sink = Capture::default();
        let io = Arc::new(SessionIo::new("t", io::empty(), sink.clone()));
        std::thread::scope(|s| {
            for t in 0..4 {
                let io = Arc::clone(&io);
                s.spawn(move || {
                    for _ in 0..50 {
                        io.emit_lines(&[format!("begin {t}"), format!("end {t}")]);
                    }
                });
            }
        });
        let text = sink.text();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 400);
        for pair in lines.chunks(2) {
            let t = pair[0].strip_prefix("begin ").unwrap();
            assert_eq!(pair[1], format!("end {t}"));
        }
    }
}
