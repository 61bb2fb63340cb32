// src/transaction/scriptlet.rs

//! Draining scriptlet output while the backend runs
//!
//! Scriptlets write into a [`ScriptletWriter`] handed to the backend. A
//! worker thread reads the other end of the pipe until end-of-stream,
//! appending what it reads to the shared [`ScriptletOutput`] and logging each
//! line. The engine drops the writer after the backend returns and joins the
//! worker.
//!
//! The writer counts the bytes it passes on and the worker counts the bytes
//! it consumes, so a reader of the output can wait until everything written
//! so far has arrived.

use crate::error::Result;
use std::io::{self, ErrorKind, PipeReader, PipeWriter, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{error, info};

#[derive(Debug, Default)]
struct OutputState {
    text: Vec<u8>,
    consumed: u64,
    closed: bool,
}

/// Output of the current scriptlet, shared between the worker and the engine
#[derive(Debug, Default)]
pub struct ScriptletOutput {
    state: Mutex<OutputState>,
    progress: Condvar,
    written: AtomicU64,
}

impl ScriptletOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state once the worker has consumed everything written so far
    fn settled(&self) -> MutexGuard<'_, OutputState> {
        let written = self.written.load(Ordering::Acquire);
        let guard = self.lock();
        self.progress
            .wait_while(guard, |state| !state.closed && state.consumed < written)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything written since the last [`clear`](Self::clear)
    pub fn last(&self) -> String {
        String::from_utf8_lossy(&self.settled().text).into_owned()
    }

    pub fn clear(&self) {
        self.settled().text.clear();
    }

    fn append(&self, bytes: &[u8]) {
        let mut state = self.lock();
        state.text.extend_from_slice(bytes);
        state.consumed += bytes.len() as u64;
        drop(state);
        self.progress.notify_all();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.progress.notify_all();
    }
}

/// Write end handed to the backend
pub struct ScriptletWriter {
    pipe: PipeWriter,
    output: Arc<ScriptletOutput>,
}

impl Write for ScriptletWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.pipe.write(buf)?;
        self.output.written.fetch_add(n as u64, Ordering::Release);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.pipe.flush()
    }
}

/// Background reader of scriptlet output
pub struct ScriptletDrain {
    handle: JoinHandle<Vec<String>>,
}

impl ScriptletDrain {
    /// Create the pipe and start the worker; returns the write end for the backend
    pub fn start(output: Arc<ScriptletOutput>) -> Result<(Self, ScriptletWriter)> {
        let (reader, pipe) = std::io::pipe()?;
        let shared = output.clone();
        let handle = thread::Builder::new()
            .name("scriptlet-output".to_string())
            .spawn(move || drain(reader, &shared))?;
        Ok((Self { handle }, ScriptletWriter { pipe, output }))
    }

    /// Wait for end-of-stream and return every line read
    ///
    /// All write ends must be dropped first or this blocks.
    pub fn finish(self) -> Vec<String> {
        match self.handle.join() {
            Ok(lines) => lines,
            Err(_) => {
                error!("Scriptlet output reader panicked");
                Vec::new()
            }
        }
    }
}

/// Marks the output closed however the worker exits
struct CloseOnExit<'a>(&'a ScriptletOutput);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn drain(mut reader: PipeReader, output: &ScriptletOutput) -> Vec<String> {
    let _close = CloseOnExit(output);
    let mut lines = Vec::new();
    let mut pending = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                output.append(&chunk[..n]);
                pending.extend_from_slice(&chunk[..n]);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    push_line(&mut lines, &line);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("Error reading scriptlet output: {}", e);
                break;
            }
        }
    }
    if !pending.is_empty() {
        push_line(&mut lines, &pending);
    }

    lines
}

fn push_line(lines: &mut Vec<String>, raw: &[u8]) {
    let line = String::from_utf8_lossy(raw).trim_end_matches(['\n', '\r']).to_string();
    info!("[scriptlet] {}", line);
    lines.push(line);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_collects_lines_and_buffer() {
        let output = ScriptletOutput::new();
        let (drain, mut writer) = ScriptletDrain::start(output.clone()).unwrap();

        writer.write_all(b"first line\nsecond").unwrap();
        drop(writer);

        let lines = drain.finish();
        assert_eq!(lines, vec!["first line", "second"]);
        assert_eq!(output.last(), "first line\nsecond");
    }

    #[test]
    fn test_drain_stops_when_writer_closed() {
        let output = ScriptletOutput::new();
        let (drain, writer) = ScriptletDrain::start(output.clone()).unwrap();
        drop(writer);

        assert!(drain.finish().is_empty());
        assert!(output.last().is_empty());
    }

    #[test]
    fn test_last_waits_for_written_bytes() {
        let output = ScriptletOutput::new();
        let (drain, mut writer) = ScriptletDrain::start(output.clone()).unwrap();

        // No newline and the writer stays open
        writer.write_all(b"partial").unwrap();
        assert_eq!(output.last(), "partial");

        output.clear();
        writer.write_all(b"next\n").unwrap();
        assert_eq!(output.last(), "next\n");

        drop(writer);
        assert_eq!(drain.finish(), vec!["partialnext"]);
    }
}
