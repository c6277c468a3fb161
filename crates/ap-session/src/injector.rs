//! Agent command injection into a shared, free-running shell.
//!
//! The agent and the human type into the same PTY, so the only way to find
//! the agent's output is to bracket its command with sentinel lines. Each
//! run writes one line of the form
//!
//! ```text
//! printf '%s%s\n' '__AP_START_' '<token>__'; eval '<command>'; printf '%s%s\n' '__AP_END_' '<token>__'
//! ```
//!
//! The marker is split across two `printf` arguments so the terminal's echo
//! of the typed line never contains it; only the shell's actual output does.
//! The command is single-quoted and handed to `eval`, so a trailing comment,
//! backslash or dangling operator stays inside the command text and cannot
//! swallow the end marker. A syntax error only makes `eval` fail; the end
//! marker still prints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::output_buffer::OutputBuffer;
use crate::pipeline::OutputEvent;
use crate::registry::Session;

const START_PREFIX: &str = "__AP_START_";
const END_PREFIX: &str = "__AP_END_";
const MARKER_SUFFIX: &str = "__";

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

/// Source of per-run marker tokens. Tokens must never repeat while a
/// previous run's output could still arrive.
pub trait MarkerSource: Send + Sync {
    fn next_token(&self) -> String;
}

/// Monotonic counter plus a random component per run.
#[derive(Debug, Default)]
pub struct UniqueMarkers {
    counter: AtomicU64,
}

impl UniqueMarkers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkerSource for UniqueMarkers {
    fn next_token(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("{n}_{}", &random[..12])
    }
}

/// Deterministic tokens (`<prefix><n>`), for tests.
#[derive(Debug)]
pub struct SequentialMarkers {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialMarkers {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl MarkerSource for SequentialMarkers {
    fn next_token(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{n}", self.prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerPair {
    token: String,
    pub start: String,
    pub end: String,
}

impl MarkerPair {
    pub fn from_token(token: &str) -> Self {
        Self {
            token: token.to_string(),
            start: format!("{START_PREFIX}{token}{MARKER_SUFFIX}"),
            end: format!("{END_PREFIX}{token}{MARKER_SUFFIX}"),
        }
    }

    fn print_statement(&self, prefix: &str) -> String {
        format!("printf '%s%s\\n' '{prefix}' '{}{MARKER_SUFFIX}'", self.token)
    }

    /// The shell input that runs `command` between the markers.
    pub fn wrap(&self, command: &str) -> String {
        format!(
            "{}; eval {}; {}",
            self.print_statement(START_PREFIX),
            single_quote(command.trim()),
            self.print_statement(END_PREFIX)
        )
    }
}

/// POSIX single-quoting: each `'` becomes `'\''`, everything else is literal.
fn single_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

// ---------------------------------------------------------------------------
// MarkerScanner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    AwaitingStart,
    Capturing,
    Complete,
}

/// Incremental splitter over the raw output stream. Markers may arrive
/// split across any number of chunks.
///
/// The capture is bounded: past `limit` bytes the oldest are dropped and
/// only the most recent window is kept.
#[derive(Debug)]
pub struct MarkerScanner {
    markers: MarkerPair,
    state: ScanState,
    pending: Vec<u8>,
    captured: Vec<u8>,
    limit: usize,
    dropped: usize,
}

impl MarkerScanner {
    pub fn new(markers: MarkerPair) -> Self {
        Self::with_limit(markers, OutputBuffer::DEFAULT_CAPACITY)
    }

    pub fn with_limit(markers: MarkerPair, limit: usize) -> Self {
        // Must hold a whole end marker or a split one is never matched.
        let limit = limit.max(markers.end.len());
        Self {
            markers,
            state: ScanState::AwaitingStart,
            pending: Vec::new(),
            captured: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    /// Feed one chunk. Returns `true` once the end marker has been seen.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        match self.state {
            ScanState::AwaitingStart => {
                self.pending.extend_from_slice(chunk);
                let start = self.markers.start.as_bytes();
                match find(&self.pending, start) {
                    Some(pos) => {
                        let rest = self.pending.split_off(pos + start.len());
                        self.pending = Vec::new();
                        self.state = ScanState::Capturing;
                        self.capture(&rest);
                    }
                    None => {
                        // Keep just enough to match a marker split at the boundary.
                        let keep = start.len().saturating_sub(1);
                        if self.pending.len() > keep {
                            self.pending.drain(..self.pending.len() - keep);
                        }
                    }
                }
            }
            ScanState::Capturing => self.capture(chunk),
            ScanState::Complete => {}
        }
        self.is_complete()
    }

    fn capture(&mut self, bytes: &[u8]) {
        let end = self.markers.end.as_bytes();
        let search_from = self.captured.len().saturating_sub(end.len() - 1);
        self.captured.extend_from_slice(bytes);
        if let Some(pos) = find(&self.captured[search_from..], end) {
            self.captured.truncate(search_from + pos);
            self.state = ScanState::Complete;
        }
        if self.captured.len() > self.limit {
            let excess = self.captured.len() - self.limit;
            self.captured.drain(..excess);
            self.dropped += excess;
        }
    }

    /// Bytes cut from the front of the capture to respect the limit.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn has_started(&self) -> bool {
        self.state != ScanState::AwaitingStart
    }

    pub fn is_complete(&self) -> bool {
        self.state == ScanState::Complete
    }

    /// Captured text with CRLF folded to LF and surrounding whitespace trimmed.
    pub fn output(&self) -> String {
        let mut skip = 0;
        if self.dropped > 0 {
            // The cut may have landed inside a multi-byte character.
            while skip < self.captured.len() && (self.captured[skip] & 0xC0) == 0x80 {
                skip += 1;
            }
        }
        String::from_utf8_lossy(&self.captured[skip..])
            .replace("\r\n", "\n")
            .trim()
            .to_string()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ---------------------------------------------------------------------------
// CommandInjector
// ---------------------------------------------------------------------------

/// Result of one injected command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    pub text: String,
    /// The end marker did not show up in time; `text` is what arrived before
    /// the deadline.
    pub timed_out: bool,
}

/// Runs agent commands inside a live session and extracts their output.
pub struct CommandInjector {
    markers: Arc<dyn MarkerSource>,
    capture_limit: usize,
}

impl CommandInjector {
    pub fn new() -> Self {
        Self::with_markers(Arc::new(UniqueMarkers::new()))
    }

    pub fn with_markers(markers: Arc<dyn MarkerSource>) -> Self {
        Self {
            markers,
            capture_limit: OutputBuffer::DEFAULT_CAPACITY,
        }
    }

    /// Keep at most `bytes` of each run's output, the most recent ones.
    pub fn with_capture_limit(mut self, bytes: usize) -> Self {
        self.capture_limit = bytes;
        self
    }

    pub fn capture_limit(&self) -> usize {
        self.capture_limit
    }

    /// Inject `command` into `session` and wait for its output.
    ///
    /// Runs on one session are serialized: a second call writes nothing
    /// until the first has resolved. The timeout starts once this call owns
    /// the session. A timeout is not an error; the shell keeps running the
    /// command and stays usable.
    pub async fn run(
        &self,
        session: Option<Arc<Session>>,
        command: &str,
        timeout: Duration,
    ) -> Result<CapturedOutput> {
        let session = session.ok_or(SessionError::NoActiveSession)?;
        let _turn = session.injection_lock.lock().await;

        let process = session.process();
        if !process.is_alive() {
            return Err(SessionError::ProcessExited {
                code: process.exit_code(),
            });
        }

        let markers = MarkerPair::from_token(&self.markers.next_token());
        // Subscribe before writing so no output can slip past.
        let subscription = session.pipeline().subscribe();
        process.write_line(&markers.wrap(command))?;
        debug!(session = %session.id(), marker = %markers.start, command, "injected command");

        let deadline = tokio::time::Instant::now() + timeout;
        let mut scanner = MarkerScanner::with_limit(markers, self.capture_limit);
        loop {
            match tokio::time::timeout_at(deadline, subscription.recv()).await {
                Ok(Some(OutputEvent::Data(chunk))) => {
                    if scanner.feed(&chunk) {
                        let text = scanner.output();
                        info!(session = %session.id(), bytes = text.len(), "injected command finished");
                        return Ok(CapturedOutput {
                            text,
                            timed_out: false,
                        });
                    }
                }
                Ok(Some(OutputEvent::Exited { code })) => {
                    return Err(SessionError::ProcessExited { code });
                }
                Ok(None) => {
                    return Err(SessionError::ProcessExited {
                        code: process.exit_code(),
                    });
                }
                Err(_) => {
                    warn!(
                        session = %session.id(),
                        timeout_ms = timeout.as_millis() as u64,
                        started = scanner.has_started(),
                        dropped = scanner.dropped(),
                        "injected command timed out, returning partial output"
                    );
                    return Ok(CapturedOutput {
                        text: scanner.output(),
                        timed_out: true,
                    });
                }
            }
        }
    }
}

impl Default for CommandInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandInjector")
            .field("capture_limit", &self.capture_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> MarkerPair {
        MarkerPair::from_token("t1")
    }

    #[test]
    fn markers_are_distinct() {
        let p = pair();
        assert_eq!(p.start, "__AP_START_t1__");
        assert_eq!(p.end, "__AP_END_t1__");
        assert_ne!(p.start, p.end);
    }

    #[test]
    fn wrapped_line_never_contains_the_markers() {
        let p = pair();
        let line = p.wrap("echo hello");
        assert!(!line.contains(&p.start));
        assert!(!line.contains(&p.end));
        assert!(line.contains("; eval 'echo hello'; "));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn wrap_keeps_command_tail_inside_eval() {
        let p = pair();
        let line = p.wrap("echo hello # greet  ");
        assert!(line.contains("; eval 'echo hello # greet'; printf"));
        assert!(line.ends_with("'__AP_END_' 't1__'"));
        assert!(p.wrap("sleep 5 &").contains("; eval 'sleep 5 &'; printf"));
        assert!(p.wrap("ls |").contains("; eval 'ls |'; printf"));
        assert!(p.wrap(r"echo \").contains(r"; eval 'echo \'; printf"));
    }

    #[test]
    fn wrap_escapes_single_quotes() {
        let line = pair().wrap("echo 'a b'");
        assert!(line.contains(r"; eval 'echo '\''a b'\'''; "), "got: {line}");
    }

    #[test]
    fn unique_tokens_never_repeat() {
        let source = UniqueMarkers::new();
        let a = source.next_token();
        let b = source.next_token();
        assert_ne!(a, b);
        assert!(a.starts_with("0_"));
        assert!(b.starts_with("1_"));
    }

    #[test]
    fn sequential_tokens() {
        let source = SequentialMarkers::new("run");
        assert_eq!(source.next_token(), "run0");
        assert_eq!(source.next_token(), "run1");
    }

    #[test]
    fn scanner_extracts_between_markers() {
        let mut s = MarkerScanner::new(pair());
        assert!(!s.feed(b"$ printf ... echo hello\r\n"));
        assert!(!s.has_started());
        assert!(!s.feed(b"__AP_START_t1__\r\nhello\r\n"));
        assert!(s.has_started());
        assert!(s.feed(b"__AP_END_t1__\r\n$ "));
        assert_eq!(s.output(), "hello");
    }

    #[test]
    fn scanner_handles_markers_split_across_chunks() {
        let stream = b"noise __AP_START_t1__\r\nline one\r\nline two\r\n__AP_END_t1__\r\nprompt$ ";
        for split in 1..stream.len() {
            let mut s = MarkerScanner::new(pair());
            s.feed(&stream[..split]);
            assert!(s.feed(&stream[split..]), "split at {split}");
            assert_eq!(s.output(), "line one\nline two", "split at {split}");
        }
    }

    #[test]
    fn scanner_byte_at_a_time() {
        let stream = b"__AP_START_t1__\r\nabc\r\n__AP_END_t1__";
        let mut s = MarkerScanner::new(pair());
        let mut done = false;
        for b in stream.iter() {
            done = s.feed(std::slice::from_ref(b));
        }
        assert!(done);
        assert_eq!(s.output(), "abc");
    }

    #[test]
    fn scanner_ignores_other_tokens() {
        let mut s = MarkerScanner::new(pair());
        s.feed(b"__AP_START_t0__\r\nold\r\n__AP_END_t0__\r\n");
        assert!(!s.has_started());
        s.feed(b"__AP_START_t1__\r\nnew\r\n");
        assert!(!s.feed(b"__AP_END_t0__\r\n"));
        assert!(s.feed(b"__AP_END_t1__"));
        assert!(s.output().starts_with("new"));
        assert!(!s.output().contains("__AP_START_t1__"));
    }

    #[test]
    fn scanner_partial_output_before_end() {
        let mut s = MarkerScanner::new(pair());
        s.feed(b"__AP_START_t1__\r\npartial\r\n");
        assert!(!s.is_complete());
        assert_eq!(s.output(), "partial");
        // Further input after completion is ignored.
        s.feed(b"__AP_END_t1__");
        s.feed(b"more");
        assert_eq!(s.output(), "partial");
    }

    #[test]
    fn scanner_caps_captured_bytes() {
        let mut s = MarkerScanner::with_limit(pair(), 32);
        s.feed(b"__AP_START_t1__\r\n");
        for _ in 0..100 {
            assert!(!s.feed(b"y\r\ny\r\n"));
        }
        assert!(s.output().len() <= 32);
        assert!(s.dropped() > 0);
        // End marker split right where the window is cut.
        assert!(!s.feed(b"tail\r\n__AP_END"));
        assert!(s.feed(b"_t1__\r\n$ "));
        assert!(s.output().ends_with("tail"));
        assert!(s.output().len() <= 32);
    }

    #[test]
    fn scanner_limit_never_below_marker_length() {
        let mut s = MarkerScanner::with_limit(pair(), 0);
        s.feed(b"__AP_START_t1__xxxxxxxxxxxxxxxxxxxx__AP_E");
        assert!(s.feed(b"ND_t1__"));
    }

    #[test]
    fn capped_output_skips_split_character() {
        let mut s = MarkerScanner::with_limit(pair(), 15);
        s.feed(b"__AP_START_t1__");
        s.feed("ééééééééééé".as_bytes());
        assert!(s.dropped() > 0);
        assert!(!s.output().contains('\u{FFFD}'));
    }

    #[test]
    fn injector_capture_limit_defaults_to_buffer_capacity() {
        let injector = CommandInjector::new();
        assert_eq!(injector.capture_limit(), OutputBuffer::DEFAULT_CAPACITY);
        assert_eq!(injector.with_capture_limit(4096).capture_limit(), 4096);
    }

    #[tokio::test]
    async fn run_without_session_fails_fast() {
        let injector = CommandInjector::new();
        let err = injector
            .run(None, "echo hi", Duration::from_secs(1))
            .await
            .expect_err("no session");
        assert!(matches!(err, SessionError::NoActiveSession));
        assert_eq!(err.to_string(), "No active terminal. Open the terminal first.");
    }
}
