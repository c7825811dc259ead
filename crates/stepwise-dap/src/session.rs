//! Session state of one debug run
//!
//! Plain data plus synchronous mutations. No I/O happens here apart from
//! path canonicalisation, so it is tested in isolation from any backend.

use crate::constants::defaults;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Session shared between the adapter and the script backend loop.
pub type SharedSession = Arc<Mutex<SessionState>>;

#[derive(Debug, Clone)]
pub struct SessionState {
    thread_id: i64,
    current_file: Option<PathBuf>,
    /// 1-based; may sit one past `total_lines` once the program finished.
    current_line: u32,
    total_lines: u32,
    lines: Vec<String>,
    running: bool,
    breakpoints_by_file: HashMap<PathBuf, BTreeSet<u32>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            thread_id: defaults::THREAD_ID,
            current_file: None,
            current_line: 1,
            total_lines: 0,
            lines: Vec::new(),
            running: false,
            breakpoints_by_file: HashMap::new(),
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Record the launched program and its text. Resets the position to line 1.
    pub fn load_program(&mut self, file: PathBuf, text: &str) {
        self.lines = text.lines().map(str::to_string).collect();
        self.total_lines = self.lines.len() as u32;
        self.current_file = Some(file);
        self.current_line = 1;
        self.running = false;
    }

    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    pub fn current_file(&self) -> Option<&Path> {
        self.current_file.as_deref()
    }

    pub fn current_line(&self) -> u32 {
        self.current_line
    }

    pub fn total_lines(&self) -> u32 {
        self.total_lines
    }

    /// Text of the current line, empty past the end.
    pub fn current_text(&self) -> &str {
        self.line_text(self.current_line)
    }

    pub fn line_text(&self, line: u32) -> &str {
        line.checked_sub(1)
            .and_then(|idx| self.lines.get(idx as usize))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_past_end(&self) -> bool {
        self.current_line > self.total_lines
    }

    /// Replace the breakpoint set of `file`. Duplicates collapse.
    pub fn set_breakpoints(&mut self, file: PathBuf, lines: &[u32]) -> &BTreeSet<u32> {
        let set: BTreeSet<u32> = lines.iter().copied().collect();
        let entry = self.breakpoints_by_file.entry(file).or_default();
        *entry = set;
        entry
    }

    pub fn breakpoints(&self, file: &Path) -> Option<&BTreeSet<u32>> {
        self.breakpoints_by_file.get(file)
    }

    pub fn breakpoint_files(&self) -> impl Iterator<Item = (&Path, &BTreeSet<u32>)> {
        self.breakpoints_by_file
            .iter()
            .map(|(path, lines)| (path.as_path(), lines))
    }

    /// Whether the current line of the current file has a breakpoint.
    pub fn is_breakpoint(&self) -> bool {
        self.current_file
            .as_deref()
            .and_then(|file| self.breakpoints_by_file.get(file))
            .is_some_and(|set| set.contains(&self.current_line))
    }

    /// Whether `line` is a verifiable breakpoint line for `file`.
    ///
    /// Lines in the launched program must fall within its length; other
    /// files cannot be checked and are accepted.
    pub fn verify_line(&self, file: &Path, line: u32) -> bool {
        if self.current_file.as_deref() == Some(file) {
            (1..=self.total_lines).contains(&line)
        } else {
            true
        }
    }

    /// Move to the next line. Can step one past the end, which marks
    /// the program as finished.
    pub fn advance_line(&mut self) {
        if self.current_line <= self.total_lines {
            self.current_line += 1;
        }
    }

    /// Jump to `line`, clamped to `[1, total_lines]` when the length is known.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = if self.total_lines == 0 {
            line.max(1)
        } else {
            line.clamp(1, self.total_lines)
        };
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }
}

/// Canonicalise a path from the IDE so breakpoint keys match the
/// launched program. Falls back to the path as given.
pub fn normalize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
