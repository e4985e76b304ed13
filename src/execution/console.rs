//! Console sinks for the live step transcript.
//!
//! The transcript is what the person watching the build sees: progress of
//! pulls, container lifecycle lines, and the script's own output. It is kept
//! apart from `tracing` diagnostics.

use std::io::Write;
use std::sync::Mutex;

/// Destination for transcript lines. Lines arrive one at a time, in order,
/// and must be emitted immediately.
pub trait ConsoleSink: Send + Sync {
    /// Emits a single line. `line` carries no trailing newline.
    fn print_line(&self, line: &str);
}

/// Writes transcript lines to the process's stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl ConsoleSink for StdoutConsole {
    fn print_line(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            tracing::warn!(error = %e, "Failed to write console line");
        }
    }
}

/// Collects transcript lines in memory.
#[derive(Debug, Default)]
pub struct MemoryConsole {
    lines: Mutex<Vec<String>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every line printed so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Returns `true` if some printed line equals `line`.
    pub fn contains(&self, line: &str) -> bool {
        self.lines().iter().any(|l| l == line)
    }
}

impl ConsoleSink for MemoryConsole {
    fn print_line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_console_keeps_order() {
        let console = MemoryConsole::new();
        console.print_line("first");
        console.print_line("second");

        assert_eq!(console.lines(), vec!["first", "second"]);
        assert!(console.contains("second"));
        assert!(!console.contains("third"));
    }
}
