//! Live relay of container output to the console.

use futures::StreamExt;

use crate::error::DockerError;
use crate::execution::console::ConsoleSink;
use crate::execution::engine::LogChunks;

/// Splits one output chunk into console lines.
///
/// The chunk is decoded as UTF-8 (lossily), one trailing line terminator is
/// removed, and the rest is split on `\n`. Trailing empty lines are dropped,
/// but a chunk consisting of a bare newline still yields one empty line.
pub fn chunk_lines(chunk: &[u8]) -> Vec<String> {
    if chunk.is_empty() {
        return Vec::new();
    }

    let decoded = String::from_utf8_lossy(chunk);
    let text: &str = &decoded;
    let text = text
        .strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .or_else(|| text.strip_suffix('\r'))
        .unwrap_or(text);

    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect();
    while lines.len() > 1 && lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines
}

/// Forwards container output to a console, line by line, as it arrives.
pub struct LogRelay<'a> {
    console: &'a dyn ConsoleSink,
    lines: usize,
}

impl<'a> LogRelay<'a> {
    pub fn new(console: &'a dyn ConsoleSink) -> Self {
        Self { console, lines: 0 }
    }

    /// Drains `chunks` until the stream ends, printing each line immediately.
    ///
    /// Returns the number of lines relayed. A stream error ends the relay.
    pub async fn relay(&mut self, mut chunks: LogChunks) -> Result<usize, DockerError> {
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            for line in chunk_lines(&chunk) {
                self.console.print_line(&line);
                self.lines += 1;
            }
        }
        Ok(self.lines)
    }

    /// Lines relayed so far.
    pub fn lines(&self) -> usize {
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::console::MemoryConsole;
    use futures::stream;

    fn chunks(parts: &[&str]) -> LogChunks {
        let items: Vec<Result<Vec<u8>, DockerError>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(items).boxed()
    }

    #[test]
    fn test_chunk_lines_splits_and_chomps() {
        assert_eq!(chunk_lines(b"a\nb\n"), vec!["a", "b"]);
        assert_eq!(chunk_lines(b"c"), vec!["c"]);
        assert_eq!(chunk_lines(b"x\r\ny\r\n"), vec!["x", "y"]);
        assert_eq!(chunk_lines(b"a\n\nb"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_chunk_lines_edge_cases() {
        assert!(chunk_lines(b"").is_empty());
        assert_eq!(chunk_lines(b"\n"), vec![""]);
        assert_eq!(chunk_lines(b"a\n\n"), vec!["a"]);
        assert_eq!(chunk_lines(&[0x66, 0x6f, 0xff, b'\n']), vec!["fo\u{fffd}"]);
    }

    #[tokio::test]
    async fn test_relay_preserves_order() {
        let console = MemoryConsole::new();
        let mut relay = LogRelay::new(&console);

        let count = relay
            .relay(chunks(&["a\nb\n", "c", "Script result line 1\n"]))
            .await
            .expect("relay should finish");

        assert_eq!(count, 4);
        assert_eq!(relay.lines(), 4);
        assert_eq!(
            console.lines(),
            vec!["a", "b", "c", "Script result line 1"]
        );
        assert!(console.lines().iter().all(|l| !l.contains('\n')));
    }

    #[tokio::test]
    async fn test_relay_stops_on_stream_error() {
        let console = MemoryConsole::new();
        let mut relay = LogRelay::new(&console);
        let items: Vec<Result<Vec<u8>, DockerError>> = vec![
            Ok(b"before\n".to_vec()),
            Err(DockerError::InvalidResponse("connection reset".to_string())),
            Ok(b"after\n".to_vec()),
        ];

        let result = relay.relay(stream::iter(items).boxed()).await;

        assert!(result.is_err());
        assert_eq!(console.lines(), vec!["before"]);
    }
}
