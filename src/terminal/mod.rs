//! Terminal output delivery
//!
//! The display only accepts writes after it is mounted. `TerminalOutput`
//! sits in front of it and queues everything written while it is not ready,
//! then replays the queue in order the moment it becomes ready.

pub mod command;
#[cfg(feature = "desktop")]
pub mod commands;

pub use command::run_local_command;

use std::collections::VecDeque;

/// The mounted display
pub trait TerminalSink: Send {
    fn write(&mut self, chunk: &str);
    fn clear(&mut self);
    fn focus(&mut self) {}
}

/// Make sure a message ends with a line terminator so the next write does
/// not continue on the same line.
pub fn ensure_trailing_newline(value: &str) -> String {
    if value.is_empty() || value.ends_with('\n') {
        return value.to_string();
    }
    if value.ends_with('\r') {
        return format!("{}\n", value);
    }
    format!("{}\r\n", value)
}

/// Ready-gated writer with a FIFO of pending chunks
pub struct TerminalOutput {
    sink: Box<dyn TerminalSink>,
    ready: bool,
    pending: VecDeque<String>,
}

impl TerminalOutput {
    pub fn new(sink: Box<dyn TerminalSink>) -> Self {
        Self {
            sink,
            ready: false,
            pending: VecDeque::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Raw backend output, written as-is
    pub fn write_raw(&mut self, data: &str) {
        if data.is_empty() {
            return;
        }
        if self.ready {
            self.sink.write(data);
            self.sink.focus();
        } else {
            self.pending.push_back(data.to_string());
        }
    }

    /// A message produced locally, normalized to end with one line terminator
    pub fn write_line(&mut self, message: &str) {
        self.write_raw(&ensure_trailing_newline(message));
    }

    /// Drop queued output and clear the display, then optionally start over
    /// with a message.
    pub fn reset(&mut self, message: Option<&str>) {
        self.pending.clear();
        if self.ready {
            self.sink.clear();
        }
        if let Some(message) = message {
            self.write_line(message);
        }
    }

    /// Mount/unmount notification. Flushes the queue on the false→true edge.
    pub fn set_ready(&mut self, ready: bool) {
        let was_ready = self.ready;
        self.ready = ready;
        if !ready || was_ready || self.pending.is_empty() {
            return;
        }

        tracing::debug!("Flushing {} buffered terminal chunks", self.pending.len());
        for chunk in self.pending.drain(..) {
            self.sink.write(&chunk);
        }
        self.sink.focus();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingSink, SinkOp};
    use super::*;

    #[test]
    fn test_ensure_trailing_newline() {
        assert_eq!(ensure_trailing_newline(""), "");
        assert_eq!(ensure_trailing_newline("done"), "done\r\n");
        assert_eq!(ensure_trailing_newline("done\r"), "done\r\n");
        assert_eq!(ensure_trailing_newline("done\n"), "done\n");
        assert_eq!(ensure_trailing_newline("done\r\n"), "done\r\n");
    }

    #[test]
    fn test_buffered_chunks_flush_once_in_order() {
        let sink = RecordingSink::default();
        let mut output = TerminalOutput::new(Box::new(sink.clone()));

        for i in 0..5 {
            output.write_raw(&format!("chunk-{i}"));
        }
        assert!(sink.writes().is_empty());
        assert_eq!(output.pending_len(), 5);

        output.set_ready(true);
        output.set_ready(true);

        let expected: Vec<String> = (0..5).map(|i| format!("chunk-{i}")).collect();
        assert_eq!(sink.writes(), expected);
        assert_eq!(output.pending_len(), 0);
    }

    #[test]
    fn test_unmount_keeps_queueing() {
        let sink = RecordingSink::default();
        let mut output = TerminalOutput::new(Box::new(sink.clone()));
        output.set_ready(true);
        output.write_raw("a");

        output.set_ready(false);
        output.write_raw("b");
        output.write_raw("c");
        assert_eq!(sink.writes(), vec!["a"]);

        output.set_ready(true);
        assert_eq!(sink.writes(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reset_drops_queue_and_clears_mounted_sink() {
        let sink = RecordingSink::default();
        let mut output = TerminalOutput::new(Box::new(sink.clone()));
        output.write_raw("stale");
        output.reset(Some("fresh"));
        assert_eq!(output.pending_len(), 1);

        output.set_ready(true);
        output.reset(None);

        assert_eq!(
            *sink.ops.lock(),
            vec![SinkOp::Write("fresh\r\n".into()), SinkOp::Clear]
        );
    }

    #[test]
    fn test_raw_output_is_not_normalized() {
        let sink = RecordingSink::default();
        let mut output = TerminalOutput::new(Box::new(sink.clone()));
        output.set_ready(true);
        output.write_raw("$ ");
        output.write_line("note");
        assert_eq!(sink.transcript(), "$ note\r\n");
    }
}
