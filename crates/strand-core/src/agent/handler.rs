//! Output sinks for a running thread

use parking_lot::Mutex;
use serde_json::Value;

use crate::tools::registry::StructuredToolResult;

/// Receives a thread's output as it is produced.
///
/// Text arrives once per exchange, already assembled.
pub trait MessageHandler: Send + Sync {
    fn handle_text(&self, text: &str);

    fn handle_thinking(&self, _thinking: &str) {}

    fn handle_tool_use(&self, _call_id: &str, _tool_name: &str, _input: &Value) {}

    fn handle_tool_result(&self, _call_id: &str, _tool_name: &str, _result: &StructuredToolResult) {}

    /// Called once when a main thread finishes `send_message`
    fn handle_done(&self) {}
}

/// Discards everything
pub struct NoopHandler;

impl MessageHandler for NoopHandler {
    fn handle_text(&self, _text: &str) {}
}

/// Collects text into a string (used by compaction and summaries)
#[derive(Default)]
pub struct StringCollector {
    text: Mutex<String>,
}

impl StringCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }
}

impl MessageHandler for StringCollector {
    fn handle_text(&self, text: &str) {
        let mut buf = self.text.lock();
        if !buf.is_empty() && !text.is_empty() {
            buf.push('\n');
        }
        buf.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_joins_text_with_newlines() {
        let collector = StringCollector::new();
        collector.handle_text("first");
        collector.handle_text("");
        collector.handle_text("second");
        assert_eq!(collector.text(), "first\nsecond");
    }
}
