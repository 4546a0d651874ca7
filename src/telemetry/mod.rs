//! Rendering helpers for events and history errors destined for human-facing sinks.

use crate::event_bus::Event;
use crate::history::HistoryRecord;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta / dark pink
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_failed_history(&self, records: &[HistoryRecord]) -> Vec<EventRender>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PlainFormatter;

impl PlainFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = format!("{LINE_COLOR}{}{RESET_COLOR}\n", event);
        EventRender {
            context: event.scope_label().map(|s| s.to_string()),
            lines: vec![line],
        }
    }

    fn render_failed_history(&self, records: &[HistoryRecord]) -> Vec<EventRender> {
        records
            .iter()
            .filter(|r| r.status == crate::history::HistoryStatus::Failure)
            .map(|record| {
                let mut lines = Vec::new();
                let scope_str = format!("{CONTEXT_COLOR}node={}{RESET_COLOR}", record.node_id);
                lines.push(format!(
                    "[{}] {} | {}\n",
                    record.history_id, record.timestamp, scope_str
                ));
                if let Some(error) = &record.error {
                    lines.push(format!("{LINE_COLOR}  error: {}{RESET_COLOR}\n", error));
                }
                if !record.metadata.is_null() {
                    lines.push(format!(
                        "{LINE_COLOR}  metadata: {}{RESET_COLOR}\n",
                        record.metadata
                    ));
                }
                EventRender {
                    context: Some(record.node_id.to_string()),
                    lines,
                }
            })
            .collect()
    }
}
