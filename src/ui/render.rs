use crate::session::{OutputKind, OutputLine, PanelView};
use crate::ui::notify::{Notification, NotificationLevel};
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use uuid::Uuid;

/// Line-oriented projection of the panel set onto a terminal.
///
/// Re-rendering the same state writes nothing: every panel keeps a cursor into
/// its log, so only lines appended since the last pass are printed.
pub struct ConsoleRenderer<W: Write> {
    out: W,
    cursors: HashMap<String, usize>,
    last_running_count: Option<usize>,
    seen_notifications: HashSet<Uuid>,
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            cursors: HashMap::new(),
            last_running_count: None,
            seen_notifications: HashSet::new(),
        }
    }

    fn format_line(id: &str, line: &OutputLine) -> String {
        match line.kind {
            OutputKind::Status => format!("[{}] --- {} ---", id, line.text),
            OutputKind::Stderr | OutputKind::Error => format!("[{}] ! {}", id, line.text),
            OutputKind::Input => format!("[{}] > {}", id, line.text),
            OutputKind::Stdout | OutputKind::System => format!("[{}] {}", id, line.text),
        }
    }

    fn render_panel(&mut self, panel: &PanelView<'_>) -> io::Result<()> {
        let cursor = match self.cursors.get(panel.id) {
            Some(cursor) => *cursor,
            None => {
                writeln!(
                    self.out,
                    "==> {} [{}] input {}",
                    panel.label,
                    panel.id,
                    if panel.input_enabled { "enabled" } else { "disabled" }
                )?;
                0
            }
        };

        // Lines before `first_line` were cleared from the panel.
        let start = cursor.max(panel.first_line) - panel.first_line;
        for line in panel.lines.iter().skip(start) {
            writeln!(self.out, "{}", Self::format_line(panel.id, line))?;
        }
        self.cursors
            .insert(panel.id.to_string(), panel.first_line + panel.lines.len());
        Ok(())
    }

    pub fn render(
        &mut self,
        panels: &[PanelView<'_>],
        running_count: usize,
        notifications: &[Notification],
    ) -> io::Result<()> {
        // Oldest panel first so the newest output ends up at the bottom of the scrollback.
        for panel in panels.iter().rev() {
            self.render_panel(panel)?;
        }

        if self.last_running_count != Some(running_count) {
            writeln!(self.out, "Active commands: {}", running_count)?;
            self.last_running_count = Some(running_count);
        }

        for notification in notifications {
            if self.seen_notifications.insert(notification.id) {
                let tag = match notification.level {
                    NotificationLevel::Info => "info",
                    NotificationLevel::Success => "ok",
                    NotificationLevel::Warning => "warn",
                    NotificationLevel::Error => "error",
                };
                writeln!(self.out, "({}) {}", tag, notification.message)?;
            }
        }
        // Forget dismissed toasts so the set stays small.
        let live: HashSet<Uuid> = notifications.iter().map(|n| n.id).collect();
        self.seen_notifications.retain(|id| live.contains(id));

        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CommandStatus, SessionTracker};
    use crate::transport::{OutputEvent, StatusEvent};
    use crate::ui::notify::NotificationCenter;
    use chrono::Utc;
    use std::time::Duration;

    fn output(id: &str, text: &str, kind: OutputKind) -> OutputEvent {
        OutputEvent {
            command_id: id.into(),
            output: text.into(),
            kind,
        }
    }

    fn rendered(renderer: &mut ConsoleRenderer<Vec<u8>>) -> String {
        let text = String::from_utf8(renderer.out.clone()).unwrap();
        renderer.out.clear();
        text
    }

    #[test]
    fn renders_each_line_once() {
        let mut tracker = SessionTracker::new();
        let mut renderer = ConsoleRenderer::new(Vec::new());
        tracker.on_output_event(&output("c1", "hello", OutputKind::Stdout));
        tracker.on_output_event(&output("c1", "oops", OutputKind::Stderr));

        renderer.render(&tracker.panels(), tracker.running_count(), &[]).unwrap();
        assert_eq!(
            rendered(&mut renderer),
            "==> Command: c1 [c1] input enabled\n[c1] hello\n[c1] ! oops\nActive commands: 1\n"
        );

        renderer.render(&tracker.panels(), tracker.running_count(), &[]).unwrap();
        assert_eq!(rendered(&mut renderer), "");

        tracker.on_status_event(&StatusEvent {
            command_id: "c1".into(),
            status: CommandStatus::Completed,
            returncode: Some(0),
            is_server: None,
            error: None,
        });
        renderer.render(&tracker.panels(), tracker.running_count(), &[]).unwrap();
        assert_eq!(
            rendered(&mut renderer),
            "[c1] --- Completed successfully ---\nActive commands: 0\n"
        );
    }

    #[test]
    fn cleared_lines_are_not_replayed() {
        let mut tracker = SessionTracker::new();
        let mut renderer = ConsoleRenderer::new(Vec::new());
        tracker.on_output_event(&output("c1", "a", OutputKind::Stdout));
        tracker.on_output_event(&output("c1", "b", OutputKind::Stdout));
        tracker.clear("c1");
        tracker.on_output_event(&output("c1", "c", OutputKind::Input));

        renderer.render(&tracker.panels(), tracker.running_count(), &[]).unwrap();
        let text = rendered(&mut renderer);
        assert!(!text.contains("[c1] a"));
        assert!(text.contains("[c1] > c"));
    }

    #[test]
    fn notifications_are_shown_once() {
        let tracker = SessionTracker::new();
        let mut renderer = ConsoleRenderer::new(Vec::new());
        let mut center = NotificationCenter::new(Duration::from_secs(5));
        center.info("No active commands to stop");

        let now = Utc::now();
        renderer.render(&tracker.panels(), 0, center.active(now)).unwrap();
        assert!(rendered(&mut renderer).contains("(info) No active commands to stop"));
        renderer.render(&tracker.panels(), 0, center.active(now)).unwrap();
        assert_eq!(rendered(&mut renderer), "");
    }
}
