use crate::backend::schemas::CommandSummary;
use crate::session::model::{
    event_label, snapshot_label, CommandSession, CommandStatus, Indicator, OutputLine,
};
use crate::transport::events::{OutputEvent, StatusEvent};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Read-only projection of one session, the only thing renderers see.
#[derive(Debug, Clone, Serialize)]
pub struct PanelView<'a> {
    pub id: &'a str,
    pub label: &'a str,
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    pub indicator: Indicator,
    pub input_enabled: bool,
    /// Absolute log index of `lines[0]`.
    pub first_line: usize,
    pub lines: &'a [OutputLine],
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SnapshotOutcome {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    /// Tracked as running but no longer known to the backend.
    pub orphaned: Vec<String>,
}

/// Owns every session seen during this client's lifetime, keyed by backend id.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: HashMap<String, CommandSession>,
    order: Vec<String>,
    // Bumped on every mutation; lets a snapshot tell stale state from fresh events.
    seq: u64,
}

impl SessionTracker {
    pub fn new() -> Self {
        Default::default()
    }

    fn touch(&mut self, id: &str) {
        self.seq += 1;
        let seq = self.seq;
        if let Some(session) = self.sessions.get_mut(id) {
            session.last_seq = seq;
        }
    }

    /// Creates the session if it is unknown. Returns `true` when it was created.
    fn ensure_session(&mut self, id: &str, label: impl FnOnce() -> String, is_interactive: bool) -> bool {
        if self.sessions.contains_key(id) {
            return false;
        }
        let session = CommandSession::new(id, label(), is_interactive);
        info!(command_id = %id, label = %session.label, interactive = is_interactive, "Tracking new command session");
        self.sessions.insert(id.to_string(), session);
        self.order.push(id.to_string());
        true
    }

    pub fn on_status_event(&mut self, event: &StatusEvent) -> bool {
        let id = event.command_id.as_str();
        let created = self.ensure_session(id, || event_label(id), event.is_server.unwrap_or(true));
        if let Some(session) = self.sessions.get_mut(id) {
            if !session.apply_status(event.status, event.returncode) {
                warn!(command_id = %id, current = %session.status, "Ignoring running status for a finished command");
            } else {
                debug!(command_id = %id, status = %event.status, returncode = ?event.returncode, "Applied status event");
            }
        }
        self.touch(id);
        created
    }

    pub fn on_output_event(&mut self, event: &OutputEvent) -> bool {
        let id = event.command_id.as_str();
        let created = self.ensure_session(id, || event_label(id), true);
        if let Some(session) = self.sessions.get_mut(id) {
            session.push_line(OutputLine::new(event.output.clone(), event.kind));
        }
        self.touch(id);
        created
    }

    /// Sequence number to hand back to `apply_snapshot` for a list request issued now.
    pub fn snapshot_marker(&self) -> u64 {
        self.seq
    }

    /// Reconciles local state with the backend's authoritative list.
    ///
    /// `issued_at` is the `snapshot_marker()` taken when the list was requested:
    /// running sessions missing from the list are only marked stopped if nothing
    /// was heard about them since.
    pub fn apply_snapshot(&mut self, entries: &[CommandSummary], issued_at: u64) -> SnapshotOutcome {
        let mut outcome = SnapshotOutcome::default();

        for entry in entries {
            let id = entry.command_id.as_str();
            let created = self.ensure_session(id, || snapshot_label(id, entry.pid), true);
            let session = match self.sessions.get_mut(id) {
                Some(session) => session,
                None => continue,
            };

            // A stop the backend rejected leaves the command running; show it again.
            let restored = session.stop_failed && entry.status == CommandStatus::Running;
            if restored {
                session.hidden = false;
                session.stop_failed = false;
                info!(command_id = %id, "Panel restored after failed stop");
            }

            let unchanged = !created && session.status == entry.status && session.exit_code == entry.returncode;
            let regression = session.status.is_terminal() && entry.status == CommandStatus::Running;
            if unchanged || (regression && !created) {
                if restored {
                    outcome.updated.push(id.to_string());
                }
                continue;
            }

            session.apply_status(entry.status, entry.returncode);
            self.touch(id);
            if created {
                outcome.created.push(id.to_string());
            } else {
                outcome.updated.push(id.to_string());
            }
        }

        let listed: HashSet<&str> = entries.iter().map(|e| e.command_id.as_str()).collect();
        let orphaned: Vec<String> = self
            .order
            .iter()
            .filter(|id| !listed.contains(id.as_str()))
            .filter(|id| {
                self.sessions
                    .get(id.as_str())
                    .map(|s| s.status == CommandStatus::Running && s.last_seq <= issued_at)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for id in &orphaned {
            if let Some(session) = self.sessions.get_mut(id) {
                warn!(command_id = %id, "Backend no longer lists a running command; marking it stopped");
                session.apply_status(CommandStatus::Stopped, None);
            }
            self.touch(id);
        }
        outcome.orphaned = orphaned;
        outcome
    }

    /// Hides the panel; the record is kept.
    /// Remembers that the backend refused to stop `id`, so the next snapshot
    /// listing it as running brings its panel back.
    pub fn mark_stop_failed(&mut self, id: &str) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.stop_failed = true;
        }
    }

    pub fn hide(&mut self, id: &str) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.hidden = true;
                true
            }
            None => {
                warn!(command_id = %id, "hide requested for unknown session");
                false
            }
        }
    }

    /// Empties the panel without touching the log.
    pub fn clear(&mut self, id: &str) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.view_start = session.output_log().len();
                true
            }
            None => {
                warn!(command_id = %id, "clear requested for unknown session");
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&CommandSession> {
        self.sessions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn input_enabled(&self, id: &str) -> bool {
        self.sessions.get(id).map(|s| s.input_enabled()).unwrap_or(false)
    }

    pub fn running_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.status == CommandStatus::Running)
            .count()
    }

    /// Running sessions in creation order.
    pub fn running_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.sessions
                    .get(id.as_str())
                    .map(|s| s.status == CommandStatus::Running)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Visible panels, newest first.
    pub fn panels(&self) -> Vec<PanelView<'_>> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.sessions.get(id))
            .filter(|s| !s.is_hidden())
            .map(|s| PanelView {
                id: &s.id,
                label: &s.label,
                status: s.status,
                exit_code: s.exit_code,
                indicator: Indicator::for_status(s.status, s.exit_code),
                input_enabled: s.input_enabled(),
                first_line: s.view_start,
                lines: s.visible_lines(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OutputKind;

    fn status(id: &str, status: CommandStatus, returncode: Option<i32>) -> StatusEvent {
        StatusEvent {
            command_id: id.to_string(),
            status,
            returncode,
            is_server: None,
            error: None,
        }
    }

    fn output(id: &str, text: &str, kind: OutputKind) -> OutputEvent {
        OutputEvent {
            command_id: id.to_string(),
            output: text.to_string(),
            kind,
        }
    }

    fn summary(id: &str, status: CommandStatus, returncode: Option<i32>, pid: Option<u32>) -> CommandSummary {
        CommandSummary {
            command_id: id.to_string(),
            status,
            returncode,
            pid,
        }
    }

    #[test]
    fn repeated_events_for_unseen_id_create_one_panel() {
        let mut tracker = SessionTracker::new();
        assert!(tracker.on_output_event(&output("c1", "a", OutputKind::Stdout)));
        assert!(!tracker.on_status_event(&status("c1", CommandStatus::Running, None)));
        assert!(!tracker.on_output_event(&output("c1", "b", OutputKind::Stderr)));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.panels().len(), 1);
    }

    #[test]
    fn output_before_status_creates_interactive_running_panel() {
        let mut tracker = SessionTracker::new();
        tracker.on_output_event(&output("c1", "hello", OutputKind::Stdout));

        let session = tracker.get("c1").unwrap();
        assert_eq!(session.label, "Command: c1");
        assert_eq!(session.output_log(), &[OutputLine::new("hello", OutputKind::Stdout)]);
        assert!(tracker.input_enabled("c1"));
        assert_eq!(tracker.running_count(), 1);
    }

    #[test]
    fn completion_locks_input_and_leaves_running_count() {
        let mut tracker = SessionTracker::new();
        tracker.on_output_event(&output("c1", "hello", OutputKind::Stdout));
        tracker.on_status_event(&status("c1", CommandStatus::Completed, Some(0)));

        let session = tracker.get("c1").unwrap();
        assert_eq!(
            session.output_log().last(),
            Some(&OutputLine::new("Completed successfully", OutputKind::Status))
        );
        assert!(!tracker.input_enabled("c1"));
        assert_eq!(tracker.running_count(), 0);

        // A contradictory running event does not re-enable input.
        tracker.on_status_event(&status("c1", CommandStatus::Running, None));
        assert!(!tracker.input_enabled("c1"));
        assert_eq!(tracker.get("c1").unwrap().status, CommandStatus::Completed);
    }

    #[test]
    fn nonzero_exit_is_reported_as_failure() {
        let mut tracker = SessionTracker::new();
        tracker.on_status_event(&status("c1", CommandStatus::Completed, Some(2)));
        assert_eq!(
            tracker.get("c1").unwrap().output_log().last().unwrap().text,
            "Failed with code 2"
        );
        assert_eq!(tracker.panels()[0].indicator, Indicator::Failed);
    }

    #[test]
    fn non_server_status_creates_read_only_panel() {
        let mut tracker = SessionTracker::new();
        let mut event = status("c1", CommandStatus::Running, None);
        event.is_server = Some(false);
        tracker.on_status_event(&event);
        assert!(!tracker.input_enabled("c1"));
        assert_eq!(tracker.running_count(), 1);
    }

    #[test]
    fn output_log_preserves_arrival_order() {
        let mut tracker = SessionTracker::new();
        tracker.on_output_event(&output("c1", "one", OutputKind::Stdout));
        tracker.on_output_event(&output("c2", "other", OutputKind::Stdout));
        tracker.on_output_event(&output("c1", "two", OutputKind::Stderr));
        tracker.on_status_event(&status("c1", CommandStatus::Stopped, None));
        tracker.on_output_event(&output("c1", "late", OutputKind::System));

        let texts: Vec<&str> = tracker
            .get("c1")
            .unwrap()
            .output_log()
            .iter()
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(texts, vec!["one", "two", "Stopped", "late"]);
        assert_eq!(tracker.get("c2").unwrap().output_log().len(), 1);
    }

    #[test]
    fn snapshot_is_idempotent() {
        let mut tracker = SessionTracker::new();
        let entries = vec![
            summary("c1", CommandStatus::Running, None, Some(100)),
            summary("c2", CommandStatus::Completed, Some(0), Some(101)),
        ];

        let marker = tracker.snapshot_marker();
        let first = tracker.apply_snapshot(&entries, marker);
        assert_eq!(first.created, vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(tracker.get("c1").unwrap().label, "Process ID: 100");
        assert_eq!(tracker.running_count(), 1);
        let log_len = tracker.get("c1").unwrap().output_log().len();

        let marker = tracker.snapshot_marker();
        let second = tracker.apply_snapshot(&entries, marker);
        assert_eq!(second, SnapshotOutcome::default());
        assert_eq!(tracker.panels().len(), 2);
        assert_eq!(tracker.running_count(), 1);
        assert_eq!(tracker.get("c1").unwrap().output_log().len(), log_len);
    }

    #[test]
    fn snapshot_updates_status_of_tracked_session() {
        let mut tracker = SessionTracker::new();
        tracker.on_status_event(&status("c1", CommandStatus::Running, None));
        let marker = tracker.snapshot_marker();
        let outcome = tracker.apply_snapshot(
            &[summary("c1", CommandStatus::Completed, Some(1), Some(5))],
            marker,
        );
        assert_eq!(outcome.updated, vec!["c1".to_string()]);
        // Label is fixed at creation.
        assert_eq!(tracker.get("c1").unwrap().label, "Command: c1");
        assert_eq!(tracker.running_count(), 0);
    }

    #[test]
    fn snapshot_stops_forgotten_sessions_but_not_fresh_ones() {
        let mut tracker = SessionTracker::new();
        tracker.on_status_event(&status("old", CommandStatus::Running, None));
        let marker = tracker.snapshot_marker();
        // Event that arrived while the list request was in flight.
        tracker.on_status_event(&status("fresh", CommandStatus::Running, None));

        let outcome = tracker.apply_snapshot(&[], marker);
        assert_eq!(outcome.orphaned, vec!["old".to_string()]);
        assert_eq!(tracker.get("old").unwrap().status, CommandStatus::Stopped);
        assert_eq!(tracker.get("fresh").unwrap().status, CommandStatus::Running);
        assert_eq!(tracker.running_count(), 1);
    }

    #[test]
    fn clear_hides_lines_without_truncating_log() {
        let mut tracker = SessionTracker::new();
        tracker.on_output_event(&output("c1", "a", OutputKind::Stdout));
        tracker.on_output_event(&output("c1", "b", OutputKind::Stdout));
        assert!(tracker.clear("c1"));
        tracker.on_output_event(&output("c1", "c", OutputKind::Stdout));

        let panels = tracker.panels();
        assert_eq!(panels[0].first_line, 2);
        assert_eq!(panels[0].lines, &[OutputLine::new("c", OutputKind::Stdout)]);
        assert_eq!(tracker.get("c1").unwrap().output_log().len(), 3);
    }

    #[test]
    fn hidden_panels_are_not_projected_and_unknown_ids_are_no_ops() {
        let mut tracker = SessionTracker::new();
        tracker.on_output_event(&output("c1", "a", OutputKind::Stdout));
        tracker.on_output_event(&output("c2", "b", OutputKind::Stdout));
        assert!(tracker.hide("c1"));
        assert!(!tracker.hide("nope"));
        assert!(!tracker.clear("nope"));

        let ids: Vec<&str> = tracker.panels().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["c2"]);
        assert!(tracker.contains("c1"));
    }

    #[test]
    fn snapshot_restores_panel_after_rejected_stop() {
        let mut tracker = SessionTracker::new();
        tracker.on_status_event(&status("c1", CommandStatus::Running, None));
        tracker.on_status_event(&status("c2", CommandStatus::Running, None));
        tracker.hide("c1");
        tracker.mark_stop_failed("c1");
        // A plain optimistic hide stays hidden.
        tracker.hide("c2");

        let marker = tracker.snapshot_marker();
        let outcome = tracker.apply_snapshot(
            &[
                summary("c1", CommandStatus::Running, None, Some(1)),
                summary("c2", CommandStatus::Running, None, Some(2)),
            ],
            marker,
        );
        assert_eq!(outcome.updated, vec!["c1".to_string()]);
        let ids: Vec<&str> = tracker.panels().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["c1"]);
        assert!(!tracker.get("c1").unwrap().stop_failed);
    }

    #[test]
    fn running_ids_follow_creation_order() {
        let mut tracker = SessionTracker::new();
        tracker.on_status_event(&status("a", CommandStatus::Running, None));
        tracker.on_status_event(&status("b", CommandStatus::Running, None));
        tracker.on_status_event(&status("c", CommandStatus::Running, None));
        tracker.on_status_event(&status("b", CommandStatus::Stopped, None));
        assert_eq!(tracker.running_ids(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(tracker.running_count(), 2);
    }
}
