use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a backend command as reported by status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Running,
    Completed,
    Stopped,
    // Anything the backend sends that we do not recognise is treated as a failure.
    #[serde(other)]
    Error,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CommandStatus::Running)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Running => "running",
            CommandStatus::Completed => "completed",
            CommandStatus::Stopped => "stopped",
            CommandStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Classification of a single line in a session's output log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Stderr,
    /// Synthesised locally from a status change.
    Status,
    /// Start/finish banners emitted by the backend.
    System,
    /// Backend echo of input delivered to the process.
    Input,
    Error,
    // Unknown kinds from the backend are shown as ordinary output.
    #[default]
    #[serde(other)]
    Stdout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub text: String,
    pub kind: OutputKind,
}

impl OutputLine {
    pub fn new(text: impl Into<String>, kind: OutputKind) -> Self {
        Self { text: text.into(), kind }
    }
}

/// Status dot shown in a panel header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl Indicator {
    pub fn for_status(status: CommandStatus, exit_code: Option<i32>) -> Self {
        match status {
            CommandStatus::Running => Indicator::Running,
            CommandStatus::Completed if exit_code.unwrap_or(0) == 0 => Indicator::Completed,
            CommandStatus::Completed | CommandStatus::Error => Indicator::Failed,
            CommandStatus::Stopped => Indicator::Stopped,
        }
    }
}

/// Human-readable line appended to the log whenever a status is applied.
pub fn status_line(status: CommandStatus, exit_code: Option<i32>) -> String {
    match (status, exit_code) {
        (CommandStatus::Completed, Some(0)) => "Completed successfully".to_string(),
        (CommandStatus::Completed, Some(code)) => format!("Failed with code {}", code),
        (CommandStatus::Completed, None) => "Completed".to_string(),
        (CommandStatus::Stopped, _) => "Stopped".to_string(),
        (CommandStatus::Running, _) => "Running".to_string(),
        (CommandStatus::Error, _) => "Error".to_string(),
    }
}

pub fn event_label(command_id: &str) -> String {
    format!("Command: {}", command_id)
}

pub fn snapshot_label(command_id: &str, pid: Option<u32>) -> String {
    match pid {
        Some(pid) => format!("Process ID: {}", pid),
        None => event_label(command_id),
    }
}

/// One backend-tracked process and everything the client has seen about it.
#[derive(Debug, Clone)]
pub struct CommandSession {
    pub id: String,
    pub label: String,
    pub is_interactive: bool,
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    output_log: Vec<OutputLine>,
    input_locked: bool,
    pub(crate) hidden: bool,
    /// Set when a stop request for this session was rejected by the backend.
    pub(crate) stop_failed: bool,
    // Panel-local clear: index of the first log line still shown.
    pub(crate) view_start: usize,
    pub(crate) last_seq: u64,
}

impl CommandSession {
    pub fn new(id: impl Into<String>, label: impl Into<String>, is_interactive: bool) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            is_interactive,
            status: CommandStatus::Running,
            exit_code: None,
            output_log: Vec::new(),
            input_locked: false,
            hidden: false,
            stop_failed: false,
            view_start: 0,
            last_seq: 0,
        }
    }

    pub fn output_log(&self) -> &[OutputLine] {
        &self.output_log
    }

    pub fn visible_lines(&self) -> &[OutputLine] {
        &self.output_log[self.view_start..]
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn input_enabled(&self) -> bool {
        self.is_interactive && !self.input_locked
    }

    pub(crate) fn push_line(&mut self, line: OutputLine) {
        self.output_log.push(line);
    }

    /// Applies a status and logs its line. Terminal states lock input for good
    /// and are never regressed back to running.
    pub(crate) fn apply_status(&mut self, status: CommandStatus, exit_code: Option<i32>) -> bool {
        self.push_line(OutputLine::new(status_line(status, exit_code), OutputKind::Status));

        if self.status.is_terminal() && status == CommandStatus::Running {
            return false;
        }
        self.status = status;
        if status == CommandStatus::Completed || exit_code.is_some() {
            self.exit_code = exit_code;
        }
        if status.is_terminal() {
            self.input_locked = true;
        }
        true
    }
}
