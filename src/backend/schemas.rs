use crate::session::CommandStatus;
use serde::{Deserialize, Serialize};

pub const LIST_COMMANDS_PATH: &str = "/api/list-active-commands";
pub const STOP_COMMAND_PATH: &str = "/api/stop-command";
pub const SEND_INPUT_PATH: &str = "/api/send-input";
pub const RUN_COMMAND_PATH: &str = "/api/run-command";

#[derive(Debug, Serialize)]
pub struct StopCommandParams<'a> {
    pub command_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SendInputParams<'a> {
    pub command_id: &'a str,
    pub input: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RunCommandParams<'a> {
    pub command: &'a str,
}

/// Envelope every backend endpoint answers with, whatever the HTTP status.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

#[derive(Debug, Default, Deserialize)]
pub struct Empty {}

/// One entry of the backend's authoritative command list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSummary {
    pub command_id: String,
    pub status: CommandStatus,
    #[serde(default)]
    pub returncode: Option<i32>,
    #[serde(default)]
    pub pid: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListCommandsBody {
    #[serde(default)]
    pub commands: Vec<CommandSummary>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunCommandBody {
    #[serde(default)]
    pub command_id: Option<String>,
    #[serde(default)]
    pub is_server: bool,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub returncode: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub command_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RunOutcome {
    /// Short command that ran to completion inside the request.
    Finished {
        command_id: Option<String>,
        stdout: String,
        stderr: String,
        returncode: Option<i32>,
    },
    /// Long-running command; its output arrives over the event channel.
    Started { command_id: String, message: String },
}

impl From<RunCommandBody> for RunOutcome {
    fn from(body: RunCommandBody) -> Self {
        match (body.is_server, body.command_id) {
            (true, Some(command_id)) => RunOutcome::Started {
                message: format!("Command started with ID: {}", command_id),
                command_id,
            },
            (_, command_id) => RunOutcome::Finished {
                command_id,
                stdout: body.stdout.unwrap_or_default(),
                stderr: body.stderr.unwrap_or_default(),
                returncode: body.returncode,
            },
        }
    }
}
