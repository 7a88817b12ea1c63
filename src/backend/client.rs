use crate::backend::schemas::*;
use crate::config::Config;
use crate::error::AppError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// The REST side of the command runner. Implemented over HTTP in production and
/// by in-memory fakes in tests.
#[async_trait]
pub trait CommandBackend: Send + Sync + 'static {
    async fn list_sessions(&self) -> Result<Vec<CommandSummary>, AppError>;
    async fn stop(&self, command_id: &str) -> Result<ActionResult, AppError>;
    async fn send_input(&self, command_id: &str, input: &str) -> Result<ActionResult, AppError>;
    async fn run_command(&self, command: &str) -> Result<RunOutcome, AppError>;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.backend_url.clone(),
            timeout: config.request_timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        Ok(self.base_url.join(path)?)
    }

    fn map_send_error(&self, err: reqwest::Error, action: &str) -> AppError {
        if err.is_timeout() {
            AppError::TimeoutError(format!("{} did not answer within {:?}", action, self.timeout))
        } else {
            AppError::ReqwestError(err)
        }
    }

    /// Sends the request and checks the `{success, message, ...}` envelope.
    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, action: &str) -> Result<ApiResponse<T>, AppError> {
        let response = request.send().await.map_err(|e| self.map_send_error(e, action))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_send_error(e, action))?;
        debug!(action = %action, http_status = %status, bytes = text.len(), "Backend responded");

        let envelope: ApiResponse<T> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            // Error pages are not JSON; report the HTTP status instead of a parse error.
            Err(_) if !status.is_success() => {
                return Err(AppError::BackendError(format!("{} failed with HTTP {}", action, status)));
            }
            Err(e) => return Err(e.into()),
        };

        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| format!("{} failed with HTTP {}", action, status));
            warn!(action = %action, http_status = %status, message = %message, "Backend reported failure");
            return Err(AppError::BackendError(message));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl CommandBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn list_sessions(&self) -> Result<Vec<CommandSummary>, AppError> {
        let request = self.client.get(self.endpoint(LIST_COMMANDS_PATH)?);
        let response: ApiResponse<ListCommandsBody> = self.call(request, "list commands").await?;
        Ok(response.body.commands)
    }

    #[instrument(skip(self))]
    async fn stop(&self, command_id: &str) -> Result<ActionResult, AppError> {
        let request = self
            .client
            .post(self.endpoint(STOP_COMMAND_PATH)?)
            .json(&StopCommandParams { command_id });
        let response: ApiResponse<Empty> = self.call(request, "stop command").await?;
        Ok(ActionResult {
            command_id: command_id.to_string(),
            message: response.message.unwrap_or_else(|| format!("Command {} stopped", command_id)),
        })
    }

    #[instrument(skip(self, input), fields(input_len = input.len()))]
    async fn send_input(&self, command_id: &str, input: &str) -> Result<ActionResult, AppError> {
        let request = self
            .client
            .post(self.endpoint(SEND_INPUT_PATH)?)
            .json(&SendInputParams { command_id, input });
        let response: ApiResponse<Empty> = self.call(request, "send input").await?;
        Ok(ActionResult {
            command_id: command_id.to_string(),
            message: response.message.unwrap_or_else(|| format!("Input sent to command {}", command_id)),
        })
    }

    #[instrument(skip(self))]
    async fn run_command(&self, command: &str) -> Result<RunOutcome, AppError> {
        if command.trim().is_empty() {
            return Err(AppError::InvalidInputArgument("No command provided".to_string()));
        }
        let request = self
            .client
            .post(self.endpoint(RUN_COMMAND_PATH)?)
            .json(&RunCommandParams { command });
        let response: ApiResponse<RunCommandBody> = self.call(request, "run command").await?;
        Ok(response.body.into())
    }
}
