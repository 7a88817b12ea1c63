use crate::backend::{ActionResult, CommandBackend, CommandSummary, RunOutcome};
use crate::config::{Config, TransportMode};
use crate::error::AppError;
use crate::session::{CommandStatus, SessionTracker};
use crate::transport::TransportEvent;
use crate::ui::{ConsoleRenderer, NotificationCenter};
use crate::utils::EventAuditLogger;
use chrono::Utc;
use serde_json::{json, Value};
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// Control actions a user can trigger from the terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    Stop(String),
    SendInput { command_id: String, text: String },
    Clear(String),
    /// `confirmed` carries the user's answer to the "stop everything?" prompt.
    StopAll { confirmed: bool },
    Refresh,
    Run(String),
    Quit,
}

/// Result of a backend call spawned by a handler, fed back into the loop.
#[derive(Debug)]
enum Completion {
    Listed {
        issued_at: u64,
        result: Result<Vec<CommandSummary>, AppError>,
    },
    Stopped {
        command_id: String,
        result: Result<ActionResult, AppError>,
    },
    InputSent {
        command_id: String,
        result: Result<ActionResult, AppError>,
    },
    Ran {
        command: String,
        result: Result<RunOutcome, AppError>,
    },
}

async fn bounded<T>(
    limit: Duration,
    action: &str,
    call: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AppError::TimeoutError(format!(
            "{} did not answer within {:?}",
            action, limit
        ))),
    }
}

/// Single owner of the session map. Every mutation goes through one of the
/// handlers below, each of which runs to completion before the next starts.
pub struct TerminalController<B: CommandBackend> {
    backend: Arc<B>,
    tracker: SessionTracker,
    notifications: NotificationCenter,
    audit: Option<EventAuditLogger>,
    reconcile_interval: Duration,
    request_timeout: Duration,
    // Poll-only clients never stop polling; with live events the timer is
    // disarmed once the last running command has been stopped.
    disarm_when_idle: bool,
    polling_armed: bool,
    reconcile_in_flight: bool,
    reconcile_failing: bool,
    in_flight: usize,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl<B: CommandBackend> TerminalController<B> {
    pub fn new(config: &Config, backend: Arc<B>) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            tracker: SessionTracker::new(),
            notifications: NotificationCenter::new(config.notification_ttl),
            audit: EventAuditLogger::from_config(config),
            reconcile_interval: config.reconcile_interval,
            request_timeout: config.request_timeout,
            disarm_when_idle: config.transport_mode == TransportMode::Socket,
            polling_armed: true,
            reconcile_in_flight: false,
            reconcile_failing: false,
            in_flight: 0,
            completions_tx,
            completions_rx,
        }
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn polling_armed(&self) -> bool {
        self.polling_armed
    }

    async fn record(&self, kind: &str, payload: Value) {
        if let Some(audit) = &self.audit {
            audit.log_event(kind, &payload).await;
        }
    }

    fn spawn_call(&mut self, call: impl Future<Output = Completion> + Send + 'static) {
        self.in_flight += 1;
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            // The receiver lives as long as the controller.
            let _ = tx.send(call.await);
        });
    }

    pub async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Status(status) => {
                self.record("command_status", json!(status)).await;
                self.tracker.on_status_event(&status);
                if status.status == CommandStatus::Running {
                    self.polling_armed = true;
                }
            }
            TransportEvent::Output(output) => {
                self.record("command_output", json!(output)).await;
                if self.tracker.on_output_event(&output) {
                    self.polling_armed = true;
                }
            }
            TransportEvent::Connected => {
                info!("Event channel connected");
            }
            TransportEvent::ConnectError(message) => {
                self.record("connect_error", json!({ "message": message })).await;
                self.notifications.error(format!("Connection error: {}", message));
            }
            TransportEvent::Disconnected(reason) => {
                self.record("disconnected", json!({ "reason": reason })).await;
                self.notifications.warning(format!("Disconnected from server: {}", reason));
            }
            TransportEvent::Reconnected { attempts } => {
                self.record("reconnected", json!({ "attempts": attempts })).await;
                info!(attempts, "Reconnected to server after {} attempts", attempts);
                self.notifications.success("Reconnected to server");
                self.reconcile();
            }
        }
    }

    /// Requests the backend's authoritative list; the result is applied when it arrives.
    #[instrument(skip(self))]
    pub fn reconcile(&mut self) {
        if self.reconcile_in_flight {
            debug!("Reconciliation already in flight");
            return;
        }
        self.reconcile_in_flight = true;
        let issued_at = self.tracker.snapshot_marker();
        let backend = self.backend.clone();
        let limit = self.request_timeout;
        self.spawn_call(async move {
            let result = bounded(limit, "list commands", backend.list_sessions()).await;
            Completion::Listed { issued_at, result }
        });
    }

    #[instrument(skip(self))]
    pub async fn stop(&mut self, command_id: &str) {
        self.record("stop", json!({ "command_id": command_id })).await;
        if !self.tracker.contains(command_id) {
            warn!(command_id = %command_id, "Stop requested for unknown command");
            self.notifications
                .warning(format!("No terminal found for command {}", command_id));
            return;
        }
        let backend = self.backend.clone();
        let limit = self.request_timeout;
        let command_id = command_id.to_string();
        self.spawn_call(async move {
            let result = bounded(limit, "stop command", backend.stop(&command_id)).await;
            Completion::Stopped { command_id, result }
        });
    }

    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn send_input(&mut self, command_id: &str, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if !self.tracker.contains(command_id) {
            warn!(command_id = %command_id, "Input for unknown command dropped");
            self.notifications
                .warning(format!("No terminal found for command {}", command_id));
            return;
        }
        if !self.tracker.input_enabled(command_id) {
            warn!(command_id = %command_id, "Input rejected: input is disabled for this command");
            self.notifications
                .warning(AppError::InputDisabled(command_id.to_string()).to_string());
            return;
        }
        self.record("send_input", json!({ "command_id": command_id, "input": text })).await;
        let backend = self.backend.clone();
        let limit = self.request_timeout;
        let command_id = command_id.to_string();
        let text = text.to_string();
        self.spawn_call(async move {
            let result = bounded(limit, "send input", backend.send_input(&command_id, &text)).await;
            Completion::InputSent { command_id, result }
        });
    }

    /// Issues one independent stop per running command.
    pub async fn stop_all(&mut self, confirmed: bool) {
        let running = self.tracker.running_ids();
        if running.is_empty() {
            self.notifications.info("No active commands to stop");
            return;
        }
        if !confirmed {
            debug!(count = running.len(), "Stop all cancelled by user");
            return;
        }
        info!(count = running.len(), "Stopping all active commands");
        for command_id in running {
            self.stop(&command_id).await;
        }
    }

    pub async fn clear(&mut self, command_id: &str) {
        self.record("clear", json!({ "command_id": command_id })).await;
        if !self.tracker.clear(command_id) {
            self.notifications
                .warning(format!("No terminal found for command {}", command_id));
        }
    }

    #[instrument(skip(self))]
    pub async fn run_command(&mut self, command: &str) {
        let command = command.trim();
        if command.is_empty() {
            self.notifications.warning("No command provided");
            return;
        }
        self.record("run_command", json!({ "command": command })).await;
        let backend = self.backend.clone();
        let limit = self.request_timeout;
        let command = command.to_string();
        self.spawn_call(async move {
            let result = bounded(limit, "run command", backend.run_command(&command)).await;
            Completion::Ran { command, result }
        });
    }

    /// Returns `false` when the user asked to quit.
    pub async fn handle_action(&mut self, action: UserAction) -> bool {
        match action {
            UserAction::Stop(command_id) => self.stop(&command_id).await,
            UserAction::SendInput { command_id, text } => self.send_input(&command_id, &text).await,
            UserAction::Clear(command_id) => self.clear(&command_id).await,
            UserAction::StopAll { confirmed } => self.stop_all(confirmed).await,
            UserAction::Refresh => self.reconcile(),
            UserAction::Run(command) => self.run_command(&command).await,
            UserAction::Quit => return false,
        }
        true
    }

    async fn handle_completion(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match completion {
            Completion::Listed { issued_at, result } => {
                self.reconcile_in_flight = false;
                match result {
                    Ok(entries) => {
                        self.reconcile_failing = false;
                        let outcome = self.tracker.apply_snapshot(&entries, issued_at);
                        debug!(
                            listed = entries.len(),
                            created = outcome.created.len(),
                            updated = outcome.updated.len(),
                            orphaned = outcome.orphaned.len(),
                            running = self.tracker.running_count(),
                            "Reconciled with backend"
                        );
                        if self.tracker.running_count() > 0 {
                            self.polling_armed = true;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Error listing active commands");
                        // One toast per outage, not one per tick.
                        if !self.reconcile_failing {
                            self.notifications
                                .error(format!("Error listing commands: {}", e.user_message()));
                        }
                        self.reconcile_failing = true;
                    }
                }
            }
            Completion::Stopped { command_id, result } => {
                // Hiding is optimistic and happens whatever the backend said.
                self.tracker.hide(&command_id);
                match result {
                    Ok(_) => {
                        self.notifications
                            .success(format!("Command stopped: {}", command_id));
                        let others_running = self
                            .tracker
                            .running_ids()
                            .iter()
                            .any(|id| id != &command_id);
                        if self.disarm_when_idle && !others_running && self.polling_armed {
                            // One last pull settles the count, then the timer goes quiet.
                            self.reconcile();
                            self.polling_armed = false;
                            info!("No running commands left; reconciliation timer disarmed");
                        }
                    }
                    Err(e) => {
                        warn!(command_id = %command_id, error = %e, "Error stopping command");
                        self.tracker.mark_stop_failed(&command_id);
                        self.notifications.error(format!("Error: {}", e.user_message()));
                    }
                }
            }
            Completion::InputSent { command_id, result } => {
                if let Err(e) = result {
                    warn!(command_id = %command_id, error = %e, "Error sending input");
                    self.notifications.error(format!("Error: {}", e.user_message()));
                }
            }
            Completion::Ran { command, result } => match result {
                Ok(RunOutcome::Started { command_id, message }) => {
                    info!(command = %command, command_id = %command_id, "Long-running command started");
                    self.notifications.success(message);
                    self.polling_armed = true;
                }
                Ok(RunOutcome::Finished { returncode, stdout, stderr, .. }) => {
                    let mut message = match returncode {
                        Some(0) => format!("`{}` completed successfully", command),
                        Some(code) => format!("`{}` failed with code {}", command, code),
                        None => format!("`{}` finished", command),
                    };
                    for text in [stdout.trim_end(), stderr.trim_end()] {
                        if !text.is_empty() {
                            message.push('\n');
                            message.push_str(text);
                        }
                    }
                    if returncode.unwrap_or(0) == 0 {
                        self.notifications.success(message);
                    } else {
                        self.notifications.error(message);
                    }
                }
                Err(e) => {
                    warn!(command = %command, error = %e, "Error running command");
                    self.notifications.error(format!("Error: {}", e.user_message()));
                }
            },
        }
    }

    /// Waits for every spawned backend call and applies its result.
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            match self.completions_rx.recv().await {
                Some(completion) => self.handle_completion(completion).await,
                None => break,
            }
        }
    }

    pub fn render<W: Write>(&mut self, renderer: &mut ConsoleRenderer<W>) -> std::io::Result<()> {
        renderer.render(
            &self.tracker.panels(),
            self.tracker.running_count(),
            self.notifications.active(Utc::now()),
        )
    }

    /// Cooperative event loop: transport events, user actions, backend call
    /// results and the reconciliation timer, one handler at a time.
    pub async fn run<W: Write>(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut actions: mpsc::Receiver<UserAction>,
        renderer: &mut ConsoleRenderer<W>,
    ) -> Result<(), AppError> {
        let mut ticker = tokio::time::interval(self.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                maybe_event = events.recv(), if events_open => match maybe_event {
                    Some(event) => self.on_transport_event(event).await,
                    None => {
                        warn!("Event channel closed; continuing with reconciliation only");
                        events_open = false;
                        self.disarm_when_idle = false;
                        self.polling_armed = true;
                    }
                },
                maybe_action = actions.recv() => match maybe_action {
                    Some(action) => {
                        if !self.handle_action(action).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(completion) = self.completions_rx.recv() => self.handle_completion(completion).await,
                // The first tick fires immediately and performs the initial pull.
                _ = ticker.tick() => {
                    if self.polling_armed {
                        self.reconcile();
                    }
                }
            }
            self.render(renderer)?;
        }

        info!(tracked = self.tracker.len(), "Terminal session tracker shutting down");
        Ok(())
    }
}
