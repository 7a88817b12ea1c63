//! Command line surface.
//!
//! - `watch` (default): live panels plus an interactive action prompt on stdin
//! - `list`, `stop`, `send`, `run`, `stop-all`: one-shot backend calls

use crate::backend::{CommandBackend, HttpBackend, RunOutcome};
use crate::config::{Config, TransportMode};
use crate::controller::{TerminalController, UserAction};
use crate::session::CommandStatus;
use crate::ui::ConsoleRenderer;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

/// Follow and control commands run by the backend
#[derive(Parser, Debug)]
#[command(name = "term-tracker")]
#[command(about = "Live terminal panels for backend-run commands")]
#[command(version)]
pub struct Cli {
    /// Backend base URL (overrides BACKEND_URL)
    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    /// Event transport: socket or poll (overrides EVENT_TRANSPORT)
    #[arg(long, global = true)]
    pub transport: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow all commands live (default)
    Watch,
    /// List the commands the backend knows about
    List,
    /// Stop one command
    Stop { command_id: String },
    /// Stop every running command
    StopAll {
        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },
    /// Send a line of input to an interactive command
    Send {
        command_id: String,
        #[arg(trailing_var_arg = true, required = true)]
        input: Vec<String>,
    },
    /// Ask the backend to run a command
    Run {
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

/// What one line typed at the watch prompt means.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleLine {
    Action(UserAction),
    /// `stop-all` needs a y/N answer before it becomes an action.
    ConfirmStopAll,
    Help,
    Empty,
}

pub const CONSOLE_HELP: &str = "commands: stop <id> | send <id> <text> | clear <id> | stop-all | refresh | run <command> | help | quit";

fn split_word(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (line, ""),
    }
}

pub fn parse_console_line(line: &str) -> Result<ConsoleLine, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleLine::Empty);
    }
    let (verb, rest) = split_word(line);
    let require_id = |rest: &str| -> Result<String, String> {
        let (id, _) = split_word(rest);
        if id.is_empty() {
            Err(format!("usage: {} <command_id>", verb))
        } else {
            Ok(id.to_string())
        }
    };

    match verb.to_lowercase().as_str() {
        "stop" => Ok(ConsoleLine::Action(UserAction::Stop(require_id(rest)?))),
        "clear" => Ok(ConsoleLine::Action(UserAction::Clear(require_id(rest)?))),
        "send" => {
            let (id, text) = split_word(rest);
            if id.is_empty() {
                return Err("usage: send <command_id> <text>".to_string());
            }
            Ok(ConsoleLine::Action(UserAction::SendInput {
                command_id: id.to_string(),
                text: text.to_string(),
            }))
        }
        "stop-all" | "stopall" => Ok(ConsoleLine::ConfirmStopAll),
        "refresh" | "list" => Ok(ConsoleLine::Action(UserAction::Refresh)),
        "run" => {
            if rest.is_empty() {
                return Err("usage: run <command>".to_string());
            }
            Ok(ConsoleLine::Action(UserAction::Run(rest.to_string())))
        }
        "quit" | "exit" => Ok(ConsoleLine::Action(UserAction::Quit)),
        "help" | "?" => Ok(ConsoleLine::Help),
        other => Err(format!("unknown command '{}'; {}", other, CONSOLE_HELP)),
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Applies command line overrides on top of the environment configuration.
pub fn apply_overrides(mut config: Config, cli: &Cli) -> Result<Config> {
    if let Some(raw) = &cli.backend_url {
        let url = Url::parse(raw).context(format!("Invalid --backend-url: {}", raw))?;
        config = config.with_backend_url(url)?;
    }
    if let Some(raw) = &cli.transport {
        config.transport_mode = TransportMode::from_str(raw)?;
    }
    Ok(config)
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let backend = Arc::new(HttpBackend::new(&config)?);
    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => watch(config, backend).await,
        Commands::List => list(backend.as_ref()).await,
        Commands::Stop { command_id } => {
            let result = backend.stop(&command_id).await?;
            println!("{}", result.message);
            Ok(())
        }
        Commands::StopAll { yes } => stop_all(backend, yes).await,
        Commands::Send { command_id, input } => {
            let text = input.join(" ");
            if text.trim().is_empty() {
                return Ok(());
            }
            let result = backend.send_input(&command_id, &text).await?;
            println!("{}", result.message);
            Ok(())
        }
        Commands::Run { command } => {
            match backend.run_command(&command.join(" ")).await? {
                RunOutcome::Started { message, .. } => println!("{}", message),
                RunOutcome::Finished { stdout, stderr, returncode, .. } => {
                    print!("{}", stdout);
                    eprint!("{}", stderr);
                    if let Some(code) = returncode.filter(|c| *c != 0) {
                        anyhow::bail!("command exited with code {}", code);
                    }
                }
            }
            Ok(())
        }
    }
}

async fn list(backend: &impl CommandBackend) -> Result<()> {
    let commands = backend.list_sessions().await?;
    if commands.is_empty() {
        println!("No commands");
        return Ok(());
    }
    println!("{:<28} {:<10} {:>8} {:>6}", "COMMAND ID", "STATUS", "PID", "CODE");
    for command in &commands {
        println!(
            "{:<28} {:<10} {:>8} {:>6}",
            command.command_id,
            command.status.to_string(),
            command.pid.map(|p| p.to_string()).unwrap_or_default(),
            command.returncode.map(|c| c.to_string()).unwrap_or_default(),
        );
    }
    let running = commands.iter().filter(|c| c.status == CommandStatus::Running).count();
    println!("Active commands: {}", running);
    Ok(())
}

async fn read_answer(prompt: &str) -> Result<bool> {
    eprint!("{} [y/N] ", prompt);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    Ok(lines.next_line().await?.map(|l| is_yes(&l)).unwrap_or(false))
}

async fn stop_all<B: CommandBackend>(backend: Arc<B>, yes: bool) -> Result<()> {
    let running: Vec<String> = backend
        .list_sessions()
        .await?
        .into_iter()
        .filter(|c| c.status == CommandStatus::Running)
        .map(|c| c.command_id)
        .collect();
    if running.is_empty() {
        println!("No active commands to stop");
        return Ok(());
    }
    let prompt = format!("Are you sure you want to stop all {} active commands?", running.len());
    if !yes && !read_answer(&prompt).await? {
        return Ok(());
    }

    // Independent calls: one failure does not hold back the others.
    let results = futures::future::join_all(running.iter().map(|id| backend.stop(id))).await;
    let mut failures = 0;
    for (id, result) in running.iter().zip(results) {
        match result {
            Ok(result) => println!("{}", result.message),
            Err(e) => {
                failures += 1;
                eprintln!("Error stopping {}: {}", id, e.user_message());
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{} of {} commands could not be stopped", failures, running.len());
    }
    Ok(())
}

fn spawn_console_reader(actions: mpsc::Sender<UserAction>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        eprintln!("{}", CONSOLE_HELP);
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read from stdin");
                    break;
                }
            };
            let action = match parse_console_line(&line) {
                Ok(ConsoleLine::Action(action)) => action,
                Ok(ConsoleLine::ConfirmStopAll) => {
                    eprint!("Stop all active commands? [y/N] ");
                    let confirmed = matches!(lines.next_line().await, Ok(Some(answer)) if is_yes(&answer));
                    UserAction::StopAll { confirmed }
                }
                Ok(ConsoleLine::Help) => {
                    eprintln!("{}", CONSOLE_HELP);
                    continue;
                }
                Ok(ConsoleLine::Empty) => continue,
                Err(message) => {
                    eprintln!("{}", message);
                    continue;
                }
            };
            if actions.send(action).await.is_err() {
                break;
            }
        }
        // stdin closed: leave the loop as if the user quit.
        let _ = actions.send(UserAction::Quit).await;
    });
}

async fn watch<B: CommandBackend>(config: Config, backend: Arc<B>) -> Result<()> {
    let (event_tx, event_rx) = mpsc::channel(256);
    let (action_tx, action_rx) = mpsc::channel(32);

    // Held for the whole session so a poll-only client keeps an open (silent) channel.
    let _poll_only_sender = match config.transport_mode {
        #[cfg(feature = "socket")]
        TransportMode::Socket => {
            info!(url = %config.events_url, "Using socket event transport");
            crate::transport::SocketEventSource::new(&config).spawn(event_tx);
            None
        }
        #[cfg(not(feature = "socket"))]
        TransportMode::Socket => {
            anyhow::bail!("Socket transport is not available: compiled without the `socket` feature. Use --transport poll.");
        }
        TransportMode::Poll => {
            info!(interval = ?config.reconcile_interval, "Using polling only");
            Some(event_tx)
        }
    };

    spawn_console_reader(action_tx);
    let controller = TerminalController::new(&config, backend);
    let mut renderer = ConsoleRenderer::new(std::io::stdout());
    controller.run(event_rx, action_rx, &mut renderer).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_actions_with_free_text() {
        assert_eq!(
            parse_console_line("send c1   hello  world ").unwrap(),
            ConsoleLine::Action(UserAction::SendInput {
                command_id: "c1".into(),
                text: "hello  world".into(),
            })
        );
        assert_eq!(
            parse_console_line("run npm start").unwrap(),
            ConsoleLine::Action(UserAction::Run("npm start".into()))
        );
        assert_eq!(
            parse_console_line("STOP c2").unwrap(),
            ConsoleLine::Action(UserAction::Stop("c2".into()))
        );
    }

    #[test]
    fn stop_all_requires_confirmation_step() {
        assert_eq!(parse_console_line("stop-all").unwrap(), ConsoleLine::ConfirmStopAll);
        assert!(is_yes(" Y "));
        assert!(!is_yes(""));
        assert!(!is_yes("nope"));
    }

    #[test]
    fn rejects_incomplete_lines() {
        assert!(parse_console_line("stop").is_err());
        assert!(parse_console_line("send").is_err());
        assert!(parse_console_line("run").is_err());
        assert!(parse_console_line("dance c1").is_err());
        assert_eq!(parse_console_line("   ").unwrap(), ConsoleLine::Empty);
    }

    #[test]
    fn cli_flags_override_environment() {
        let cli = Cli::parse_from([
            "term-tracker",
            "--backend-url",
            "https://runner.local:8443",
            "--transport",
            "poll",
            "list",
        ]);
        let config = Config::from_lookup(|_| None).unwrap();
        let config = apply_overrides(config, &cli).unwrap();
        assert_eq!(config.transport_mode, TransportMode::Poll);
        assert_eq!(
            config.events_url.as_str(),
            "wss://runner.local:8443/socket.io/?EIO=4&transport=websocket"
        );
        assert!(matches!(cli.command, Some(Commands::List)));
    }
}
