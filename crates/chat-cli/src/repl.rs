//! `nm-chat chat`: interactive REPL.
//!
//! Each line is sent to the assistant and the reply streams to stdout
//! through [`TerminalSink`].  Slash commands manage the session.

use std::sync::Arc;

use nm_chat_client::{ChatClient, ChatClientBuilder, ClientConfig};

use crate::sink::TerminalSink;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(config: ClientConfig, new_session: bool) -> anyhow::Result<()> {
    let sink = Arc::new(TerminalSink::new());
    let client = ChatClientBuilder::from_config(&config)
        .state_sink(sink.clone())
        .build()?;

    let runner = config.resolved_runner_type();
    let time_zone = config.resolved_time_zone();
    let descriptor = if new_session {
        client.fresh_descriptor(runner, time_zone)
    } else {
        client.new_descriptor(runner, time_zone)
    };

    let history_path = dirs::home_dir()
        .unwrap_or_default()
        .join(".nm-chat")
        .join("history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    eprintln!("NetworkMonitor assistant ({})", config.server_url);
    eprintln!(
        "Session: {}  |  Runner: {}  |  Type /help for commands, Ctrl+D to exit",
        descriptor.session_id, descriptor.runner_type
    );
    eprintln!();

    if let Err(e) = client.initialize(descriptor).await {
        eprintln!("\x1B[33mcould not connect yet ({e}), will keep retrying\x1B[0m");
    }

    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                if trimmed.starts_with('/') {
                    if run_command(&client, SlashCommand::parse(trimmed)).await {
                        break;
                    }
                    continue;
                }

                send_and_wait(&client, &sink, trimmed).await;
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    rl.save_history(&history_path).ok();
    client.close().await;
    eprintln!("Goodbye!");
    Ok(())
}

/// Send one message and block until the turn ends.  Ctrl+C asks the server
/// to stop and returns to the prompt.
async fn send_and_wait(client: &ChatClient, sink: &TerminalSink, text: &str) {
    let done = sink.turn_done();
    tokio::pin!(done);
    done.as_mut().enable();

    if let Err(e) = client.send_message(text).await {
        eprintln!("\x1B[31merror: {e}\x1B[0m");
        return;
    }

    tokio::select! {
        _ = &mut done => {}
        _ = tokio::signal::ctrl_c() => {
            if let Err(e) = client.stop().await {
                eprintln!("\x1B[31merror: {e}\x1B[0m");
            }
            eprintln!("(stopped)");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slash command handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, PartialEq, Eq)]
pub enum SlashCommand {
    Stop,
    /// Reconnect under the same session id.
    Reset,
    /// Reconnect under a new session id.
    New,
    History,
    Status,
    Dashboard(Option<bool>),
    Help,
    Exit,
    Unknown(String),
}

impl SlashCommand {
    pub fn parse(input: &str) -> Self {
        let mut parts = input.splitn(2, ' ');
        let cmd = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

        match cmd {
            "/stop" => Self::Stop,
            "/reset" => Self::Reset,
            "/new" => Self::New,
            "/history" => Self::History,
            "/status" => Self::Status,
            "/dashboard" => Self::Dashboard(match arg {
                Some("on") => Some(true),
                Some("off") => Some(false),
                _ => None,
            }),
            "/help" => Self::Help,
            "/exit" | "/quit" => Self::Exit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Returns `true` if the REPL should exit.
async fn run_command(client: &ChatClient, command: SlashCommand) -> bool {
    match command {
        SlashCommand::Exit => return true,

        SlashCommand::Stop => {
            if let Err(e) = client.stop().await {
                eprintln!("\x1B[31merror: {e}\x1B[0m");
            }
        }

        SlashCommand::Reset => reset(client, false).await,
        SlashCommand::New => reset(client, true).await,

        SlashCommand::History => {
            let state = client.snapshot();
            if state.histories.is_empty() {
                eprintln!("No past conversations.");
            }
            for h in &state.histories {
                let started = h
                    .start_time()
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".into());
                eprintln!("  {started}  {}  ({} messages)", h.name, h.history.len());
            }
        }

        SlashCommand::Status => {
            let state = client.snapshot();
            eprintln!("Connection: {}", client.status());
            if let Some(d) = client.descriptor() {
                eprintln!("Session:    {}", d.session_id);
                eprintln!("Runner:     {}", d.runner_type);
                eprintln!("Time zone:  {}", d.time_zone);
            }
            eprintln!("Ready:      {}", state.is_ready);
            eprintln!("Busy:       {}", state.is_llm_busy);
            eprintln!("Dashboard:  {}", client.dashboard());
        }

        SlashCommand::Dashboard(Some(enabled)) => {
            client.set_dashboard(enabled);
            eprintln!("Dashboard {}", if enabled { "on" } else { "off" });
        }
        SlashCommand::Dashboard(None) => {
            eprintln!("Dashboard is {}", if client.dashboard() { "on" } else { "off" });
            eprintln!("Usage: /dashboard on|off");
        }

        SlashCommand::Help => {
            eprintln!("Commands:");
            eprintln!("  /stop              Stop the current response");
            eprintln!("  /reset             Reconnect, keeping the session id");
            eprintln!("  /new               Start a new session");
            eprintln!("  /history           List past conversations");
            eprintln!("  /status            Show connection and session details");
            eprintln!("  /dashboard on|off  Show host lists from function calls");
            eprintln!("  /exit, /quit       Exit");
            eprintln!("  /help              Show this help");
        }

        SlashCommand::Unknown(other) => {
            eprintln!("Unknown command: {other}  (type /help for a list)");
        }
    }

    false
}

async fn reset(client: &ChatClient, create_new_session: bool) {
    match client.reset(create_new_session).await {
        Ok(()) => {
            if let Some(d) = client.descriptor() {
                eprintln!("Session: {}", d.session_id);
            }
        }
        Err(e) => eprintln!("\x1B[31mreset failed: {e}\x1B[0m"),
    }
}
