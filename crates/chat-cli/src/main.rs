mod repl;
mod sink;

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nm_chat_client::ClientConfig;
use tracing_subscriber::EnvFilter;

/// nm-chat: talk to the NetworkMonitor assistant from a terminal.
#[derive(Debug, Parser)]
#[command(name = "nm-chat", version, about)]
struct Cli {
    /// Path to the config file.
    #[arg(long, default_value = "nm-chat.toml", global = true)]
    config: String,

    /// Override the LLM stream endpoint.
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Runner type (TurboLLM, HugLLM, TestLLM).
    #[arg(long, global = true)]
    runner: Option<String>,

    /// Show host lists returned by function calls.
    #[arg(long, global = true)]
    dashboard: bool,

    /// Start under a fresh session id instead of resuming.
    #[arg(long, global = true)]
    new_session: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat (default when no subcommand is given).
    Chat,
    /// Dump the resolved configuration (with defaults) as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        None | Some(Command::Chat) => {
            init_cli_tracing();
            repl::chat(config, cli.new_session).await
        }
        Some(Command::Config) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Read the config file when present, then apply command-line overrides.
fn resolve_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = if Path::new(&cli.config).exists() {
        ClientConfig::load(&cli.config).with_context(|| format!("loading {}", cli.config))?
    } else {
        ClientConfig::default()
    };

    if let Some(url) = &cli.server_url {
        config.server_url = url.clone();
    }
    if let Some(runner) = &cli.runner {
        config.runner_type = runner.clone();
    }
    if cli.dashboard {
        config.dashboard = true;
    }

    config.validate()?;
    Ok(config)
}

/// Compact logs on stderr; stdout carries the assistant's text.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,nm_chat_client=info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "nm-chat",
            "--config",
            "/nonexistent/nm-chat.toml",
            "--server-url",
            "ws://localhost:7000/llm-stream",
            "--runner",
            "HugLLM",
            "--dashboard",
        ]);
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.server_url, "ws://localhost:7000/llm-stream");
        assert_eq!(config.runner_type, "HugLLM");
        assert!(config.dashboard);
        assert!(cli.command.is_none());
    }

    #[test]
    fn bad_override_is_rejected() {
        let cli = Cli::parse_from([
            "nm-chat",
            "--config",
            "/nonexistent/nm-chat.toml",
            "--server-url",
            "http://not-a-websocket",
            "config",
        ]);
        assert!(matches!(cli.command, Some(Command::Config)));
        assert!(resolve_config(&cli).is_err());
    }
}
