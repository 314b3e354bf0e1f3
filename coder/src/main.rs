//! Interactive coding agent.
//!
//! Reads multi-line requests from the terminal, lets a local model act on the
//! workspace through a fixed set of capabilities, and asks before anything
//! risky. `check-command` and `check-path` expose the safety validator alone.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use coder::core::forbidden::{
    PathContext, PathOperation, Verdict, validate_command, validate_path_with,
};
use coder::core::types::AgentConfig;
use coder::exit_codes;
use coder::io::completion::OllamaClient;
use coder::io::config::{CoderConfig, default_config_path, load_config, write_config};
use coder::io::console::{Console, SUBMIT_SENTINEL, TerminalConsole};
use coder::io::paths::follow_links;
use coder::logging;
use coder::looping::{RequestStop, run_request};
use coder::session::Session;

#[derive(Parser)]
#[command(
    name = "coder",
    version,
    about = "Interactive coding agent for a local language model"
)]
struct Cli {
    /// Approve every allowed action without asking.
    #[arg(long, global = true)]
    auto: bool,
    /// Append an override note to safety rejections (they still block).
    #[arg(long, global = true)]
    override_forbidden: bool,
    /// Config file (default: `.coder/config.toml` under the current directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Model name, overriding the config file.
    #[arg(long, global = true)]
    model: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive session (default).
    Chat,
    /// Write the default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the safety verdict for a shell command.
    CheckCommand { command: String },
    /// Print the safety verdict for a path.
    CheckPath {
        path: String,
        /// Check as a write (default: read).
        #[arg(long)]
        write: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&root));
    let agent = AgentConfig::new(cli.auto, cli.override_forbidden);

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            let mut config = load_config(&config_path)?;
            if let Some(model) = cli.model {
                config.model.name = model;
            }
            cmd_chat(&root, &config, agent)
        }
        Command::Init { force } => cmd_init(&config_path, force),
        Command::CheckCommand { command } => {
            Ok(report_verdict(validate_command(&command, agent.override_forbidden)))
        }
        Command::CheckPath { path, write } => {
            let operation = if write {
                PathOperation::Write
            } else {
                PathOperation::Read
            };
            let verdict = validate_path_with(
                &path,
                operation,
                agent.override_forbidden,
                &PathContext::for_root(&root),
                follow_links,
            );
            Ok(report_verdict(verdict))
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &CoderConfig::default())?;
    println!("Wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn report_verdict(verdict: Verdict) -> i32 {
    match verdict {
        Verdict::Allowed => {
            println!("ALLOWED");
            exit_codes::OK
        }
        Verdict::Forbidden(rejection) => {
            println!("{rejection}");
            exit_codes::FORBIDDEN
        }
    }
}

fn cmd_chat(root: &Path, config: &CoderConfig, agent: AgentConfig) -> Result<i32> {
    let client = OllamaClient::new(config.model.clone())?;
    let console = TerminalConsole::stdio().context("set up console")?;
    let mut session = Session::new(root, config, agent, client, console)?;
    debug!(model = %config.model.name, "chat session started");

    let mode = if agent.is_auto() { "AUTO" } else { "MANUAL" };
    println!("Coding Agent Ready [{mode} mode]");
    println!("Type your request, then '{SUBMIT_SENTINEL}' to send.");
    if !agent.is_auto() {
        println!("Human approval required for file changes and commands.");
    }
    println!("Ctrl+C then Enter cancels a pending action or exits at the prompt.");
    println!("Press Ctrl+C twice to quit immediately.\n");

    loop {
        let request = match session.console_mut().read_request()? {
            Some(request) => request,
            None => {
                println!("\nExiting...");
                return Ok(exit_codes::OK);
            }
        };
        if request.is_empty() {
            continue;
        }

        let max_steps = session.limits().max_steps;
        let outcome = run_request(&mut session, &request, |step| {
            println!("\n[Step {}/{max_steps}]", step.step);
            println!("{step}");
        });
        match outcome {
            Ok(outcome) => match outcome.stop {
                RequestStop::Completed => {
                    if !session.created_files().is_empty() {
                        println!("Files created: {}", session.created_files().join(", "));
                    }
                }
                RequestStop::StepBudgetExhausted { max_steps } => {
                    println!("Reached the step limit ({max_steps}) for this request.");
                }
            },
            // The conversation survives a failed request; the next one continues it.
            Err(err) => eprintln!("{:#}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults_to_chat() {
        let cli = Cli::parse_from(["coder"]);
        assert!(cli.command.is_none());
        assert!(!cli.auto);
        assert!(!cli.override_forbidden);
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["coder", "chat", "--auto", "--model", "llama3"]);
        assert!(matches!(cli.command, Some(Command::Chat)));
        assert!(cli.auto);
        assert_eq!(cli.model.as_deref(), Some("llama3"));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["coder", "init", "--force"]);
        assert!(matches!(cli.command, Some(Command::Init { force: true })));
    }

    #[test]
    fn parse_check_path_write() {
        let cli = Cli::parse_from(["coder", "check-path", "/etc/passwd", "--write"]);
        assert!(matches!(
            cli.command,
            Some(Command::CheckPath { ref path, write: true }) if path == "/etc/passwd"
        ));
    }

    #[test]
    fn verdicts_map_to_exit_codes() {
        assert_eq!(report_verdict(Verdict::Allowed), exit_codes::OK);
        assert_eq!(
            report_verdict(validate_command("rm -rf /", false)),
            exit_codes::FORBIDDEN
        );
    }
}
