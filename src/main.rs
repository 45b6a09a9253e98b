use std::io::{IsTerminal, Write};

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use plugin_host::config::Config;
use plugin_host::plugins::builtin;
use plugin_host::{CommandRegistry, Dispatcher, Host, Outcome};

fn print_help() {
    println!(
        "\
plugin-host v{}

Runs plugin commands inside disposable sandboxes.

USAGE:
    plugin-host [OPTIONS] [COMMAND [ARGS...]]

ARGUMENTS:
    COMMAND    Command to run once. Without it, commands are read
               line by line from stdin until EOF or Ctrl-C.

OPTIONS:
    -c, --config PATH    TOML configuration file
        --json           Print each outcome as a JSON object
    -h, --help           Print this help message and exit
    -V, --version        Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing, overrides [logging] filter
                (e.g. debug, plugin_host=debug,warn)

EXAMPLES:
    plugin-host echo hello                  # run one command
    plugin-host --json exit 3               # prints {{\"outcome\":\"exit\",...}}
    plugin-host -c /etc/plugin-host.toml    # interactive, custom config",
        env!("CARGO_PKG_VERSION"),
    );
}

struct CliArgs {
    config_path: Option<String>,
    json: bool,
    /// Command name followed by its arguments; empty for interactive mode.
    command: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs> {
    let mut cli = CliArgs {
        config_path: None,
        json: false,
        command: Vec::new(),
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("plugin-host v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("{arg} requires a path"))?;
                cli.config_path = Some(path);
            }
            "--json" => cli.json = true,
            _ => {
                // Everything from the command name on belongs to the command
                cli.command.push(arg);
                cli.command.extend(args.by_ref());
                break;
            }
        }
    }
    Ok(cli)
}

/// Process exit status for an outcome: 0, the intercepted code, or 1.
fn exit_status(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Success { .. } => 0,
        Outcome::Exit { code, .. } => *code,
        Outcome::Error { .. } => 1,
    }
}

fn report(outcome: &Outcome, json: bool) {
    if json {
        match serde_json::to_string(outcome) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Cannot serialize outcome: {e}"),
        }
        return;
    }
    let text = outcome.text();
    if text.is_empty() {
        return;
    }
    if outcome.is_success() {
        println!("{text}");
    } else {
        eprintln!("{text}");
    }
}

fn run_command(dispatcher: &Dispatcher, host: &mut Host, words: &[String], json: bool) -> i32 {
    let Some((name, args)) = words.split_first() else {
        return 0;
    };
    match dispatcher.execute(host, name, args) {
        Ok(outcome) => {
            report(&outcome, json);
            exit_status(&outcome)
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

async fn interactive(dispatcher: &Dispatcher, host: &mut Host, json: bool) -> Result<()> {
    let prompt = std::io::stdin().is_terminal();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if prompt {
            print!("% ");
            std::io::stdout().flush()?;
        }

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting");
                return Ok(());
            }
        };
        let Some(line) = line else {
            if prompt {
                println!();
            }
            return Ok(());
        };

        let words: Vec<String> = line.split_whitespace().map(String::from).collect();
        run_command(dispatcher, host, &words, json);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = parse_args(std::env::args().skip(1))?;

    let config = match cli.config_path {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };

    // Logs go to stderr so command output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(ref path) = cli.config_path {
        info!("Loaded configuration from {path}");
    }

    let mut registry = CommandRegistry::new();
    if config.commands.builtins {
        builtin::register_all(&mut registry);
    }
    registry.apply(&config.commands)?;
    info!("Commands: {} registered", registry.len());

    let dispatcher = Dispatcher::new(registry, config.host.id.clone());
    let mut host = Host::new();

    if cli.command.is_empty() {
        return interactive(&dispatcher, &mut host, cli.json).await;
    }

    let status = run_command(&dispatcher, &mut host, &cli.command, cli.json);
    std::process::exit(status)
}
