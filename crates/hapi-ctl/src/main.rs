use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};

use hapi_ctl::commands;
use hapi_ctl::config::{AppConfig, load_config, resolve_config_path, write_default_config};
use hapi_ctl::logging::{LogFlags, init_logging};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_batch(ctx: RuntimeContext, cmd: BatchCommand) -> Result<()> {
    let mut stdout = io::stdout().lock();
    commands::batch(&cmd.input, &ctx.config, &mut stdout).await?;
    Ok(())
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common)?;
    init_logging(ctx.log_flags(), &ctx.config.logging);
    debug!(config = %ctx.config_path.display(), "resolved config path");

    match cli.command {
        Command::Normalize(cmd) => handle_normalize(cmd),
        Command::Reduce(cmd) => handle_reduce(&ctx, cmd),
        Command::Batch(cmd) => async_batch(ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "hapictl - inspect HAPI session transcripts and exercise the instruction queue.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true, env = "HAPI_CONFIG")]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Output machine readable JSON (logs and command output)
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors in log output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Normalize a raw transcript and print one message per line
    Normalize(NormalizeCommand),
    /// Reduce a raw transcript into chat blocks
    Reduce(ReduceCommand),
    /// Feed instructions through the mode-aware queue and print the batches
    Batch(BatchCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Clone, Args)]
struct NormalizeCommand {
    /// JSON Lines file of raw hub messages
    input: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct ReduceCommand {
    /// JSON Lines file of raw hub messages
    input: PathBuf,
    /// Agent state JSON with permission requests
    #[arg(long, value_name = "PATH")]
    agent_state: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct BatchCommand {
    /// JSON Lines file of `{message, mode?, isolate?}` records
    input: PathBuf,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_path: PathBuf,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_path = resolve_config_path(common.config.as_deref())?;
        let config = load_config(&config_path)?;
        Ok(Self {
            common,
            config_path,
            config,
        })
    }

    fn log_flags(&self) -> LogFlags {
        LogFlags {
            quiet: self.common.quiet,
            verbose: self.common.verbose,
            json: self.common.json,
            no_color: self.common.no_color,
        }
    }
}

fn handle_normalize(cmd: NormalizeCommand) -> Result<()> {
    let mut stdout = io::stdout().lock();
    let count = commands::normalize(&cmd.input, &mut stdout)?;
    debug!(count, "normalize finished");
    Ok(())
}

fn handle_reduce(ctx: &RuntimeContext, cmd: ReduceCommand) -> Result<()> {
    let mut stdout = io::stdout().lock();
    commands::reduce(
        &cmd.input,
        cmd.agent_state.as_deref(),
        &ctx.config.timeline,
        &mut stdout,
        !ctx.common.json,
    )?;
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Init { force } => {
            if ctx.config_path.exists() && !force {
                info!(
                    "config already exists at {} (use --force to overwrite)",
                    ctx.config_path.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.config_path)?;
            info!("wrote default config to {}", ctx.config_path.display());
            Ok(())
        }
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                print!(
                    "{}",
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?
                );
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_path.display());
            Ok(())
        }
    }
}
