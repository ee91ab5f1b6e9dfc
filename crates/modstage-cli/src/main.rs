use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod completion;
mod dispatch;
mod render;

use completion::CliCompletionShell;
use dispatch::run_cli;

#[derive(Parser, Debug)]
#[command(name = "modstage")]
#[command(
    about = "Install, upgrade and remove application modules per entry point",
    long_about = None
)]
struct Cli {
    /// Directory holding the application's project.toml.
    #[arg(long, global = true, default_value = ".")]
    app_root: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install or upgrade the modules of every entry point, or of one.
    Install {
        #[arg(long)]
        entrypoint: Option<String>,
        /// Only run hooks of these actions; bookkeeping still happens.
        #[arg(long, value_enum, conflicts_with = "entrypoint")]
        only: Vec<HookFilter>,
    },
    /// Install the given modules, even when an entry point does not enable them.
    InstallModules {
        #[arg(required = true)]
        modules: Vec<String>,
        #[arg(long)]
        entrypoint: Option<String>,
        /// Hook parameter passed to every listed module, as NAME=VALUE.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Remove the given modules; modules depending on them must be listed too.
    UninstallModules {
        #[arg(required = true)]
        modules: Vec<String>,
        #[arg(long)]
        entrypoint: Option<String>,
    },
    /// Show installed modules and pending actions.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum HookFilter {
    Install,
    Upgrade,
    Remove,
}

fn parse_param(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("parameter must look like NAME=VALUE: '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("parameter name must not be empty: '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

fn params_map(params: Vec<(String, String)>) -> BTreeMap<String, String> {
    params.into_iter().collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run_cli(cli)
}
