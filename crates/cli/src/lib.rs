mod check;
mod config;
mod demo;
mod dex;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use config::CliConfig;
pub use logging::init_logging;

#[derive(Parser)]
#[command(
    name = "modproxy",
    version,
    about = "Read-only access to a provider's module storage from other processes",
    long_about = "modproxy hands out read-only descriptors for modules in a provider's private \
                  storage, validated against a world-readable permission chain, and maps their \
                  code segments without copying."
)]
pub struct Cli {
    /// JSON file with `server` and `client` sections
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Also log to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check whether the provider would serve a path
    #[command(
        long_about = "Runs the provider's path validation against PATH and reports whether it \
                      would be accepted, is missing, or is rejected. The module root is taken \
                      from the config unless --data-dir is given."
    )]
    Check {
        #[arg(value_name = "PATH")]
        path: String,

        /// Provider data directory containing the module storage
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,
    },
    /// List the mappable dex segments of a module
    Dex {
        #[arg(value_name = "MODULE")]
        path: PathBuf,
    },
    /// Run a provider and a client in-process over a local bus
    #[command(
        long_about = "Starts a provider on an in-process bus with a scratch module, discovers it \
                      from a client, maps the module's dex segments, kills the provider and \
                      rediscovers a restarted one."
    )]
    Demo,
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let component = match &cli.command {
        Commands::Check { .. } => "check",
        Commands::Dex { .. } => "dex",
        Commands::Demo => "demo",
    };
    let _guard = init_logging(component, cli.verbose);

    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { path, data_dir } => check::run(config, &path, data_dir),
        Commands::Dex { path } => dex::run(&path),
        Commands::Demo => demo::run(config),
    }
}
