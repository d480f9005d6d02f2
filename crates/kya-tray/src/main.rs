mod cmd;
mod output;
mod settings;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kya-tray",
    about = "Desktop notifications and actions for kydras-sysagent suggestions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/kydras-sysagent/tray.yaml)
    #[arg(long, global = true, env = "KYA_TRAY_CONFIG")]
    config: Option<PathBuf>,

    /// Agent database to read
    #[arg(long, global = true, env = "KYA_DB")]
    db: Option<PathBuf>,

    /// Cursor state file
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Poll interval in seconds
    #[arg(long, global = true, env = "KYA_POLL_SECS")]
    interval: Option<u64>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for new suggestions and notify until interrupted
    Watch,

    /// Run a single poll cycle and print the ids presented
    Poll,

    /// List open suggestions, newest first
    List,

    /// Show the latest metrics sample
    Status {
        /// Run `kya status` in a terminal window instead
        #[arg(long)]
        terminal: bool,
    },

    /// Open `sudo kya tune` in a terminal window
    Tune,

    /// Apply the fix for a suggestion
    Apply { id: i64 },

    /// Dismiss a suggestion
    Dismiss { id: i64 },

    /// Inspect or create the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Watch => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let overrides = settings::Overrides {
        db: cli.db,
        state: cli.state,
        interval: cli.interval,
    };
    let config = match settings::load(cli.config.as_deref(), &overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Watch => cmd::watch::run(&config),
        Commands::Poll => cmd::poll::run(&config, cli.json),
        Commands::List => cmd::list::run(&config, cli.json),
        Commands::Status { terminal: true } => cmd::terminal::status(&config),
        Commands::Status { terminal: false } => cmd::status::run(&config, cli.json),
        Commands::Tune => cmd::terminal::tune(&config),
        Commands::Apply { id } => cmd::act::run(&config, cmd::act::Verb::Apply, id, cli.json),
        Commands::Dismiss { id } => cmd::act::run(&config, cmd::act::Verb::Dismiss, id, cli.json),
        Commands::Config { subcommand } => {
            cmd::config::run(&config, cli.config.as_deref(), subcommand, cli.json)
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
