use std::path::PathBuf;

use anyhow::{Context, Result};
use blocknotes_cli::cli::{
    circles, config_init, config_show, profiles, resolve_config, run_feed, CircleAction,
    ConfigOverrides, FeedOptions, ProfileAction,
};
use blocknotes_cli::tracing_setup::init_tracing;
use blocknotes_core::{Database, Stores};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "blocknotes")]
#[command(about = "Nostr timeline and contact circles from the command line")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short, global = true)]
    pretty: bool,

    /// Path to JSON config file (defaults to <data dir>/config.json)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Directory holding the database and config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Relay to subscribe to
    #[arg(long, global = true)]
    relay: Option<String>,

    /// NIP-05 directory used to verify profile names
    #[arg(long, global = true)]
    directory: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the relay's timeline for a while, then print it
    Feed {
        /// Seconds to listen
        #[arg(long, short, default_value_t = 30)]
        seconds: u64,
        #[arg(long)]
        hide_spam: bool,
        #[arg(long)]
        hide_invoice: bool,
    },

    /// Manage circles
    Circles {
        #[command(subcommand)]
        action: CircleAction,
    },

    /// Manage cached profiles
    Profiles {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the effective config to the config path
    Init,
    /// Print the effective config
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_file.as_deref()) {
        eprintln!("Warning: {:#}", e);
    }

    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let overrides = ConfigOverrides {
        config: cli.config,
        data_dir: cli.data_dir,
        relay_url: cli.relay,
        directory_url: cli.directory,
    };
    let (config, config_path) = resolve_config(&overrides)?;

    let open_stores = || -> Result<Stores> {
        let path = config.database_path();
        let db = Database::open(&path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Ok(Stores::new(&db))
    };

    let output = match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Init => config_init(&config, &config_path)?,
            ConfigAction::Show => config_show(&config)?,
        },
        Commands::Feed {
            seconds,
            hide_spam,
            hide_invoice,
        } => {
            let stores = open_stores()?;
            let options = FeedOptions {
                seconds,
                hide_spam,
                hide_invoice,
            };
            run_feed(&config, &stores, options).await?
        }
        Commands::Circles { action } => circles(&open_stores()?, action)?,
        Commands::Profiles { action } => profiles(&open_stores()?, action)?,
    };

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", rendered);
    Ok(())
}
