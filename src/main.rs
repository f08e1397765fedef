use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use eventsphere::paths;
use eventsphere::Config;

mod commands;

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Encrypted local store and clustering for geotagged events", long_about = None)]
struct Cli {
    /// Config file (default: $EVENTSPHERE_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a new event
    Add {
        /// Event title
        title: String,

        /// Category (natural_disaster, political, health, other)
        #[arg(short, long, default_value = "other")]
        category: String,

        /// Latitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Event id (default: random UUID)
        #[arg(long)]
        id: Option<String>,

        /// Event time as RFC 3339 or epoch milliseconds (default: now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Show one event
    Show {
        /// Event id
        id: String,
    },

    /// List events, newest first
    List {
        /// Only events at or after this time (RFC 3339 or epoch ms)
        #[arg(long)]
        since: Option<String>,

        /// Only events at or before this time (RFC 3339 or epoch ms)
        #[arg(long)]
        until: Option<String>,

        /// Only these categories
        #[arg(short, long, value_delimiter = ',')]
        category: Vec<String>,
    },

    /// Search titles and categories
    Search {
        /// Case-insensitive text to look for
        query: Option<String>,

        /// Exact category filter
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Change fields of an existing event
    Update {
        /// Event id
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        category: Option<String>,

        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,

        /// RFC 3339 or epoch milliseconds
        #[arg(long)]
        at: Option<String>,
    },

    /// Delete an event (no error if it does not exist)
    Delete {
        /// Event id
        id: String,
    },

    /// Delete every event
    Clear {
        /// Skip the confirmation check
        #[arg(short, long)]
        yes: bool,
    },

    /// Count stored events
    Count,

    /// Group stored events by world region
    Regions,

    /// Cluster augmented events from a JSON file by theme
    Cluster {
        /// JSON array of augmented events
        file: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(paths::LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Add {
            title,
            category,
            lat,
            lon,
            id,
            at,
        } => {
            let draft = commands::events::Draft {
                id,
                title,
                category,
                latitude: lat,
                longitude: lon,
                at,
            };
            commands::events::add(&config, draft, json)?;
        }
        Commands::Show { id } => {
            commands::events::show(&config, &id, json)?;
        }
        Commands::List {
            since,
            until,
            category,
        } => {
            commands::events::list(&config, since.as_deref(), until.as_deref(), &category, json)?;
        }
        Commands::Search { query, category } => {
            commands::events::search(&config, query.as_deref(), category.as_deref(), json)?;
        }
        Commands::Update {
            id,
            title,
            category,
            lat,
            lon,
            at,
        } => {
            let changes = commands::events::Changes {
                title,
                category,
                latitude: lat,
                longitude: lon,
                at,
            };
            commands::events::update(&config, &id, changes, json)?;
        }
        Commands::Delete { id } => {
            commands::events::delete(&config, &id, json)?;
        }
        Commands::Clear { yes } => {
            commands::events::clear(&config, yes, json)?;
        }
        Commands::Count => {
            commands::events::count(&config, json)?;
        }
        Commands::Regions => {
            commands::cluster::regions(&config, json)?;
        }
        Commands::Cluster { file } => {
            commands::cluster::themed(&config, &file, json)?;
        }
    }

    Ok(())
}
