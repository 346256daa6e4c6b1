use clap::{Parser, Subcommand};
use dotenv::dotenv;
use env_logger::Env;
use log::{error, info};
use std::process;

use facetrust::config;

mod cli;

/// FaceTrust administration CLI
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Sets the configuration file
    #[clap(short, long, value_name = "FILE", default_value = "config.toml")]
    config: String,

    /// Turn debugging information on
    #[clap(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,

    /// List enrolled identities
    Identities,

    /// Deactivate an identity; its face stops counting for uniqueness
    Deactivate {
        #[clap(long)]
        email: String,
    },

    /// Delete an identity and its two-factor binding
    Delete {
        #[clap(long)]
        email: String,
    },

    /// Show (or clear) the failed-login count for an email
    Attempts {
        #[clap(long)]
        email: String,

        /// Reset the count
        #[clap(long)]
        clear: bool,
    },

    /// Issue and enable a TOTP secret for an identity
    TotpSetup {
        #[clap(long)]
        email: String,
    },

    /// Print the current code for a base32 secret
    TotpCode {
        #[clap(long)]
        secret: String,
    },

    /// Disable two-factor authentication for an identity
    #[clap(name = "disable-2fa")]
    Disable2fa {
        #[clap(long)]
        email: String,
    },

    /// Euclidean distance between two descriptor files (JSON arrays)
    Distance {
        #[clap(value_name = "A.json")]
        first: String,

        #[clap(value_name = "B.json")]
        second: String,
    },

    /// Replay a recorded frame observation log through the liveness gate
    Liveness {
        #[clap(long, value_name = "FILE.json")]
        frames: String,
    },
}

fn main() {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    let level = match cli.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    info!("Starting FaceTrust CLI");

    let config = match config::load_config(&cli.config) {
        Ok(config) => {
            info!("Configuration loaded from {}", cli.config);
            config
        }
        Err(err) => {
            error!("Failed to load configuration: {:#}", err);
            process::exit(1);
        }
    };

    let result = match &cli.command {
        Commands::Init => cli::Gate::open(&config).map(|_| println!("Database ready at {}", config.database.path)),
        Commands::Identities => cli::Gate::open(&config).and_then(|gate| cli::identity::list_identities(&gate)),
        Commands::Deactivate { email } => cli::Gate::open(&config).and_then(|gate| cli::identity::deactivate(&gate, email)),
        Commands::Delete { email } => cli::Gate::open(&config).and_then(|gate| cli::identity::delete(&gate, email)),
        Commands::Attempts { email, clear } => {
            cli::Gate::open(&config).and_then(|gate| cli::identity::attempts(&gate, email, *clear))
        }
        Commands::TotpSetup { email } => cli::Gate::open(&config).and_then(|gate| cli::two_factor::setup(&gate, email)),
        Commands::TotpCode { secret } => cli::two_factor::print_code(&config, secret),
        Commands::Disable2fa { email } => cli::Gate::open(&config).and_then(|gate| cli::two_factor::disable(&gate, email)),
        Commands::Distance { first, second } => cli::biometric::distance(&config, first, second),
        Commands::Liveness { frames } => cli::biometric::replay_liveness(&config, frames),
    };

    if let Err(err) = result {
        error!("{:#}", err);
        process::exit(1);
    }
}
