//! FlowIntent CLI: inspect deep links, validate chain definitions and dry-run
//! them against a scripted platform.
//!
//! Reuses the same core logic (flowintent-core) that a platform bridge embeds.

use clap::{Parser, Subcommand};
use flowintent_cli::commands;

/// FlowIntent CLI: screen-flow chains and deep links
#[derive(Parser)]
#[command(name = "flowintent", version, about = "FlowIntent CLI: screen-flow chains and deep links")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the query parameters of a deep link as JSON
    Params {
        /// Deep link URI (e.g. "myapp://item?id=7&action=view")
        uri: String,
    },

    /// Load a chain definition, list its steps and optionally validate a deep link
    Validate {
        /// Path to the chain YAML file
        #[arg(long)]
        chain: String,
        /// Deep link to validate against the chain's rules
        #[arg(long)]
        uri: Option<String>,
    },

    /// Run a chain definition against a scripted platform
    Run {
        /// Path to the chain YAML file
        #[arg(long)]
        chain: String,
        /// Deep link whose params feed the chain
        #[arg(long)]
        uri: Option<String>,
        /// YAML list of results answering each dispatch in order
        #[arg(long)]
        results: Option<String>,
        /// Validation policy override: launch_anyway | block_first_launch
        #[arg(long, env = "FLOWINTENT_POLICY")]
        policy: Option<String>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowintent_core=warn,flowintent_cli=info".into()),
        )
        .init();

    let result = match cli.command {
        Commands::Params { uri } => commands::params::run(&uri),

        Commands::Validate { chain, uri } => commands::validate::run(&chain, uri.as_deref()),

        Commands::Run {
            chain,
            uri,
            results,
            policy,
            json,
        } => match policy.as_deref().map(commands::parse_policy).transpose() {
            Ok(policy) => {
                let options = commands::run::RunOptions {
                    uri,
                    results_file: results,
                    policy,
                };
                commands::run::run(&chain, options, json).await
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
