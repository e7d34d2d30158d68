mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pipeline::{PairArgs, SolveArgs, TokenizeArgs};

/// uncraft: discover which pair of ingredients combines into a target
/// item, guided by a token-level scoring model.
#[derive(Parser)]
#[command(name = "uncraft", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for reverse search and cache-backed oracle access.
#[derive(Subcommand)]
enum Command {
    /// Search for a pair whose combination is the target.
    Solve {
        /// The item to reverse-engineer.
        #[arg(long)]
        target: String,
        /// Names excluded from both operand positions (the target is
        /// always excluded).
        #[arg(long, value_delimiter = ',')]
        banned: Vec<String>,
        /// Maximum oracle validations before giving up.
        #[arg(long)]
        max_pairs: Option<usize>,
        /// Path to the solver config TOML file.
        #[arg(long, default_value = "configs/search.toml")]
        config: PathBuf,
        /// Path to the scoring model directory (overrides [scoring] in
        /// the config).
        #[arg(long)]
        model_path: Option<PathBuf>,
        /// Path to the SQLite recipe cache.
        #[arg(long, default_value = "recipes.db")]
        db: PathBuf,
        /// Override the oracle base URL.
        #[arg(long)]
        base_url: Option<String>,
        /// RNG seed for reproducible prompts.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Combine two items through the cached oracle.
    Pair {
        /// First item name.
        #[arg(long)]
        first: String,
        /// Second item name.
        #[arg(long)]
        second: String,
        /// Path to the solver config TOML file.
        #[arg(long, default_value = "configs/search.toml")]
        config: PathBuf,
        /// Path to the SQLite recipe cache.
        #[arg(long, default_value = "recipes.db")]
        db: PathBuf,
        /// Override the oracle base URL.
        #[arg(long)]
        base_url: Option<String>,
        /// Bypass the cached answer and re-query the oracle.
        #[arg(long)]
        fresh: bool,
    },
    /// Count the tokens a name encodes to.
    Tokenize {
        /// The name to tokenize.
        #[arg(long)]
        name: String,
        /// Path to the solver config TOML file.
        #[arg(long, default_value = "configs/search.toml")]
        config: PathBuf,
        /// Path to the scoring model directory (for tokenizer.json).
        #[arg(long)]
        model_path: Option<PathBuf>,
        /// Path to the SQLite recipe cache.
        #[arg(long, default_value = "recipes.db")]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Solve {
            target,
            banned,
            max_pairs,
            config,
            model_path,
            db,
            base_url,
            seed,
        } => {
            pipeline::run_solve(SolveArgs {
                config,
                target,
                banned,
                max_pairs,
                model_path,
                db,
                base_url,
                seed,
            })
            .await
        }
        Command::Pair {
            first,
            second,
            config,
            db,
            base_url,
            fresh,
        } => {
            pipeline::run_pair(PairArgs {
                config,
                first,
                second,
                db,
                base_url,
                fresh,
            })
            .await
        }
        Command::Tokenize {
            name,
            config,
            model_path,
            db,
        } => {
            pipeline::run_tokenize(TokenizeArgs {
                config,
                name,
                model_path,
                db,
            })
            .await
        }
    }
}
