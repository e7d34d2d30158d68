//! Wires the real adapters into the search traits and runs the CLI
//! subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};

use oracle::{OracleClient, RecipeCache};
use scoring::{CachedTokenCounter, RecipeModel, ScoringConfig, TextTokenizer, TokenCount};
use search::{
    CancelToken, ExampleBank, PairOracle, ReverseSearcher, SearchError, TextCodec,
    ELEMENTAL_SEEDS,
};

use crate::config::load_solver_toml;

// ---------------------------------------------------------------------------
// Token counting with SQLite write-through
// ---------------------------------------------------------------------------

/// Token counter that checks the `tokenize` relation before the
/// tokenizer and writes fresh counts back.
pub struct SqliteBackedCounter<C> {
    inner: C,
    cache: Arc<RecipeCache>,
}

impl<C> SqliteBackedCounter<C> {
    pub fn new(inner: C, cache: Arc<RecipeCache>) -> Self {
        Self { inner, cache }
    }
}

impl<C: TokenCount> TokenCount for SqliteBackedCounter<C> {
    fn token_count(&self, name: &str) -> anyhow::Result<usize> {
        if let Some(count) = self.cache.token_count(name)? {
            return Ok(count);
        }
        let count = self.inner.token_count(name)?;
        tracing::debug!(name, count, "Tokenized name");
        self.cache.store_token_count(name, count)?;
        Ok(count)
    }
}

/// [`TextCodec`] over the real tokenizer with memoized, persisted token
/// counts.
struct PersistentCodec {
    tokenizer: Arc<TextTokenizer>,
    counter: CachedTokenCounter<SqliteBackedCounter<Arc<TextTokenizer>>>,
}

impl PersistentCodec {
    fn new(tokenizer: Arc<TextTokenizer>, cache: Arc<RecipeCache>) -> Self {
        let counter = CachedTokenCounter::new(
            SqliteBackedCounter::new(Arc::clone(&tokenizer), cache),
            4096,
        );
        Self { tokenizer, counter }
    }
}

impl TextCodec for PersistentCodec {
    fn encode_prompt(&self, text: &str) -> Result<Vec<u32>, SearchError> {
        self.tokenizer.encode_prompt(text).map_err(SearchError::Codec)
    }

    fn decode(&self, ids: &[u32]) -> Result<String, SearchError> {
        self.tokenizer.decode(ids).map_err(SearchError::Codec)
    }

    fn token_count(&self, name: &str) -> Result<usize, SearchError> {
        self.counter.token_count(name).map_err(SearchError::Codec)
    }
}

/// Oracle decorator that advances the progress bar once per validation
/// and shows the pair being tried.
struct ProgressOracle<'a> {
    inner: &'a OracleClient,
    bar: ProgressBar,
}

#[async_trait]
impl PairOracle for ProgressOracle<'_> {
    async fn combine(&self, first: &str, second: &str) -> Result<Option<String>, SearchError> {
        self.bar.set_message(format!("{first} + {second}"));
        let result = PairOracle::combine(self.inner, first, second).await;
        self.bar.inc(1);
        result
    }
}

// ---------------------------------------------------------------------------
// Subcommand arguments
// ---------------------------------------------------------------------------

pub struct SolveArgs {
    pub config: PathBuf,
    pub target: String,
    pub banned: Vec<String>,
    pub max_pairs: Option<usize>,
    pub model_path: Option<PathBuf>,
    pub db: PathBuf,
    pub base_url: Option<String>,
    pub seed: Option<u64>,
}

pub struct PairArgs {
    pub config: PathBuf,
    pub first: String,
    pub second: String,
    pub db: PathBuf,
    pub base_url: Option<String>,
    pub fresh: bool,
}

pub struct TokenizeArgs {
    pub config: PathBuf,
    pub name: String,
    pub model_path: Option<PathBuf>,
    pub db: PathBuf,
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

/// Run the full reverse search for one target.
pub async fn run_solve(args: SolveArgs) -> anyhow::Result<()> {
    let toml = load_solver_toml(&args.config)?;

    let mut search_config = toml.search;
    if let Some(max_pairs) = args.max_pairs {
        search_config.max_pairs = max_pairs;
    }
    if args.seed.is_some() {
        search_config.seed = args.seed;
    }

    let mut oracle_config = toml.oracle;
    if let Some(base_url) = args.base_url {
        oracle_config.base_url = base_url;
    }

    let scoring_config = resolve_scoring(toml.scoring, args.model_path)?;

    let cache = Arc::new(RecipeCache::open(&args.db)?);
    let client = OracleClient::new(&oracle_config, Arc::clone(&cache))?;
    let tokenizer = Arc::new(TextTokenizer::load(&scoring_config.model_path)?);
    let codec = PersistentCodec::new(Arc::clone(&tokenizer), Arc::clone(&cache));
    let model = RecipeModel::load(&scoring_config)?;

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone());

    tracing::info!(seeds = ELEMENTAL_SEEDS.len(), "Populating example bank");
    let bank = ExampleBank::populate(&client, &codec, &ELEMENTAL_SEEDS).await?;

    let max_pairs = search_config.max_pairs;
    let pb = validation_bar(max_pairs);
    let oracle = ProgressOracle {
        inner: &client,
        bar: pb.clone(),
    };
    let searcher = ReverseSearcher::new(&oracle, &model, &codec, &bank, search_config, cancel);

    let report = searcher.find(&args.target, &args.banned, max_pairs).await?;
    pb.finish_and_clear();

    tracing::info!(
        target = %report.target,
        oracle_calls = report.oracle_calls,
        candidates = report.candidates_pulled,
        duplicates = report.duplicates_skipped,
        time_ms = report.wall_time_ms,
        "Reverse search finished"
    );

    println!("\n--- Search Summary ---");
    println!("Target: {}", report.target);
    match &report.found {
        Some(recipe) => {
            println!("Recipe: {} + {} = {}", recipe.first, recipe.second, recipe.result);
        }
        None => println!("Recipe: not found"),
    }
    println!("Oracle calls: {}", report.oracle_calls);
    println!(
        "Candidates: {} ({} duplicate pairs skipped)",
        report.candidates_pulled, report.duplicates_skipped
    );
    println!("Elapsed: {:.1}s", report.wall_time_ms as f64 / 1000.0);

    Ok(())
}

/// One cached oracle lookup.
pub async fn run_pair(args: PairArgs) -> anyhow::Result<()> {
    let toml = load_solver_toml(&args.config)?;
    let mut oracle_config = toml.oracle;
    if let Some(base_url) = args.base_url {
        oracle_config.base_url = base_url;
    }

    let cache = Arc::new(RecipeCache::open(&args.db)?);
    let client = OracleClient::new(&oracle_config, cache)?;

    let result = if args.fresh {
        client.refresh(&args.first, &args.second).await?
    } else {
        client.combine(&args.first, &args.second).await?
    };

    println!("{}", result.as_deref().unwrap_or(""));
    Ok(())
}

/// Token count for one name, cached in the `tokenize` relation.
pub async fn run_tokenize(args: TokenizeArgs) -> anyhow::Result<()> {
    let toml = load_solver_toml(&args.config)?;
    let scoring_config = resolve_scoring(toml.scoring, args.model_path)?;

    let cache = Arc::new(RecipeCache::open(&args.db)?);
    let tokenizer = Arc::new(TextTokenizer::load(&scoring_config.model_path)?);
    let counter = SqliteBackedCounter::new(tokenizer, cache);

    println!("{}", counter.token_count(&args.name)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_scoring(
    from_toml: Option<ScoringConfig>,
    model_path: Option<PathBuf>,
) -> anyhow::Result<ScoringConfig> {
    match (from_toml, model_path) {
        (Some(mut config), Some(path)) => {
            config.model_path = path;
            Ok(config)
        }
        (Some(config), None) => Ok(config),
        (None, Some(path)) => Ok(ScoringConfig::new(path)),
        (None, None) => anyhow::bail!(
            "no model path: pass --model-path or add a [scoring] section to the config"
        ),
    }
}

fn install_interrupt_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing current step");
            cancel.cancel();
        }
    });
}

fn validation_bar(max_pairs: usize) -> ProgressBar {
    let pb = ProgressBar::new(max_pairs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid progress bar template")
            .progress_chars("=> "),
    );
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedCounter {
        calls: AtomicUsize,
    }

    impl TokenCount for FixedCounter {
        fn token_count(&self, _name: &str) -> anyhow::Result<usize> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(1)
        }
    }

    #[test]
    fn test_sqlite_backed_counter_writes_through() {
        let cache = Arc::new(RecipeCache::open_in_memory().unwrap());
        let counter = SqliteBackedCounter::new(
            FixedCounter {
                calls: AtomicUsize::new(0),
            },
            Arc::clone(&cache),
        );

        assert_eq!(counter.token_count("Water").unwrap(), 1);
        // Second call is served from the tokenize relation.
        assert_eq!(counter.token_count("Water").unwrap(), 1);
        assert_eq!(counter.inner.calls.load(Ordering::Relaxed), 1);
        assert_eq!(cache.token_count("Water").unwrap(), Some(1));
    }

    #[test]
    fn test_resolve_scoring_prefers_cli_path() {
        let toml = Some(ScoringConfig::new(PathBuf::from("/from/toml")));
        let config = resolve_scoring(toml, Some(PathBuf::from("/from/cli"))).unwrap();
        assert_eq!(config.model_path, PathBuf::from("/from/cli"));
    }

    #[test]
    fn test_resolve_scoring_requires_some_path() {
        assert!(resolve_scoring(None, None).is_err());
    }
}
