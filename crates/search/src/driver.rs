//! Reverse-recipe driver: consumes the candidate stream, deduplicates,
//! and validates against the oracle until the target appears or the
//! budget runs out.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::SeedableRng;

use oracle::canonical_pair;

use crate::cancel::CancelToken;
use crate::config::SearchConfig;
use crate::engine::{PairOracle, PairStream, SearchError, TextCodec, TokenScorer};
use crate::example::ExampleBank;

/// A validated recipe: `first + second = result`, operands in canonical
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundRecipe {
    pub first: String,
    pub second: String,
    pub result: String,
}

/// Outcome of one reverse search, found or not.
#[derive(Debug, Clone)]
pub struct SearchReport {
    /// The target that was searched for.
    pub target: String,
    /// The first recipe whose oracle result matched the target.
    pub found: Option<FoundRecipe>,
    /// Oracle validations issued (each consumes one unit of budget).
    pub oracle_calls: u32,
    /// Candidates pulled from the stream, duplicates included.
    pub candidates_pulled: u32,
    /// Candidates skipped because their canonical pair was already tried.
    pub duplicates_skipped: u32,
    /// Wall-clock time for the whole search.
    pub wall_time_ms: u64,
}

/// Drives [`PairStream`] candidates through the oracle.
pub struct ReverseSearcher<'a> {
    oracle: &'a dyn PairOracle,
    scorer: &'a dyn TokenScorer,
    codec: &'a dyn TextCodec,
    bank: &'a ExampleBank,
    config: SearchConfig,
    cancel: CancelToken,
}

impl<'a> ReverseSearcher<'a> {
    pub fn new(
        oracle: &'a dyn PairOracle,
        scorer: &'a dyn TokenScorer,
        codec: &'a dyn TextCodec,
        bank: &'a ExampleBank,
        config: SearchConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            oracle,
            scorer,
            codec,
            bank,
            config,
            cancel,
        }
    }

    /// Search for a pair that combines into `target`.
    ///
    /// `banned` names (plus the target itself) may not appear as either
    /// operand. At most `max_pairs` oracle validations are issued;
    /// candidates whose canonical pair was already tried are skipped
    /// without touching the budget. First match wins.
    ///
    /// Cancellation and budget/frontier exhaustion are not errors: the
    /// report simply carries `found: None`.
    pub async fn find(
        &self,
        target: &str,
        banned: &[String],
        max_pairs: usize,
    ) -> Result<SearchReport, SearchError> {
        let start_time = std::time::Instant::now();

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut stream = PairStream::new(
            target,
            banned,
            self.bank,
            self.scorer,
            self.codec,
            self.config.clone(),
            self.cancel.clone(),
            &mut rng,
        )?;

        let target_lc = target.to_lowercase();
        let mut used: HashSet<(String, String)> = HashSet::new();
        let mut oracle_calls: u32 = 0;
        let mut candidates_pulled: u32 = 0;
        let mut duplicates_skipped: u32 = 0;

        while (oracle_calls as usize) < max_pairs {
            if self.cancel.is_cancelled() {
                tracing::info!(target, oracle_calls, "Reverse search cancelled");
                break;
            }

            let Some(candidate) = stream.next_pair()? else {
                tracing::info!(target, oracle_calls, "Candidate stream ended");
                break;
            };
            candidates_pulled += 1;

            let (first, second) = canonical_pair(&candidate.first, &candidate.second);
            if !used.insert((first.to_lowercase(), second.to_lowercase())) {
                duplicates_skipped += 1;
                continue;
            }

            oracle_calls += 1;
            let result = self.oracle.combine(&first, &second).await?;
            tracing::info!(
                target,
                first = %first,
                second = %second,
                result = result.as_deref().unwrap_or(""),
                cost = candidate.cost,
                oracle_calls,
                "Validated candidate"
            );

            if let Some(result) = result {
                if result.to_lowercase() == target_lc {
                    return Ok(SearchReport {
                        target: target.to_string(),
                        found: Some(FoundRecipe {
                            first,
                            second,
                            result,
                        }),
                        oracle_calls,
                        candidates_pulled,
                        duplicates_skipped,
                        wall_time_ms: start_time.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        Ok(SearchReport {
            target: target.to_string(),
            found: None,
            oracle_calls,
            candidates_pulled,
            duplicates_skipped,
            wall_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}
