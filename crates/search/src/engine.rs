//! Best-first candidate stream: priority queue, grammar state machine,
//! batched node expansion.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::config::SearchConfig;
use crate::example::ExampleBank;
use crate::node::{Candidate, Node};

/// Errors that can occur during reverse-recipe search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Error from the combination oracle.
    #[error("Oracle error: {0}")]
    Oracle(#[from] oracle::OracleError),
    /// Error from the scoring model.
    #[error("Scorer error: {0}")]
    Scorer(#[source] anyhow::Error),
    /// Error from the tokenizer.
    #[error("Tokenizer error: {0}")]
    Codec(#[source] anyhow::Error),
    /// The example bank cannot supply enough recipes for a prompt.
    #[error("Example bank too small: {0}")]
    ExampleBank(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Scoring model that reports next-token distributions for a batch of
/// token prefixes.
///
/// Sync trait — matches candle's synchronous inference API. Each returned
/// row holds the raw final-position logits over the full vocabulary for
/// the corresponding prefix; normalization is the engine's job.
pub trait TokenScorer {
    /// One batched forward pass over `prefixes`, one row per prefix.
    fn next_token_logits(&self, prefixes: &[Vec<u32>]) -> Result<Vec<Vec<f32>>, SearchError>;
}

/// Text ↔ token-id mapping.
pub trait TextCodec {
    /// Encode a full prompt, special tokens included.
    fn encode_prompt(&self, text: &str) -> Result<Vec<u32>, SearchError>;
    /// Decode generated token ids back to text.
    fn decode(&self, ids: &[u32]) -> Result<String, SearchError>;
    /// Number of tokens a bare name encodes to (no special tokens).
    fn token_count(&self, name: &str) -> Result<usize, SearchError>;
}

/// The combination oracle: unordered pair in, optional result name out.
#[async_trait]
pub trait PairOracle: Send + Sync {
    /// Combine two items. `None` means the oracle knows no combination.
    async fn combine(&self, first: &str, second: &str) -> Result<Option<String>, SearchError>;
}

// ---------------------------------------------------------------------------
// Grammar state machine
// ---------------------------------------------------------------------------

/// Classification of a node by its decoded suffix text.
#[derive(Debug, Clone, PartialEq)]
enum NodeState {
    /// Still inside the grammar; worth expanding.
    Expandable,
    /// Dead end (malformed or constraint-violating); dropped silently.
    Pruned,
    /// A full `"<first> + <second>\n"` line.
    Complete { first: String, second: String },
}

/// Does the operand violate the grammar constraints?
fn operand_rejected(op: &str, banned: &HashSet<String>, max_len: usize) -> bool {
    op.is_empty()
        || op.starts_with(' ')
        || op.chars().count() > max_len
        || banned.contains(&op.to_lowercase())
}

/// Classify a decoded suffix against the recipe grammar.
///
/// - any `=` means the model looped back into template syntax: prune;
/// - once ` +` appears, the first operand (everything before the last
///   ` +`, matching the source grammar's greedy group) must pass the
///   length / ban / leading-space checks;
/// - a newline terminates the line: it must be the final character, and
///   both operands of `"<first> + <second>"` must pass the same checks.
fn classify(text: &str, banned: &HashSet<String>, max_len: usize) -> NodeState {
    if text.contains('=') {
        return NodeState::Pruned;
    }

    // Before the separator, the text so far is the would-be first
    // operand; a leading space is a tokenizer boundary artifact that
    // never produces a real first character.
    if !text.contains('+') && text.starts_with(' ') {
        return NodeState::Pruned;
    }

    if text.contains('+') {
        let Some(idx) = text.rfind(" +") else {
            return NodeState::Pruned;
        };
        if operand_rejected(&text[..idx], banned, max_len) {
            return NodeState::Pruned;
        }
    }

    if text.contains('\n') {
        let Some(line) = text.strip_suffix('\n') else {
            return NodeState::Pruned;
        };
        if line.contains('\n') {
            return NodeState::Pruned;
        }
        let Some((first, second)) = line.rsplit_once(" + ") else {
            return NodeState::Pruned;
        };
        if operand_rejected(first, banned, max_len) || operand_rejected(second, banned, max_len) {
            return NodeState::Pruned;
        }
        return NodeState::Complete {
            first: first.to_string(),
            second: second.to_string(),
        };
    }

    NodeState::Expandable
}

// ---------------------------------------------------------------------------
// PairStream
// ---------------------------------------------------------------------------

/// Lazy, cost-ordered stream of candidate pairs for one target.
///
/// Pull-based and infinite in principle: the caller decides how many
/// candidates to take. Dropping the stream drops the frontier; no work
/// continues in the background. The stream is not restartable — a new
/// search builds a new stream with a fresh queue.
pub struct PairStream<'a> {
    scorer: &'a dyn TokenScorer,
    codec: &'a dyn TextCodec,
    config: SearchConfig,
    cancel: CancelToken,
    /// Frozen context: prompt token ids every scored prefix starts with.
    prompt_tokens: Vec<u32>,
    /// Lowercased names excluded from both operand positions.
    banned: HashSet<String>,
    frontier: BinaryHeap<Reverse<Node>>,
    /// Candidates emitted by the current round, drained before popping more.
    ready: VecDeque<Candidate>,
}

impl<'a> PairStream<'a> {
    /// Build a stream for `target`.
    ///
    /// Renders the few-shot prompt from `bank` (two example recipes plus
    /// `"<target> ="`), encodes it as the frozen prefix, and seeds the
    /// frontier with the empty root. The target itself is always banned.
    pub fn new<R: rand::Rng + ?Sized>(
        target: &str,
        banned_names: &[String],
        bank: &ExampleBank,
        scorer: &'a dyn TokenScorer,
        codec: &'a dyn TextCodec,
        config: SearchConfig,
        cancel: CancelToken,
        rng: &mut R,
    ) -> Result<Self, SearchError> {
        config.validate();

        let prompt = bank.render_prompt(target, config.num_examples, rng)?;
        let prompt_tokens = codec.encode_prompt(&prompt)?;
        tracing::debug!(
            target,
            prompt_tokens = prompt_tokens.len(),
            "Search prompt encoded"
        );

        let mut banned: HashSet<String> =
            banned_names.iter().map(|n| n.to_lowercase()).collect();
        banned.insert(target.to_lowercase());

        let mut frontier = BinaryHeap::new();
        frontier.push(Reverse(Node::root()));

        Ok(Self {
            scorer,
            codec,
            config,
            cancel,
            prompt_tokens,
            banned,
            frontier,
            ready: VecDeque::new(),
        })
    }

    /// Next candidate pair, in non-decreasing cost order.
    ///
    /// `Ok(None)` means the frontier is exhausted or the stream was
    /// cancelled; both are terminal.
    pub fn next_pair(&mut self) -> Result<Option<Candidate>, SearchError> {
        loop {
            if let Some(candidate) = self.ready.pop_front() {
                tracing::debug!(
                    cost = candidate.cost,
                    first = %candidate.first,
                    second = %candidate.second,
                    "Candidate emitted"
                );
                return Ok(Some(candidate));
            }
            if self.cancel.is_cancelled() {
                tracing::debug!("Search cancelled, ending stream");
                return Ok(None);
            }
            if self.frontier.is_empty() {
                tracing::info!("Search frontier exhausted");
                return Ok(None);
            }

            self.run_round()?;
        }
    }

    /// One expansion round: pop up to `batch_size` expandable nodes,
    /// emitting or deferring completed nodes along the way, then run one
    /// batched scorer call and push the children.
    ///
    /// A complete node popped while the batch already holds pending
    /// expansions is re-queued instead of emitted: one of those
    /// expansions could still complete at a lower cost, and emitted
    /// costs must never decrease. A complete node popped while the batch
    /// is empty is the global frontier minimum and is safe to emit.
    fn run_round(&mut self) -> Result<(), SearchError> {
        let mut batch: Vec<Node> = Vec::new();
        let mut deferred: Vec<Node> = Vec::new();

        while batch.len() < self.config.batch_size {
            let Some(Reverse(node)) = self.frontier.pop() else {
                break;
            };
            let text = self.codec.decode(&node.tokens)?;
            match classify(&text, &self.banned, self.config.max_operand_len) {
                NodeState::Pruned => {}
                NodeState::Complete { first, second } => {
                    if batch.is_empty() {
                        self.ready.push_back(Candidate {
                            cost: node.cost.0,
                            first,
                            second,
                        });
                    } else {
                        deferred.push(node);
                    }
                }
                NodeState::Expandable => batch.push(node),
            }
        }

        if !batch.is_empty() {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.expand(&batch)?;
        }

        for node in deferred {
            self.frontier.push(Reverse(node));
        }
        Ok(())
    }

    fn expand(&mut self, batch: &[Node]) -> Result<(), SearchError> {
        let prefixes: Vec<Vec<u32>> = batch
            .iter()
            .map(|node| {
                let mut prefix =
                    Vec::with_capacity(self.prompt_tokens.len() + node.tokens.len());
                prefix.extend_from_slice(&self.prompt_tokens);
                prefix.extend_from_slice(&node.tokens);
                prefix
            })
            .collect();

        let rows = self.scorer.next_token_logits(&prefixes)?;
        if rows.len() != batch.len() {
            return Err(SearchError::Scorer(anyhow::anyhow!(
                "scorer returned {} rows for {} prefixes",
                rows.len(),
                batch.len()
            )));
        }

        for (node, row) in batch.iter().zip(&rows) {
            let log_z = log_sum_exp(row);
            for (token, logit) in top_tokens(row, self.config.top_children, self.config.reserved_token_id)
            {
                let log_prob = logit as f64 - log_z;
                // Zero-probability tokens can never finish a line at
                // finite cost.
                if !log_prob.is_finite() {
                    continue;
                }
                self.frontier.push(Reverse(node.child(token, log_prob)));
            }
        }

        tracing::debug!(
            batch = batch.len(),
            frontier = self.frontier.len(),
            "Batch expanded"
        );
        Ok(())
    }
}

/// `ln Σ exp(x)` over the full row, accumulated in f64 for stability.
fn log_sum_exp(row: &[f32]) -> f64 {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = row.iter().map(|&x| (x as f64 - max).exp()).sum();
    max + sum.ln()
}

/// Indices of the `k` largest logits, excluding the reserved token.
/// Order within the result is unspecified; the heap re-orders children.
fn top_tokens(row: &[f32], k: usize, reserved: u32) -> Vec<(u32, f32)> {
    let mut indices: Vec<u32> = (0..row.len() as u32).filter(|&i| i != reserved).collect();
    if indices.len() > k {
        indices.select_nth_unstable_by(k, |&a, &b| {
            row[b as usize]
                .partial_cmp(&row[a as usize])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        indices.truncate(k);
    }
    indices
        .into_iter()
        .map(|i| (i, row[i as usize]))
        .collect()
}
