//! Mock implementations of search traits for testing without a model or
//! network.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use oracle::{canonical_pair, OracleError};

use crate::engine::{PairOracle, SearchError, TextCodec, TokenScorer};

// ---------------------------------------------------------------------------
// MockOracle
// ---------------------------------------------------------------------------

enum CannedAnswer {
    Result(Option<String>),
    ProtocolViolation,
}

/// Mock oracle with canned answers keyed by canonical pair.
///
/// Unknown pairs answer "no combination". Every call is recorded so
/// tests can assert exact call counts and order.
pub struct MockOracle {
    answers: HashMap<(String, String), CannedAnswer>,
    calls: Mutex<Vec<(String, String)>>,
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOracle {
    /// Create an empty mock oracle (every pair combines to nothing).
    pub fn new() -> Self {
        Self {
            answers: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add a canned answer; argument order is irrelevant.
    pub fn add_response(&mut self, first: &str, second: &str, result: Option<&str>) {
        self.answers.insert(
            canonical_pair(first, second),
            CannedAnswer::Result(result.map(|s| s.to_string())),
        );
    }

    /// Make a pair answer with a protocol violation.
    pub fn add_protocol_violation(&mut self, first: &str, second: &str) {
        self.answers
            .insert(canonical_pair(first, second), CannedAnswer::ProtocolViolation);
    }

    /// Canonical pairs queried so far, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PairOracle for MockOracle {
    async fn combine(&self, first: &str, second: &str) -> Result<Option<String>, SearchError> {
        let key = canonical_pair(first, second);
        self.calls.lock().unwrap().push(key.clone());
        match self.answers.get(&key) {
            Some(CannedAnswer::Result(result)) => Ok(result.clone()),
            Some(CannedAnswer::ProtocolViolation) => Err(SearchError::Oracle(
                OracleError::Protocol("canned protocol violation".to_string()),
            )),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// MockCodec
// ---------------------------------------------------------------------------

/// Mock codec over a tiny fixed vocabulary: token id `i` decodes to
/// `vocab[i]`, and decoding concatenates the pieces.
///
/// Prompts always encode to `[0]` — engine tests only need a stable
/// prefix, not real tokenization. Token counting splits on whitespace,
/// so `"Water"` is one token and `"Forest Fire"` two.
pub struct MockCodec {
    vocab: Vec<String>,
}

impl MockCodec {
    pub fn new(vocab: &[&str]) -> Self {
        Self {
            vocab: vocab.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// The vocabulary used by most engine tests.
    ///
    /// ```text
    /// 0 <prompt>   1 <reserved>   2 "Fire"  3 "Earth"  4 "Water"
    /// 5 "Wind"     6 " + "        7 "\n"    8 "="      9 " Leady"
    /// ```
    pub fn with_craft_vocab() -> Self {
        Self::new(&[
            "<prompt>", "<reserved>", "Fire", "Earth", "Water", "Wind", " + ", "\n", "=",
            " Leady",
        ])
    }

    /// Vocabulary size (logit rows must have this length).
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }
}

impl TextCodec for MockCodec {
    fn encode_prompt(&self, _text: &str) -> Result<Vec<u32>, SearchError> {
        Ok(vec![0])
    }

    fn decode(&self, ids: &[u32]) -> Result<String, SearchError> {
        let mut text = String::new();
        for &id in ids {
            let piece = self
                .vocab
                .get(id as usize)
                .ok_or_else(|| SearchError::Codec(anyhow::anyhow!("unknown token id {id}")))?;
            text.push_str(piece);
        }
        Ok(text)
    }

    fn token_count(&self, name: &str) -> Result<usize, SearchError> {
        Ok(name.split_whitespace().count())
    }
}

// ---------------------------------------------------------------------------
// MockScorer
// ---------------------------------------------------------------------------

/// Mock scorer with sparse canned logits keyed by the full prefix
/// (prompt + generated tokens).
///
/// Unspecified tokens get `-inf` logits, which the engine skips; an
/// unknown prefix yields an all-`-inf` row, a dead end.
pub struct MockScorer {
    vocab_size: usize,
    responses: HashMap<Vec<u32>, Vec<(u32, f32)>>,
}

impl MockScorer {
    pub fn new(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            responses: HashMap::new(),
        }
    }

    /// Set the finite logit entries for a prefix.
    pub fn add_response(&mut self, prefix: &[u32], entries: &[(u32, f32)]) {
        self.responses.insert(prefix.to_vec(), entries.to_vec());
    }
}

impl TokenScorer for MockScorer {
    fn next_token_logits(&self, prefixes: &[Vec<u32>]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut rows = Vec::with_capacity(prefixes.len());
        for prefix in prefixes {
            let mut row = vec![f32::NEG_INFINITY; self.vocab_size];
            if let Some(entries) = self.responses.get(prefix) {
                for &(token, logit) in entries {
                    row[token as usize] = logit;
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_oracle_default_is_no_combination() {
        let oracle = MockOracle::new();
        assert_eq!(oracle.combine("Fire", "Water").await.unwrap(), None);
        assert_eq!(oracle.calls(), vec![("Fire".to_string(), "Water".to_string())]);
    }

    #[tokio::test]
    async fn test_mock_oracle_canned_response_ignores_order() {
        let mut oracle = MockOracle::new();
        oracle.add_response("Water", "Fire", Some("Steam"));
        assert_eq!(
            oracle.combine("Fire", "Water").await.unwrap(),
            Some("Steam".to_string())
        );
        assert_eq!(
            oracle.combine("Water", "Fire").await.unwrap(),
            Some("Steam".to_string())
        );
    }

    #[tokio::test]
    async fn test_mock_oracle_protocol_violation() {
        let mut oracle = MockOracle::new();
        oracle.add_protocol_violation("Fire", "Water");
        let err = oracle.combine("Fire", "Water").await.unwrap_err();
        assert!(matches!(
            err,
            SearchError::Oracle(OracleError::Protocol(_))
        ));
    }

    #[test]
    fn test_mock_codec_decodes_by_concatenation() {
        let codec = MockCodec::with_craft_vocab();
        let text = codec.decode(&[2, 6, 3, 7]).unwrap();
        assert_eq!(text, "Fire + Earth\n");
    }

    #[test]
    fn test_mock_codec_rejects_unknown_id() {
        let codec = MockCodec::with_craft_vocab();
        assert!(codec.decode(&[99]).is_err());
    }

    #[test]
    fn test_mock_scorer_unknown_prefix_is_dead() {
        let scorer = MockScorer::new(4);
        let rows = scorer.next_token_logits(&[vec![0]]).unwrap();
        assert!(rows[0].iter().all(|l| l.is_infinite() && *l < 0.0));
    }

    #[test]
    fn test_mock_scorer_canned_entries() {
        let mut scorer = MockScorer::new(4);
        scorer.add_response(&[0], &[(2, 1.5)]);
        let rows = scorer.next_token_logits(&[vec![0]]).unwrap();
        assert_eq!(rows[0][2], 1.5);
        assert!(rows[0][3].is_infinite());
    }
}
