//! Bridges between search traits and real crate types (oracle, scoring).

use async_trait::async_trait;

use oracle::OracleClient;
use scoring::{RecipeModel, TextTokenizer};

use crate::engine::{PairOracle, SearchError, TextCodec, TokenScorer};

#[async_trait]
impl PairOracle for OracleClient {
    async fn combine(&self, first: &str, second: &str) -> Result<Option<String>, SearchError> {
        Ok(OracleClient::combine(self, first, second).await?)
    }
}

impl TokenScorer for RecipeModel {
    fn next_token_logits(&self, prefixes: &[Vec<u32>]) -> Result<Vec<Vec<f32>>, SearchError> {
        RecipeModel::next_token_logits(self, prefixes).map_err(SearchError::Scorer)
    }
}

impl TextCodec for TextTokenizer {
    fn encode_prompt(&self, text: &str) -> Result<Vec<u32>, SearchError> {
        TextTokenizer::encode_prompt(self, text).map_err(SearchError::Codec)
    }

    fn decode(&self, ids: &[u32]) -> Result<String, SearchError> {
        TextTokenizer::decode(self, ids).map_err(SearchError::Codec)
    }

    fn token_count(&self, name: &str) -> Result<usize, SearchError> {
        self.encode(name)
            .map(|ids| ids.len())
            .map_err(SearchError::Codec)
    }
}
