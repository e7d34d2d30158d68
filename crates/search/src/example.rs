//! Verified example recipes and few-shot prompt construction.
//!
//! The prompt shown to the scoring model is two known-good recipe lines
//! followed by the target, e.g.:
//!
//! ```text
//! Steam = Fire + Water
//!  Wave = Water + Wind
//!  Lava =
//! ```
//!
//! Lines after the first start with a space: the model's word tokens
//! carry a leading space, so the line break is encoded as `"\n "` and
//! generation continues with bare words.

use crate::engine::{PairOracle, SearchError, TextCodec};

/// Elemental names used to seed the bank. All encode to a single token
/// under the reference tokenizer.
pub const ELEMENTAL_SEEDS: [&str; 10] = [
    "Water", "Fire", "Wind", "Earth", "Lake", "Plant", "Mountain", "Ocean", "Storm", "Cloud",
];

/// A verified recipe where all three names are single tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleRecipe {
    pub first: String,
    pub second: String,
    pub result: String,
}

/// A small bank of verified one-token recipes.
///
/// Populated once per process; membership never changes afterwards.
#[derive(Debug)]
pub struct ExampleBank {
    recipes: Vec<ExampleRecipe>,
}

impl ExampleBank {
    /// Build the bank by combining every unordered seed pair (self-pairs
    /// included) and keeping results that are themselves single tokens.
    ///
    /// Errors if a seed is not a single token; an unproductive oracle
    /// yields an empty bank, which surfaces as an error at prompt time.
    pub async fn populate(
        oracle: &dyn PairOracle,
        codec: &dyn TextCodec,
        seeds: &[&str],
    ) -> Result<Self, SearchError> {
        for seed in seeds {
            let count = codec.token_count(seed)?;
            if count != 1 {
                return Err(SearchError::ExampleBank(format!(
                    "seed {seed:?} encodes to {count} tokens, expected 1"
                )));
            }
        }

        let mut recipes = Vec::new();
        for first in seeds {
            for second in seeds {
                if first > second {
                    continue;
                }
                if let Some(result) = oracle.combine(first, second).await? {
                    if codec.token_count(&result)? == 1 {
                        recipes.push(ExampleRecipe {
                            first: first.to_string(),
                            second: second.to_string(),
                            result,
                        });
                    }
                }
            }
        }

        tracing::info!(recipes = recipes.len(), seeds = seeds.len(), "Example bank populated");
        Ok(Self { recipes })
    }

    /// Build a bank directly from known recipes (tests, replays).
    pub fn from_recipes(recipes: Vec<ExampleRecipe>) -> Self {
        Self { recipes }
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Render the few-shot prompt for `target` using `count` recipes
    /// drawn without replacement from the bank.
    ///
    /// Sampling goes through the caller's RNG, so a seeded RNG yields a
    /// reproducible prompt.
    pub fn render_prompt<R: rand::Rng + ?Sized>(
        &self,
        target: &str,
        count: usize,
        rng: &mut R,
    ) -> Result<String, SearchError> {
        if self.recipes.len() < count {
            return Err(SearchError::ExampleBank(format!(
                "bank holds {} recipes, prompt needs {count}",
                self.recipes.len()
            )));
        }

        let chosen = rand::seq::index::sample(rng, self.recipes.len(), count);
        let mut prompt = String::new();
        for idx in chosen.iter() {
            let recipe = &self.recipes[idx];
            prompt.push_str(&format!(
                "{} = {} + {}\n ",
                recipe.result, recipe.first, recipe.second
            ));
        }
        prompt.push_str(&format!("{target} ="));
        Ok(prompt)
    }
}
