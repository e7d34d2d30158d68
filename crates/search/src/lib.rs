//! Guided best-first search for reverse recipes.
//!
//! Wires together scoring (token-level model adapter) and oracle (the
//! combination service) to discover which pair of ingredients produces a
//! target item. Uses trait-based abstraction so the search algorithm can
//! be tested with mocks (no model, no network).
//!
//! # Key types
//!
//! - [`PairStream`] — lazy, cost-ordered stream of candidate pairs
//! - [`ReverseSearcher`] — the driver: dedup + oracle validation loop
//! - [`ExampleBank`] — verified one-token recipes for few-shot prompts
//! - [`SearchConfig`] — configuration loaded from TOML
//! - [`TokenScorer`] / [`TextCodec`] / [`PairOracle`] — seam traits
//! - [`CancelToken`] — cooperative cancellation, checked at every
//!   suspension point

pub mod adapters;
pub mod cancel;
pub mod config;
pub mod driver;
pub mod engine;
pub mod example;
pub mod mocks;
pub mod node;

pub use cancel::CancelToken;
pub use config::SearchConfig;
pub use driver::{FoundRecipe, ReverseSearcher, SearchReport};
pub use engine::{PairOracle, PairStream, SearchError, TextCodec, TokenScorer};
pub use example::{ExampleBank, ExampleRecipe, ELEMENTAL_SEEDS};
pub use node::{Candidate, Node};
