//! Tokenizer and scoring-model adapters for recipe search.
//!
//! Wraps a HuggingFace tokenizer and a Llama-architecture model loaded
//! via candle. The model adapter exposes exactly one operation: a batched
//! forward pass over left-padded token prefixes returning the
//! final-position logits per prefix. Everything that interprets those
//! logits (normalization, top-k expansion) lives in the search crate.
//!
//! # Key types
//!
//! - [`TextTokenizer`] — text ↔ token-id mapping
//! - [`RecipeModel`] — batched next-token logits
//! - [`CachedTokenCounter`] — LRU memo over token counting
//! - [`ScoringConfig`] / [`DeviceConfig`] — model location and device

pub mod counter;
pub mod model;
pub mod tokenizer;
pub mod types;

pub use counter::{CachedTokenCounter, TokenCount};
pub use model::RecipeModel;
pub use tokenizer::TextTokenizer;
pub use types::{DeviceConfig, ScoringConfig};
