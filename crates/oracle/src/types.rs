/// Errors that can occur while talking to the combination oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The response arrived but did not match the wire contract
    /// (missing field, wrong value kind). Never retried: a malformed
    /// contract cannot self-heal.
    #[error("Oracle protocol violation: {0}")]
    Protocol(String),

    /// Failure reading or writing the recipe cache.
    #[error("Recipe cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    /// Malformed endpoint URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// A combination returned by the oracle, before sentinel normalization.
///
/// The wire sentinel `result == "Nothing" && emoji == ""` means "no
/// combination exists" and is normalized to `None` by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    /// Name of the produced item.
    pub result: String,
    /// Icon string attached to the item (may be empty).
    pub emoji: String,
    /// True if this pair had never been combined on the service before.
    pub is_new: bool,
}

impl Combination {
    /// Collapse the wire sentinel into `None`; any other response maps
    /// to `Some(result)`.
    pub fn into_result(self) -> Option<String> {
        if self.result == "Nothing" && self.emoji.is_empty() {
            None
        } else {
            Some(self.result)
        }
    }
}

/// Order a pair canonically: lexicographically smaller name first.
///
/// Every cache key and every wire request uses this order, which is what
/// makes `combine(a, b)` and `combine(b, a)` indistinguishable.
pub fn canonical_pair(first: &str, second: &str) -> (String, String) {
    if first <= second {
        (first.to_string(), second.to_string())
    } else {
        (second.to_string(), first.to_string())
    }
}
