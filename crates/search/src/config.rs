/// Search configuration loaded from TOML.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SearchConfig {
    /// Nodes scored per batched model call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Children pushed per expanded node (top next tokens by probability).
    #[serde(default = "default_top_children")]
    pub top_children: usize,

    /// Maximum operand length in characters; longer operands are pruned.
    #[serde(default = "default_max_operand_len")]
    pub max_operand_len: usize,

    /// Token id the model reserves as a no-op; never expanded.
    #[serde(default = "default_reserved_token_id")]
    pub reserved_token_id: u32,

    /// Example recipes rendered into each prompt.
    #[serde(default = "default_num_examples")]
    pub num_examples: usize,

    /// Maximum oracle validations per reverse search.
    #[serde(default = "default_max_pairs")]
    pub max_pairs: usize,

    /// RNG seed for example sampling; `None` draws from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_batch_size() -> usize {
    16
}
fn default_top_children() -> usize {
    1000
}
fn default_max_operand_len() -> usize {
    30
}
fn default_reserved_token_id() -> u32 {
    1
}
fn default_num_examples() -> usize {
    2
}
fn default_max_pairs() -> usize {
    1_000_000_000
}

impl SearchConfig {
    /// Log a warning for configurations that will stall the search.
    pub fn validate(&self) {
        if self.batch_size == 0 {
            tracing::warn!("batch_size = 0; no node will ever be expanded");
        }
        if self.top_children == 0 {
            tracing::warn!("top_children = 0; every expansion will be empty");
        }
        if self.num_examples == 0 {
            tracing::warn!("num_examples = 0; the prompt will carry no recipe examples");
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            top_children: default_top_children(),
            max_operand_len: default_max_operand_len(),
            reserved_token_id: default_reserved_token_id(),
            num_examples: default_num_examples(),
            max_pairs: default_max_pairs(),
            seed: None,
        }
    }
}
