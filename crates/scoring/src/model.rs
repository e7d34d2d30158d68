//! Llama-architecture scoring model with a batched, padding-aware forward.
//!
//! Loads `config.json` + mmap'd safetensors via candle and exposes one
//! operation: next-token logits for a batch of token prefixes. Shorter
//! prefixes are left-padded to the batch maximum and an attention mask
//! keeps real tokens from attending to padding. There is no KV cache:
//! each search round scores unrelated prefixes, so every call is a fresh
//! full-prefix forward.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{embedding, Embedding, Linear, Module, RmsNorm, VarBuilder};
use serde::Deserialize;

use crate::types::ScoringConfig;

/// Token id used to left-pad shorter sequences. Masked out of attention,
/// so its embedding never reaches a real position.
const PAD_TOKEN_ID: u32 = 0;

// ---------------------------------------------------------------------------
// Architecture config
// ---------------------------------------------------------------------------

/// Model architecture deserialized from `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelArch {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub vocab_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: Option<usize>,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f32,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub tie_word_embeddings: bool,
}

fn default_rms_norm_eps() -> f64 {
    1e-5
}
fn default_rope_theta() -> f32 {
    10_000.0
}
fn default_max_position_embeddings() -> usize {
    4096
}

impl ModelArch {
    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    fn kv_heads(&self) -> usize {
        self.num_key_value_heads
            .unwrap_or(self.num_attention_heads)
    }
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

fn repeat_kv(xs: Tensor, n_rep: usize) -> candle_core::Result<Tensor> {
    if n_rep == 1 {
        Ok(xs)
    } else {
        let (b, kv_heads, t, head_dim) = xs.dims4()?;
        Tensor::cat(&vec![&xs; n_rep], 2)?.reshape((b, kv_heads * n_rep, t, head_dim))
    }
}

struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, arch: &ModelArch) -> candle_core::Result<Self> {
        let size_q = arch.head_dim() * arch.num_attention_heads;
        let size_kv = arch.head_dim() * arch.kv_heads();
        Ok(Self {
            q_proj: candle_nn::linear_no_bias(arch.hidden_size, size_q, vb.pp("q_proj"))?,
            k_proj: candle_nn::linear_no_bias(arch.hidden_size, size_kv, vb.pp("k_proj"))?,
            v_proj: candle_nn::linear_no_bias(arch.hidden_size, size_kv, vb.pp("v_proj"))?,
            o_proj: candle_nn::linear_no_bias(size_q, arch.hidden_size, vb.pp("o_proj"))?,
            num_heads: arch.num_attention_heads,
            num_kv_heads: arch.kv_heads(),
            head_dim: arch.head_dim(),
        })
    }

    /// `bias` is the additive attention bias `(b, 1, t, t)` in f32:
    /// zero where attention is allowed, a large negative value where the
    /// key is padding or in the causal future.
    fn forward(
        &self,
        x: &Tensor,
        bias: &Tensor,
        cos: &Tensor,
        sin: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        let q = self
            .q_proj
            .forward(x)?
            .reshape((b, t, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((b, t, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(x)?
            .reshape((b, t, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let q = candle_nn::rotary_emb::rope(&q, cos, sin)?;
        let k = candle_nn::rotary_emb::rope(&k, cos, sin)?;

        let k = repeat_kv(k, self.num_heads / self.num_kv_heads)?;
        let v = repeat_kv(v, self.num_heads / self.num_kv_heads)?;

        let in_dtype = q.dtype();
        let q = q.to_dtype(DType::F32)?;
        let k = k.to_dtype(DType::F32)?;
        let v = v.to_dtype(DType::F32)?;

        let att = (q.matmul(&k.t()?)? / (self.head_dim as f64).sqrt())?;
        let att = att.broadcast_add(bias)?;
        let att = candle_nn::ops::softmax_last_dim(&att)?;

        let y = att.matmul(&v.contiguous()?)?.to_dtype(in_dtype)?;
        let y = y
            .transpose(1, 2)?
            .reshape((b, t, self.num_heads * self.head_dim))?;
        self.o_proj.forward(&y)
    }
}

struct Mlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl Mlp {
    fn load(vb: VarBuilder, arch: &ModelArch) -> candle_core::Result<Self> {
        Ok(Self {
            gate_proj: candle_nn::linear_no_bias(
                arch.hidden_size,
                arch.intermediate_size,
                vb.pp("gate_proj"),
            )?,
            up_proj: candle_nn::linear_no_bias(
                arch.hidden_size,
                arch.intermediate_size,
                vb.pp("up_proj"),
            )?,
            down_proj: candle_nn::linear_no_bias(
                arch.intermediate_size,
                arch.hidden_size,
                vb.pp("down_proj"),
            )?,
        })
    }

    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let gated = (candle_nn::ops::silu(&self.gate_proj.forward(x)?)?
            * self.up_proj.forward(x)?)?;
        self.down_proj.forward(&gated)
    }
}

struct Block {
    input_norm: RmsNorm,
    attn: Attention,
    post_attn_norm: RmsNorm,
    mlp: Mlp,
}

impl Block {
    fn load(vb: VarBuilder, arch: &ModelArch) -> candle_core::Result<Self> {
        Ok(Self {
            input_norm: candle_nn::rms_norm(
                arch.hidden_size,
                arch.rms_norm_eps,
                vb.pp("input_layernorm"),
            )?,
            attn: Attention::load(vb.pp("self_attn"), arch)?,
            post_attn_norm: candle_nn::rms_norm(
                arch.hidden_size,
                arch.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
            mlp: Mlp::load(vb.pp("mlp"), arch)?,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        bias: &Tensor,
        cos: &Tensor,
        sin: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let residual = x;
        let x = (self
            .attn
            .forward(&self.input_norm.forward(x)?, bias, cos, sin)?
            + residual)?;
        let residual = &x;
        let x = (self.mlp.forward(&self.post_attn_norm.forward(&x)?)? + residual)?;
        Ok(x)
    }
}

// ---------------------------------------------------------------------------
// RecipeModel
// ---------------------------------------------------------------------------

/// Next-token scoring model.
pub struct RecipeModel {
    embed: Embedding,
    blocks: Vec<Block>,
    norm: RmsNorm,
    lm_head: Linear,
    cos: Tensor,
    sin: Tensor,
    arch: ModelArch,
    /// Effective context bound: `config.max_seq_len` clamped to the
    /// model's own position limit.
    max_seq_len: usize,
    device: Device,
}

impl RecipeModel {
    /// Load the model from a model directory.
    ///
    /// The directory must contain:
    /// - `config.json` — model architecture config
    /// - `*.safetensors` — model weights (can be sharded)
    pub fn load(config: &ScoringConfig) -> anyhow::Result<Self> {
        let device = config.device.to_candle_device()?;
        let dtype = match &device {
            Device::Cpu => DType::F32,
            _ => DType::BF16,
        };

        tracing::info!(
            model_path = %config.model_path.display(),
            ?dtype,
            "Loading scoring model"
        );

        let config_path = config.model_path.join("config.json");
        let config_json = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", config_path.display()))?;
        let arch: ModelArch = serde_json::from_str(&config_json)
            .map_err(|e| anyhow::anyhow!("failed to parse config.json: {e}"))?;

        tracing::info!(
            hidden_size = arch.hidden_size,
            num_layers = arch.num_hidden_layers,
            vocab_size = arch.vocab_size,
            num_heads = arch.num_attention_heads,
            "Model config loaded"
        );

        let safetensor_files = find_safetensors(&config.model_path)?;
        tracing::info!(num_shards = safetensor_files.len(), "Loading safetensors weights");

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&safetensor_files, dtype, &device)? };

        let embed = embedding(arch.vocab_size, arch.hidden_size, vb.pp("model.embed_tokens"))?;
        let blocks = (0..arch.num_hidden_layers)
            .map(|i| Block::load(vb.pp(format!("model.layers.{i}")), &arch))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let norm = candle_nn::rms_norm(arch.hidden_size, arch.rms_norm_eps, vb.pp("model.norm"))?;
        let lm_head = if arch.tie_word_embeddings {
            Linear::new(embed.embeddings().clone(), None)
        } else {
            candle_nn::linear_no_bias(arch.hidden_size, arch.vocab_size, vb.pp("lm_head"))?
        };

        let (cos, sin) = rope_tables(&arch, dtype, &device)?;
        let max_seq_len = config.max_seq_len.min(arch.max_position_embeddings);

        tracing::info!(vocab_size = arch.vocab_size, max_seq_len, "Scoring model loaded");

        Ok(Self {
            embed,
            blocks,
            norm,
            lm_head,
            cos,
            sin,
            arch,
            max_seq_len,
            device,
        })
    }

    /// Vocabulary size of the loaded model.
    pub fn vocab_size(&self) -> usize {
        self.arch.vocab_size
    }

    /// Final-position logits over the full vocabulary for each prefix.
    ///
    /// One batched forward pass; shorter prefixes are left-padded and
    /// masked. Returns one `vocab_size`-length row per prefix, in input
    /// order.
    pub fn next_token_logits(&self, prefixes: &[Vec<u32>]) -> anyhow::Result<Vec<Vec<f32>>> {
        if prefixes.is_empty() {
            return Ok(Vec::new());
        }
        let max_len = prefixes.iter().map(Vec::len).max().unwrap_or(0);
        anyhow::ensure!(max_len > 0, "cannot score an empty prefix");
        anyhow::ensure!(
            max_len <= self.max_seq_len,
            "prefix length {max_len} exceeds max sequence length {}",
            self.max_seq_len
        );

        let (flat_ids, mask_rows) = left_pad(prefixes, max_len, PAD_TOKEN_ID);
        let batch = prefixes.len();

        let input = Tensor::from_vec(flat_ids, (batch, max_len), &self.device)?;
        let bias = attention_bias(&mask_rows, &self.device)?;

        let logits = self.forward(&input, &bias)?;
        Ok(logits.to_vec2::<f32>()?)
    }

    fn forward(&self, input_ids: &Tensor, bias: &Tensor) -> candle_core::Result<Tensor> {
        let (_b, t) = input_ids.dims2()?;
        let cos = self.cos.narrow(0, 0, t)?;
        let sin = self.sin.narrow(0, 0, t)?;

        let mut x = self.embed.forward(input_ids)?;
        for block in &self.blocks {
            x = block.forward(&x, bias, &cos, &sin)?;
        }

        // Only the final position feeds the search; with left-padding it
        // is always a real token.
        let x = x.narrow(1, t - 1, 1)?;
        let x = self.norm.forward(&x)?;
        let logits = self.lm_head.forward(&x)?;
        logits.squeeze(1)?.to_dtype(DType::F32)
    }
}

/// Precompute RoPE cos/sin tables `(max_position, head_dim / 2)`.
fn rope_tables(
    arch: &ModelArch,
    dtype: DType,
    device: &Device,
) -> candle_core::Result<(Tensor, Tensor)> {
    let head_dim = arch.head_dim();
    let inv_freq: Vec<f32> = (0..head_dim)
        .step_by(2)
        .map(|i| 1f32 / arch.rope_theta.powf(i as f32 / head_dim as f32))
        .collect();
    let inv_freq_len = inv_freq.len();
    let inv_freq = Tensor::from_vec(inv_freq, (1, inv_freq_len), device)?;

    let positions = Tensor::arange(0, arch.max_position_embeddings as u32, device)?
        .to_dtype(DType::F32)?
        .reshape((arch.max_position_embeddings, 1))?;
    let angles = positions.matmul(&inv_freq)?;
    Ok((angles.cos()?.to_dtype(dtype)?, angles.sin()?.to_dtype(dtype)?))
}

/// Left-pad every prefix to `max_len`, returning the flattened id matrix
/// and per-row attention masks (1.0 = real token, 0.0 = padding).
fn left_pad(prefixes: &[Vec<u32>], max_len: usize, pad_id: u32) -> (Vec<u32>, Vec<Vec<f32>>) {
    let mut flat = Vec::with_capacity(prefixes.len() * max_len);
    let mut masks = Vec::with_capacity(prefixes.len());
    for prefix in prefixes {
        let pad = max_len - prefix.len();
        flat.extend(std::iter::repeat(pad_id).take(pad));
        flat.extend_from_slice(prefix);
        let mut mask = vec![0f32; pad];
        mask.extend(std::iter::repeat(1f32).take(prefix.len()));
        masks.push(mask);
    }
    (flat, masks)
}

/// Additive attention bias `(b, 1, t, t)`: zero where position `i` may
/// attend to key `j` (causal and non-padding), `-1e9` otherwise.
fn attention_bias(mask_rows: &[Vec<f32>], device: &Device) -> candle_core::Result<Tensor> {
    let b = mask_rows.len();
    let t = mask_rows[0].len();

    let causal: Vec<f32> = (0..t)
        .flat_map(|i| (0..t).map(move |j| if j <= i { 1f32 } else { 0f32 }))
        .collect();
    let causal = Tensor::from_vec(causal, (1, 1, t, t), device)?;

    let keys: Vec<f32> = mask_rows.iter().flatten().copied().collect();
    let keys = Tensor::from_vec(keys, (b, 1, 1, t), device)?;

    let allowed = causal.broadcast_mul(&keys)?;
    // allowed 1.0 -> bias 0.0, allowed 0.0 -> bias -1e9
    allowed.affine(1e9, -1e9)
}

fn find_safetensors(model_path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(model_path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", model_path.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|ext| ext == "safetensors").unwrap_or(false))
        .collect();
    files.sort();
    anyhow::ensure!(
        !files.is_empty(),
        "no *.safetensors files in {}",
        model_path.display()
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_deserializes_with_defaults() {
        let json = r#"{
            "hidden_size": 4096,
            "intermediate_size": 11008,
            "vocab_size": 32000,
            "num_hidden_layers": 32,
            "num_attention_heads": 32
        }"#;
        let arch: ModelArch = serde_json::from_str(json).unwrap();
        assert_eq!(arch.kv_heads(), 32);
        assert_eq!(arch.head_dim(), 128);
        assert!((arch.rms_norm_eps - 1e-5).abs() < 1e-12);
        assert_eq!(arch.max_position_embeddings, 4096);
        assert!(!arch.tie_word_embeddings);
    }

    #[test]
    fn test_arch_respects_kv_heads() {
        let json = r#"{
            "hidden_size": 4096,
            "intermediate_size": 11008,
            "vocab_size": 32000,
            "num_hidden_layers": 32,
            "num_attention_heads": 32,
            "num_key_value_heads": 8
        }"#;
        let arch: ModelArch = serde_json::from_str(json).unwrap();
        assert_eq!(arch.kv_heads(), 8);
    }

    #[test]
    fn test_left_pad_aligns_to_the_right() {
        let prefixes = vec![vec![5, 6, 7], vec![9]];
        let (flat, masks) = left_pad(&prefixes, 3, 0);
        assert_eq!(flat, vec![5, 6, 7, 0, 0, 9]);
        assert_eq!(masks[0], vec![1.0, 1.0, 1.0]);
        assert_eq!(masks[1], vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_attention_bias_blocks_padding_and_future() {
        let masks = vec![vec![0f32, 1f32]];
        let bias = attention_bias(&masks, &Device::Cpu).unwrap();
        let rows: Vec<Vec<f32>> = bias
            .reshape((2, 2))
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        // Query 0 (padding): key 0 is padding (-1e9), key 1 is future (-1e9).
        assert!(rows[0][0] < -1e8);
        assert!(rows[0][1] < -1e8);
        // Query 1 (real): key 0 is padding (-1e9), key 1 allowed (0).
        assert!(rows[1][0] < -1e8);
        assert!(rows[1][1].abs() < 1e-6);
    }
}
