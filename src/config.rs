//! Model and run configuration.
//!
//! The architecture hyperparameters live in [`GlmpConfig`] (burn `Config`,
//! so they serialize alongside checkpoints); everything the original
//! training scripts read from a global argument table is enumerated in
//! [`RunSettings`] and passed by reference into each component at
//! construction time.

use burn::config::Config;

/// Dataset flavor. Selects gold-target construction and which evaluation
/// metrics are reported (entity F1 + BLEU for in-car assistant data,
/// dialogue accuracy for babi-style data).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Kvr,
    Babi,
}

impl Dataset {
    pub fn parse(name: &str) -> Result<Self, String> {
        match name {
            "kvr" => Ok(Self::Kvr),
            "babi" => Ok(Self::Babi),
            other => Err(format!("unknown dataset '{}' (expected kvr or babi)", other)),
        }
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kvr => write!(f, "kvr"),
            Self::Babi => write!(f, "babi"),
        }
    }
}

/// Metric used for early stopping and checkpoint promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStop {
    Bleu,
    EntF1,
    Acc,
}

impl EarlyStop {
    pub fn parse(name: &str) -> Result<Self, String> {
        match name {
            "bleu" => Ok(Self::Bleu),
            "entf1" => Ok(Self::EntF1),
            "acc" => Ok(Self::Acc),
            other => Err(format!(
                "unknown early-stop metric '{}' (expected bleu, entf1 or acc)",
                other
            )),
        }
    }
}

/// Architecture hyperparameters.
#[derive(Config, Debug)]
pub struct GlmpConfig {
    /// Hidden / embedding dimension (shared across encoder, memory, decoder).
    #[config(default = 128)]
    pub hidden: usize,
    /// Memory hops (plain variant) == decoder query hops.
    #[config(default = 3)]
    pub hops: usize,
    /// Attention heads per graph-attention stage.
    #[config(default = 4)]
    pub nheads: usize,
    /// Incoming-edge state slots per node in the graph-recurrent cell.
    #[config(default = 4)]
    pub recurrent_size: usize,
    /// Number of KB edge types (self-loop, entity link, shared head, turn flow).
    #[config(default = 4)]
    pub edge_types: usize,
    /// Negative slope of the graph-attention LeakyReLU.
    #[config(default = 0.2)]
    pub leaky_alpha: f64,
    /// Refine the memory with the bidirectional graph-recurrent pass
    /// instead of stacked graph attention.
    #[config(default = false)]
    pub recurrent_refinement: bool,
}

/// Runtime switches — the original's global argument table, enumerated.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Skip global-pointer gating when querying memory.
    pub ablation_g: bool,
    /// Skip injecting encoder hidden states into the memory.
    pub ablation_h: bool,
    /// Use the plain multi-hop dynamic memory instead of the graph-refined one.
    pub ablation_d: bool,
    /// Randomly mask memory entity tokens to UNK during training.
    pub unk_mask: bool,
    /// Probability of feeding gold tokens to the decoder during training.
    pub teacher_forcing_ratio: f64,
    pub dataset: Dataset,
    /// Dropout probability (embeddings, memory, decoder input).
    pub dropout: f64,
    /// Batch size.
    pub batch: usize,
    /// Free-form tag appended to the checkpoint directory name.
    pub add_name: String,
    /// Print decoded samples during evaluation.
    pub gen_sample: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            ablation_g: false,
            ablation_h: false,
            ablation_d: false,
            unk_mask: true,
            teacher_forcing_ratio: 0.5,
            dataset: Dataset::Kvr,
            dropout: 0.2,
            batch: 8,
            add_name: String::new(),
            gen_sample: false,
        }
    }
}

impl RunSettings {
    /// Checkpoint directory name for this run, mirroring the original
    /// `save/GLMP-<tag><data>HDD<h>BSZ<b>DR<d>L<l>lr<lr>` scheme.
    pub fn run_name(&self, config: &GlmpConfig, lr: f64) -> String {
        let data = match self.dataset {
            Dataset::Kvr => "KVR",
            Dataset::Babi => "BABI",
        };
        format!(
            "GLMP-{}{}HDD{}BSZ{}DR{}L{}lr{}",
            self.add_name, data, config.hidden, self.batch, self.dropout, config.hops, lr
        )
    }
}
