//! Plain multi-hop key-value memory over KB + conversation tokens.
//!
//! The non-graph baseline: hop-specific embedding tables, iterative
//! attention reads, and the same global/local pointer contract as the
//! graph-refined memory, without any structural refinement.

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer};
use burn::prelude::*;
use burn::tensor::activation::{sigmoid, softmax};

use super::{
    assert_memory_layout, bag_embed, gate_memory, inject_hidden, slot_logits, MemoryReadout,
    MemoryState,
};
use crate::config::RunSettings;

/// Plain memory configuration.
#[derive(Config, Debug)]
pub struct ExternalKnowledgeConfig {
    pub vocab: usize,
    pub hidden: usize,
    /// Attention hops; the module holds `hops + 1` embedding tables.
    #[config(default = 3)]
    pub hops: usize,
    #[config(default = 0.2)]
    pub dropout: f64,
}

/// Multi-hop end-to-end memory with adjacent-weight-style hop tables.
#[derive(Module, Debug)]
pub struct ExternalKnowledge<B: Backend> {
    embeddings: Vec<Embedding<B>>,
    dropout: Dropout,
    hops: usize,
    ablation_h: bool,
    ablation_g: bool,
}

impl ExternalKnowledgeConfig {
    pub fn init<B: Backend>(
        &self,
        settings: &RunSettings,
        device: &B::Device,
    ) -> ExternalKnowledge<B> {
        let embeddings = (0..self.hops + 1)
            .map(|_| {
                EmbeddingConfig::new(self.vocab, self.hidden)
                    .with_initializer(Initializer::Normal {
                        mean: 0.0,
                        std: 0.1,
                    })
                    .init(device)
            })
            .collect();
        ExternalKnowledge {
            embeddings,
            dropout: DropoutConfig::new(self.dropout).init(),
            hops: self.hops,
            ablation_h: settings.ablation_h,
            ablation_g: settings.ablation_g,
        }
    }
}

impl<B: Backend> ExternalKnowledge<B> {
    /// Build the hop memories for a batch and compute the global pointer.
    ///
    /// - `story`: [batch, slots, MEM_TOKEN_SIZE] memory token ids
    /// - `hidden`: [batch, hidden] encoder summary (initial query)
    /// - `dh_outputs`: [batch, conv_len, hidden] encoder per-token states
    pub fn load_memory(
        &self,
        story: Tensor<B, 3, Int>,
        kb_lengths: &[usize],
        conv_lengths: &[usize],
        hidden: Tensor<B, 2>,
        dh_outputs: Tensor<B, 3>,
    ) -> MemoryReadout<B> {
        let [_, slots, _] = story.dims();
        assert_memory_layout(kb_lengths, conv_lengths, slots);

        let mut hop_memories = Vec::with_capacity(self.hops + 1);
        let mut u = hidden;
        let mut global_logits = None;

        for hop in 0..self.hops {
            let mut embed_a = bag_embed(&self.embeddings[hop], story.clone(), true);
            if hop == 0 && !self.ablation_h {
                embed_a = inject_hidden(embed_a, dh_outputs.clone(), kb_lengths, conv_lengths);
            }
            let embed_a = self.dropout.forward(embed_a);

            let logits = slot_logits(embed_a.clone(), u.clone());
            let prob = softmax(logits.clone(), 1);

            let mut embed_c = bag_embed(&self.embeddings[hop + 1], story.clone(), true);
            if hop == 0 && !self.ablation_h {
                embed_c = inject_hidden(embed_c, dh_outputs.clone(), kb_lengths, conv_lengths);
            }

            let o_k = (embed_c.clone() * prob.unsqueeze_dim::<3>(2))
                .sum_dim(1)
                .squeeze_dim::<2>(1);
            u = u + o_k;

            hop_memories.push(embed_a);
            if hop == self.hops - 1 {
                hop_memories.push(embed_c);
            }
            global_logits = Some(logits);
        }

        let global_logits = global_logits.expect("memory requires at least one hop");
        MemoryReadout {
            global_pointer: sigmoid(global_logits.clone()),
            global_logits,
            readout: u,
            state: MemoryState { hop_memories },
        }
    }

    /// One local-pointer query: multi-hop read against the cached memories,
    /// optionally gated by the global pointer.
    ///
    /// Returns the softmax address distribution and its raw logits, both
    /// `[batch, slots]`, from the final hop.
    pub fn query(
        &self,
        state: &MemoryState<B>,
        query: Tensor<B, 2>,
        global_pointer: &Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let mut u = query;
        let mut out = None;

        for hop in 0..self.hops {
            let mut embed_a = state.hop_memories[hop].clone();
            if !self.ablation_g {
                embed_a = gate_memory(embed_a, global_pointer);
            }
            let logits = slot_logits(embed_a, u.clone());
            let prob = softmax(logits.clone(), 1);

            let mut embed_c = state.hop_memories[hop + 1].clone();
            if !self.ablation_g {
                embed_c = gate_memory(embed_c, global_pointer);
            }
            let o_k = (embed_c * prob.clone().unsqueeze_dim::<3>(2))
                .sum_dim(1)
                .squeeze_dim::<2>(1);
            u = u + o_k;
            out = Some((prob, logits));
        }

        out.expect("memory requires at least one hop")
    }
}

// ─── Tests ────────────────────────────────────────────────────────
