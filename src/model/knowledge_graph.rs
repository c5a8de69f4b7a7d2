//! Graph-refined knowledge memory.
//!
//! Embeds the joint KB + dialogue memory, refines it over the KB adjacency
//! (two stacked multi-head graph-attention layers plus an averaged-head
//! output stage, or a bidirectional graph-recurrent pass), and exposes the
//! two-stage pointer interface: `load_graph` builds the memory and the
//! global pointer once per batch, `query` answers repeated local-pointer
//! lookups against the cached refined memory.

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer};
use burn::prelude::*;
use burn::tensor::activation::{sigmoid, softmax};

use super::attention::{GraphAttentionConfig, GraphAttentionLayer};
use super::graph_gru::{BidirectionalGraphGru, BidirectionalGraphGruConfig, MergeMode};
use super::{
    assert_memory_layout, bag_embed, gate_memory, inject_hidden, slot_logits, MemoryReadout,
    MemoryState,
};
use crate::config::RunSettings;
use crate::data::memory::GraphRecurrenceInputs;

/// Graph memory configuration.
#[derive(Config, Debug)]
pub struct KnowledgeGraphConfig {
    pub vocab: usize,
    pub hidden: usize,
    /// Attention heads per stage.
    #[config(default = 4)]
    pub nheads: usize,
    /// KB edge types for the recurrent refinement.
    #[config(default = 4)]
    pub edge_types: usize,
    /// Incoming-edge slots for the recurrent refinement.
    #[config(default = 4)]
    pub recurrent_size: usize,
    #[config(default = 0.2)]
    pub leaky_alpha: f64,
    #[config(default = 0.2)]
    pub dropout: f64,
    /// Refine with the bidirectional GraphGRU instead of graph attention.
    #[config(default = false)]
    pub recurrent_refinement: bool,
}

/// KB-graph memory with global/local pointer addressing.
#[derive(Module, Debug)]
pub struct KnowledgeGraph<B: Backend> {
    embeddings: Embedding<B>,
    dropout: Dropout,
    attentions: Vec<GraphAttentionLayer<B>>,
    attentions_2: Vec<GraphAttentionLayer<B>>,
    out_layer: Vec<GraphAttentionLayer<B>>,
    recurrence: Option<BidirectionalGraphGru<B>>,
    hidden: usize,
    nheads: usize,
    ablation_h: bool,
    ablation_g: bool,
}

impl KnowledgeGraphConfig {
    pub fn init<B: Backend>(&self, settings: &RunSettings, device: &B::Device) -> KnowledgeGraph<B> {
        let stage = |d_in: usize, concat: bool| -> Vec<GraphAttentionLayer<B>> {
            (0..self.nheads)
                .map(|_| {
                    GraphAttentionConfig::new(d_in, self.hidden)
                        .with_alpha(self.leaky_alpha)
                        .with_dropout(self.dropout)
                        .with_concat(concat)
                        .init(device)
                })
                .collect()
        };
        let recurrence = if self.recurrent_refinement {
            Some(
                BidirectionalGraphGruConfig::new(self.hidden, self.hidden, self.edge_types)
                    .with_recurrent_size(self.recurrent_size)
                    .init(device),
            )
        } else {
            None
        };
        KnowledgeGraph {
            embeddings: EmbeddingConfig::new(self.vocab, self.hidden)
                .with_initializer(Initializer::Normal {
                    mean: 0.0,
                    std: 0.1,
                })
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            attentions: stage(self.hidden, true),
            attentions_2: stage(self.nheads * self.hidden, true),
            out_layer: stage(self.nheads * self.hidden, false),
            recurrence,
            hidden: self.hidden,
            nheads: self.nheads,
            ablation_h: settings.ablation_h,
            ablation_g: settings.ablation_g,
        }
    }
}

/// Give every slot beyond the true content length an explicit self-loop, so
/// graph attention never propagates through undefined padding nodes. Rows
/// below `kb_len + conv_len` are left untouched.
pub fn patch_pad_self_loops<B: Backend>(
    adjacency: Tensor<B, 3>,
    kb_lengths: &[usize],
    conv_lengths: &[usize],
) -> Tensor<B, 3> {
    let [batch, slots, _] = adjacency.dims();
    let device = adjacency.device();

    let mut patch = vec![0.0f32; batch * slots * slots];
    for b in 0..batch {
        let content = kb_lengths[b] + conv_lengths[b];
        for s in content..slots {
            patch[(b * slots + s) * slots + s] = 1.0;
        }
    }
    let patch = Tensor::<B, 3>::from_data(TensorData::new(patch, [batch, slots, slots]), &device);
    (adjacency + patch).clamp(0.0, 1.0)
}

impl<B: Backend> KnowledgeGraph<B> {
    /// Build the refined memory for a batch and compute the global pointer.
    ///
    /// Returns sigmoid probabilities, the raw logits (for the selector
    /// loss), the encoder summary as the decoder readout, and the cached
    /// refined memory.
    #[allow(clippy::too_many_arguments)]
    pub fn load_graph(
        &self,
        story: Tensor<B, 3, Int>,
        kb_lengths: &[usize],
        conv_lengths: &[usize],
        hidden: Tensor<B, 2>,
        dh_outputs: Tensor<B, 3>,
        adjacency: Tensor<B, 3>,
        graph: &GraphRecurrenceInputs<B>,
    ) -> MemoryReadout<B> {
        let [batch, slots, _] = story.dims();
        assert_memory_layout(kb_lengths, conv_lengths, slots);

        // Bag-of-tokens embedding. PAD embeddings are deliberately left
        // unmasked on this path (ablated in the reference model).
        let mut embedded = bag_embed(&self.embeddings, story, false);
        if !self.ablation_h {
            embedded = inject_hidden(embedded, dh_outputs, kb_lengths, conv_lengths);
        }
        let embedded = self.dropout.forward(embedded);

        let adjacency = patch_pad_self_loops(adjacency, kb_lengths, conv_lengths);

        let memory = match &self.recurrence {
            Some(recurrence) => {
                let initial = Tensor::<B, 2>::zeros([batch, self.hidden], &embedded.device());
                let propagated =
                    recurrence.forward(embedded, graph, MergeMode::Sum, Some(initial));
                sigmoid(propagated)
            }
            None => {
                let stage = |layers: &[GraphAttentionLayer<B>], x: Tensor<B, 3>| {
                    let heads: Vec<Tensor<B, 3>> = layers
                        .iter()
                        .map(|att| att.forward(x.clone(), adjacency.clone()))
                        .collect();
                    heads
                };
                let x = Tensor::cat(stage(&self.attentions, embedded), 2);
                let x = Tensor::cat(stage(&self.attentions_2, x), 2);
                let heads = stage(&self.out_layer, x);
                let summed = heads
                    .into_iter()
                    .reduce(|a, b| a + b)
                    .expect("at least one attention head");
                sigmoid(summed / self.nheads as f64)
            }
        };

        let global_logits = slot_logits(memory.clone(), hidden.clone());
        MemoryReadout {
            global_pointer: sigmoid(global_logits.clone()),
            global_logits,
            readout: hidden,
            state: MemoryState {
                hop_memories: vec![memory],
            },
        }
    }

    /// One local-pointer query against the cached refined memory.
    ///
    /// Returns the softmax address distribution and its raw logits, both
    /// `[batch, slots]`.
    pub fn query(
        &self,
        state: &MemoryState<B>,
        query: Tensor<B, 2>,
        global_pointer: &Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let mut memory = state.hop_memories[0].clone();
        if !self.ablation_g {
            memory = gate_memory(memory, global_pointer);
        }
        let logits = slot_logits(memory, query);
        (softmax(logits.clone(), 1), logits)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
