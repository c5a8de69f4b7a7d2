//! Model modules: encoder, knowledge memory, graph propagation, decoder.

pub mod attention;
pub mod decoder;
pub mod encoder;
pub mod external_knowledge;
pub mod glmp;
pub mod graph_gru;
pub mod knowledge_graph;

use burn::module::Module;
use burn::prelude::*;

/// Memory representations cached by a knowledge module's load stage and
/// consumed by every subsequent local-pointer query.
///
/// The graph-refined variant stores a single refined memory; the plain
/// multi-hop variant stores one memory per embedding hop.
#[derive(Debug, Clone)]
pub struct MemoryState<B: Backend> {
    /// Hop memories, each `[batch, slots, hidden]`.
    pub hop_memories: Vec<Tensor<B, 3>>,
}

/// Result of loading a batch into the knowledge memory.
#[derive(Debug)]
pub struct MemoryReadout<B: Backend> {
    /// Per-slot relevance probabilities: `[batch, slots]`, in [0, 1].
    pub global_pointer: Tensor<B, 2>,
    /// Pre-sigmoid logits, needed by the selector loss: `[batch, slots]`.
    pub global_logits: Tensor<B, 2>,
    /// Summary vector handed to the decoder (`[batch, hidden]`): the memory
    /// read vector for the plain variant, the encoder summary for the
    /// graph variant.
    pub readout: Tensor<B, 2>,
    /// Cached memories for local-pointer queries.
    pub state: MemoryState<B>,
}

/// Per-slot dot-product logits between a memory and a query vector.
///
/// `memory`: `[batch, slots, hidden]`, `query`: `[batch, hidden]` →
/// `[batch, slots]`.
pub(crate) fn slot_logits<B: Backend>(memory: Tensor<B, 3>, query: Tensor<B, 2>) -> Tensor<B, 2> {
    let expanded = query.unsqueeze_dim::<3>(1); // [batch, 1, hidden]
    (memory * expanded).sum_dim(2).squeeze_dim::<2>(2)
}

/// Gate a memory elementwise by the global pointer, broadcast over the
/// embedding dimension.
pub(crate) fn gate_memory<B: Backend>(
    memory: Tensor<B, 3>,
    global_pointer: &Tensor<B, 2>,
) -> Tensor<B, 3> {
    memory * global_pointer.clone().unsqueeze_dim::<3>(2)
}

/// Bag-of-tokens slot embedding: embed every token id of every slot and sum
/// over the token width. With `mask_pad`, PAD embeddings are zeroed before
/// the sum so padding tokens contribute nothing.
pub(crate) fn bag_embed<B: Backend>(
    embedding: &burn::nn::Embedding<B>,
    story: Tensor<B, 3, Int>,
    mask_pad: bool,
) -> Tensor<B, 3> {
    use crate::data::vocab::PAD_TOKEN;

    let [batch, slots, width] = story.dims();
    let flat = story.clone().reshape([batch, slots * width]);
    let embedded = embedding.forward(flat); // [batch, slots*width, hidden]
    let hidden = embedded.dims()[2];
    let mut embedded = embedded.reshape([batch, slots, width, hidden]);
    if mask_pad {
        let pad = story.equal_elem(PAD_TOKEN as i32).float(); // [batch, slots, width]
        let keep = pad.neg() + 1.0;
        embedded = embedded * keep.unsqueeze_dim::<4>(3);
    }
    embedded.sum_dim(2).squeeze_dim::<3>(2)
}

/// Add the encoder's per-token hidden states onto the memory rows that hold
/// dialogue tokens. Per sample the layout is `kb_len` untouched KB rows,
/// `conv_len` injected rows, one untouched sentinel row, untouched padding.
/// Implemented as one batched gather + range mask built from the lengths.
pub(crate) fn inject_hidden<B: Backend>(
    memory: Tensor<B, 3>,
    dh_outputs: Tensor<B, 3>,
    kb_lengths: &[usize],
    conv_lengths: &[usize],
) -> Tensor<B, 3> {
    let [batch, slots, hidden] = memory.dims();
    let conv_width = dh_outputs.dims()[1];
    let device = memory.device();

    let mut index = vec![0i32; batch * slots];
    let mut in_range = vec![0.0f32; batch * slots];
    for b in 0..batch {
        let (kb, conv) = (kb_lengths[b], conv_lengths[b]);
        for s in kb..(kb + conv).min(slots) {
            index[b * slots + s] = ((s - kb).min(conv_width - 1)) as i32;
            in_range[b * slots + s] = 1.0;
        }
    }
    let index = Tensor::<B, 2, Int>::from_data(TensorData::new(index, [batch, slots]), &device)
        .unsqueeze_dim::<3>(2)
        .expand([batch, slots, hidden]);
    let in_range =
        Tensor::<B, 2>::from_data(TensorData::new(in_range, [batch, slots]), &device)
            .unsqueeze_dim::<3>(2);

    let aligned = dh_outputs.gather(1, index); // [batch, slots, hidden]
    memory + aligned * in_range
}

/// The knowledge module actually wired into the model: exactly one of the
/// two variants is present, selected by `RunSettings::ablation_d`.
#[derive(Module, Debug)]
pub struct Knowledge<B: Backend> {
    graph: Option<knowledge_graph::KnowledgeGraph<B>>,
    plain: Option<external_knowledge::ExternalKnowledge<B>>,
}

impl<B: Backend> Knowledge<B> {
    pub fn graph(module: knowledge_graph::KnowledgeGraph<B>) -> Self {
        Self {
            graph: Some(module),
            plain: None,
        }
    }

    pub fn plain(module: external_knowledge::ExternalKnowledge<B>) -> Self {
        Self {
            graph: None,
            plain: Some(module),
        }
    }

    /// Load a batch into memory and compute the global pointer. The plain
    /// variant ignores the adjacency and dependency inputs.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        &self,
        story: Tensor<B, 3, Int>,
        kb_lengths: &[usize],
        conv_lengths: &[usize],
        hidden: Tensor<B, 2>,
        dh_outputs: Tensor<B, 3>,
        adjacency: Tensor<B, 3>,
        graph_inputs: &crate::data::memory::GraphRecurrenceInputs<B>,
    ) -> MemoryReadout<B> {
        if let Some(graph) = &self.graph {
            graph.load_graph(
                story,
                kb_lengths,
                conv_lengths,
                hidden,
                dh_outputs,
                adjacency,
                graph_inputs,
            )
        } else if let Some(plain) = &self.plain {
            plain.load_memory(story, kb_lengths, conv_lengths, hidden, dh_outputs)
        } else {
            unreachable!("knowledge module constructed without a variant")
        }
    }

    /// One local-pointer query against the cached memory.
    pub fn query(
        &self,
        state: &MemoryState<B>,
        query: Tensor<B, 2>,
        global_pointer: &Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        if let Some(graph) = &self.graph {
            graph.query(state, query, global_pointer)
        } else if let Some(plain) = &self.plain {
            plain.query(state, query, global_pointer)
        } else {
            unreachable!("knowledge module constructed without a variant")
        }
    }
}

/// Fail fast when a sample's content cannot fit its memory width.
pub(crate) fn assert_memory_layout(kb_lengths: &[usize], conv_lengths: &[usize], width: usize) {
    for (b, (&kb, &conv)) in kb_lengths.iter().zip(conv_lengths).enumerate() {
        assert!(
            kb + conv + 1 <= width,
            "sample {}: kb_len {} + conv_len {} + sentinel exceed memory width {}",
            b,
            kb,
            conv,
            width
        );
    }
}
