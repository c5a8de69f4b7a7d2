//! Sketch-then-fill response decoder.
//!
//! A GRU decodes the sketch response token by token: each step emits
//! vocabulary logits (dot product with the decoder embedding matrix) and
//! queries the knowledge memory for a local-pointer distribution. When
//! surface words are requested, sketch slot tags (`@…`) are filled with the
//! highest-probability unused memory word inside the true context length.

use std::collections::HashSet;

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

use super::encoder::GruCell;
use super::{Knowledge, MemoryState};
use crate::data::vocab::{Lang, SOS_TOKEN};

/// Decoder configuration.
#[derive(Config, Debug)]
pub struct LocalMemoryDecoderConfig {
    pub vocab: usize,
    pub hidden: usize,
    #[config(default = 0.2)]
    pub dropout: f64,
}

/// Sketch decoder with memory-pointer copying.
#[derive(Module, Debug)]
pub struct LocalMemoryDecoder<B: Backend> {
    embedding: Embedding<B>,
    dropout: Dropout,
    gru: GruCell<B>,
    /// Projects the concatenated encoder summary + memory readout down to
    /// the decoder state size.
    projector: Linear<B>,
}

impl LocalMemoryDecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LocalMemoryDecoder<B> {
        LocalMemoryDecoder {
            embedding: EmbeddingConfig::new(self.vocab, self.hidden)
                .with_initializer(Initializer::Normal {
                    mean: 0.0,
                    std: 0.1,
                })
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            gru: GruCell::new(self.hidden, self.hidden, device),
            projector: LinearConfig::new(2 * self.hidden, self.hidden).init(device),
        }
    }
}

/// Everything one decoding pass produces.
pub struct DecodeOutput<B: Backend> {
    /// Vocabulary logits per step: `[steps, batch, vocab]`.
    pub vocab_logits: Tensor<B, 3>,
    /// Local-pointer logits per step: `[steps, batch, slots]`.
    pub ptr_logits: Tensor<B, 3>,
    /// Surface words with slot tags filled from memory, per sample.
    pub decoded_fine: Vec<Vec<String>>,
    /// Raw sketch words, per sample.
    pub decoded_coarse: Vec<Vec<String>>,
}

impl<B: Backend> LocalMemoryDecoder<B> {
    /// Decode `max_target_length` steps.
    ///
    /// - `encoded_hidden`: `[batch, 2*hidden]` — encoder summary ++ memory
    ///   readout
    /// - `sketch_target`: gold sketch ids `[batch, T]`, consumed when
    ///   `use_teacher_forcing` is set
    /// - `content_lengths`: copyable window (`kb_len + conv_len`) per sample
    /// - `copy_list`: memory head words per sample, indexed by slot
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        knowledge: &Knowledge<B>,
        state: &MemoryState<B>,
        global_pointer: &Tensor<B, 2>,
        encoded_hidden: Tensor<B, 2>,
        sketch_target: Option<&Tensor<B, 2, Int>>,
        content_lengths: &[usize],
        copy_list: &[Vec<String>],
        max_target_length: usize,
        use_teacher_forcing: bool,
        get_decoded_words: bool,
        lang: &Lang,
    ) -> DecodeOutput<B> {
        let batch = content_lengths.len();
        let device = encoded_hidden.device();
        let embed_matrix = self.embedding.weight.val(); // [vocab, hidden]

        if use_teacher_forcing {
            assert!(
                sketch_target.is_some(),
                "teacher forcing requires the gold sketch sequence"
            );
        }

        let mut hidden = relu(self.projector.forward(encoded_hidden));
        let mut input = Tensor::<B, 2, Int>::from_data(
            TensorData::new(vec![SOS_TOKEN as i32; batch], [batch, 1]),
            &device,
        );

        let mut vocab_steps: Vec<Tensor<B, 3>> = Vec::with_capacity(max_target_length);
        let mut ptr_steps: Vec<Tensor<B, 3>> = Vec::with_capacity(max_target_length);
        let mut decoded_fine: Vec<Vec<String>> = vec![Vec::new(); batch];
        let mut decoded_coarse: Vec<Vec<String>> = vec![Vec::new(); batch];
        let mut copied: Vec<HashSet<usize>> = vec![HashSet::new(); batch];

        for t in 0..max_target_length {
            let embedded = self
                .dropout
                .forward(self.embedding.forward(input.clone()))
                .squeeze_dim::<2>(1); // [batch, hidden]
            hidden = self.gru.step(embedded, hidden);

            let vocab_logits = hidden.clone().matmul(embed_matrix.clone().transpose());
            let (ptr_prob, ptr_logits) = knowledge.query(state, hidden.clone(), global_pointer);

            vocab_steps.push(vocab_logits.clone().unsqueeze_dim::<3>(0));
            ptr_steps.push(ptr_logits.unsqueeze_dim::<3>(0));

            let top_vocab = vocab_logits.argmax(1); // [batch, 1]

            if get_decoded_words {
                let words: Vec<usize> = top_vocab
                    .clone()
                    .float()
                    .into_data()
                    .to_vec::<f32>()
                    .unwrap()
                    .iter()
                    .map(|&v| v as usize)
                    .collect();
                let probs = ptr_prob.into_data().to_vec::<f32>().unwrap();
                let slots = probs.len() / batch;

                for b in 0..batch {
                    let word = lang.decode(words[b]).to_string();
                    decoded_coarse[b].push(word.clone());
                    if let Some(tag) = word.strip_prefix('@') {
                        let row = &probs[b * slots..(b + 1) * slots];
                        let mut order: Vec<usize> = (0..slots).collect();
                        order.sort_by(|&i, &j| {
                            row[j].partial_cmp(&row[i]).unwrap_or(std::cmp::Ordering::Equal)
                        });
                        let pick = order.iter().copied().find(|&i| {
                            i < content_lengths[b] && !copied[b].contains(&i)
                        });
                        match pick {
                            Some(slot) => {
                                copied[b].insert(slot);
                                decoded_fine[b].push(copy_list[b][slot].clone());
                            }
                            // Every copyable slot used up: fall back to the tag.
                            None => decoded_fine[b].push(format!("@{}", tag)),
                        }
                    } else {
                        decoded_fine[b].push(word);
                    }
                }
            }

            input = if use_teacher_forcing {
                let target = sketch_target.expect("teacher forcing requires the gold sketch");
                target.clone().slice([0..batch, t..t + 1])
            } else {
                top_vocab
            };
        }

        DecodeOutput {
            vocab_logits: Tensor::cat(vocab_steps, 0),
            ptr_logits: Tensor::cat(ptr_steps, 0),
            decoded_fine,
            decoded_coarse,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunSettings;
    use crate::model::external_knowledge::ExternalKnowledgeConfig;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn decode_output_shapes() {
        let device = Default::default();
        let vocab = 24;
        let settings = RunSettings::default();
        let memory = ExternalKnowledgeConfig::new(vocab, 8)
            .with_hops(2)
            .init::<B>(&settings, &device);
        let decoder = LocalMemoryDecoderConfig::new(vocab, 8).init::<B>(&device);
        let knowledge = Knowledge::plain(memory);

        let story = Tensor::<B, 3, Int>::from_data(
            TensorData::new((0..(2 * 5 * 4)).map(|i| 5 + (i % 15) as i32).collect::<Vec<_>>(), [2, 5, 4]),
            &device,
        );
        let hidden = Tensor::<B, 2>::ones([2, 8], &device);
        let dh = Tensor::<B, 3>::zeros([2, 2, 8], &device);
        let readout = knowledge.load(
            story,
            &[2, 2],
            &[2, 1],
            hidden,
            dh,
            Tensor::zeros([2, 5, 5], &device),
            &crate::data::memory::GraphRecurrenceInputs {
                deps_fwd: Tensor::zeros([2, 5, 4], &device),
                types_fwd: Tensor::zeros([2, 5, 4], &device),
                mask_fwd: Tensor::zeros([2, 5, 4], &device),
                deps_bwd: Tensor::zeros([2, 5, 4], &device),
                types_bwd: Tensor::zeros([2, 5, 4], &device),
                mask_bwd: Tensor::zeros([2, 5, 4], &device),
            },
        );

        let lang = Lang::new();
        let copy_list = vec![vec!["a".into(); 5], vec!["b".into(); 5]];
        let encoded = Tensor::<B, 2>::ones([2, 16], &device);

        let out = decoder.forward(
            &knowledge,
            &readout.state,
            &readout.global_pointer,
            encoded,
            None,
            &[4, 3],
            &copy_list,
            6,
            false,
            true,
            &lang,
        );

        assert_eq!(out.vocab_logits.dims(), [6, 2, 24]);
        assert_eq!(out.ptr_logits.dims(), [6, 2, 5]);
        assert_eq!(out.decoded_fine.len(), 2);
        assert_eq!(out.decoded_fine[0].len(), 6);
        assert_eq!(out.decoded_coarse[0].len(), 6);
    }

    #[test]
    #[should_panic(expected = "teacher forcing")]
    fn teacher_forcing_without_targets_is_rejected() {
        let device = Default::default();
        let vocab = 10;
        let settings = RunSettings::default();
        let memory = ExternalKnowledgeConfig::new(vocab, 4)
            .with_hops(1)
            .init::<B>(&settings, &device);
        let decoder = LocalMemoryDecoderConfig::new(vocab, 4).init::<B>(&device);
        let knowledge = Knowledge::plain(memory);

        let story = Tensor::<B, 3, Int>::zeros([1, 3, 4], &device);
        let readout = knowledge.load(
            story,
            &[1],
            &[1],
            Tensor::ones([1, 4], &device),
            Tensor::zeros([1, 1, 4], &device),
            Tensor::zeros([1, 3, 3], &device),
            &crate::data::memory::GraphRecurrenceInputs {
                deps_fwd: Tensor::zeros([1, 3, 4], &device),
                types_fwd: Tensor::zeros([1, 3, 4], &device),
                mask_fwd: Tensor::zeros([1, 3, 4], &device),
                deps_bwd: Tensor::zeros([1, 3, 4], &device),
                types_bwd: Tensor::zeros([1, 3, 4], &device),
                mask_bwd: Tensor::zeros([1, 3, 4], &device),
            },
        );

        let lang = Lang::new();
        let _ = decoder.forward(
            &knowledge,
            &readout.state,
            &readout.global_pointer,
            Tensor::ones([1, 8], &device),
            None,
            &[2],
            &[vec!["x".into(); 3]],
            3,
            true,
            false,
            &lang,
        );
    }
}
