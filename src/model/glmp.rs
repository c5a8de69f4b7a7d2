//! Composite GLMP model: encoder + knowledge memory + decoder.
//!
//! Wraps the three stages into a single `Module` that can be saved and
//! loaded as a unit, and exposes the joint forward pass the training step
//! and the evaluation loop both drive.

use burn::module::Module;
use burn::prelude::*;

use super::decoder::{DecodeOutput, LocalMemoryDecoder, LocalMemoryDecoderConfig};
use super::encoder::{ContextRnn, ContextRnnConfig};
use super::external_knowledge::ExternalKnowledgeConfig;
use super::knowledge_graph::KnowledgeGraphConfig;
use super::Knowledge;
use crate::config::{GlmpConfig, RunSettings};
use crate::data::memory::Batch;
use crate::data::vocab::Lang;

/// The full model.
#[derive(Module, Debug)]
pub struct Glmp<B: Backend> {
    pub encoder: ContextRnn<B>,
    pub knowledge: Knowledge<B>,
    pub decoder: LocalMemoryDecoder<B>,
}

impl GlmpConfig {
    /// Build the model for a vocabulary size and run settings. The knowledge
    /// memory is the graph-refined variant unless `ablation_d` selects the
    /// plain multi-hop one.
    pub fn init<B: Backend>(
        &self,
        vocab: usize,
        settings: &RunSettings,
        device: &B::Device,
    ) -> Glmp<B> {
        let knowledge = if settings.ablation_d {
            Knowledge::plain(
                ExternalKnowledgeConfig::new(vocab, self.hidden)
                    .with_hops(self.hops)
                    .with_dropout(settings.dropout)
                    .init(settings, device),
            )
        } else {
            Knowledge::graph(
                KnowledgeGraphConfig::new(vocab, self.hidden)
                    .with_nheads(self.nheads)
                    .with_edge_types(self.edge_types)
                    .with_recurrent_size(self.recurrent_size)
                    .with_leaky_alpha(self.leaky_alpha)
                    .with_dropout(settings.dropout)
                    .with_recurrent_refinement(self.recurrent_refinement)
                    .init(settings, device),
            )
        };
        Glmp {
            encoder: ContextRnnConfig::new(vocab, self.hidden)
                .with_dropout(settings.dropout)
                .init(device),
            knowledge,
            decoder: LocalMemoryDecoderConfig::new(vocab, self.hidden)
                .with_dropout(settings.dropout)
                .init(device),
        }
    }
}

/// Everything one joint forward pass produces.
pub struct ForwardOutput<B: Backend> {
    /// Vocabulary logits per decode step: `[steps, batch, vocab]`.
    pub vocab_logits: Tensor<B, 3>,
    /// Local-pointer logits per decode step: `[steps, batch, slots]`.
    pub ptr_logits: Tensor<B, 3>,
    pub decoded_fine: Vec<Vec<String>>,
    pub decoded_coarse: Vec<Vec<String>>,
    /// Per-slot relevance probabilities: `[batch, slots]`.
    pub global_pointer: Tensor<B, 2>,
    /// Pre-sigmoid global-pointer logits: `[batch, slots]`.
    pub global_logits: Tensor<B, 2>,
}

impl<B: Backend> Glmp<B> {
    /// Encode the batch, load the knowledge memory, and decode.
    pub fn encode_and_decode(
        &self,
        batch: &Batch<B>,
        max_target_length: usize,
        use_teacher_forcing: bool,
        get_decoded_words: bool,
        lang: &Lang,
    ) -> ForwardOutput<B> {
        let (dh_outputs, dh_hidden) = self.encoder.forward(batch.conv.clone(), &batch.conv_lengths);

        let readout = self.knowledge.load(
            batch.context.clone(),
            &batch.kb_lengths,
            &batch.conv_lengths,
            dh_hidden.clone(),
            dh_outputs,
            batch.adjacency.clone(),
            &batch.graph,
        );

        let encoded_hidden = Tensor::cat(vec![dh_hidden, readout.readout.clone()], 1);
        let content_lengths: Vec<usize> = batch
            .kb_lengths
            .iter()
            .zip(&batch.conv_lengths)
            .map(|(kb, conv)| kb + conv)
            .collect();

        let decoded: DecodeOutput<B> = self.decoder.forward(
            &self.knowledge,
            &readout.state,
            &readout.global_pointer,
            encoded_hidden,
            Some(&batch.sketch),
            &content_lengths,
            &batch.copy_list,
            max_target_length,
            use_teacher_forcing,
            get_decoded_words,
            lang,
        );

        ForwardOutput {
            vocab_logits: decoded.vocab_logits,
            ptr_logits: decoded.ptr_logits,
            decoded_fine: decoded.decoded_fine,
            decoded_coarse: decoded.decoded_coarse,
            global_pointer: readout.global_pointer,
            global_logits: readout.global_logits,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::{build_instances, index_vocabulary, Batch};
    use crate::data::transcript::parse_transcript;
    use crate::rng::XorShift64;
    use burn::backend::NdArray;

    type B = NdArray;

    // kb_len = 3, conv_len = 2, so content + sentinel = 6 of 10 slots once
    // the longer second sample pads the batch.
    const SAMPLE: &str = "\
#schedule
0 meeting time 10am
0 meeting date monday
0 dinner time 7pm
1 my meeting\tyour meeting is at 10am on monday\t[\"10am\", \"monday\"]

#schedule
0 meeting time 10am
0 meeting date monday
0 dinner time 7pm
1 when is my dinner being held\tdinner is at 7pm\t[\"7pm\"]
";

    fn forward(settings: RunSettings) -> (ForwardOutput<B>, usize, usize) {
        let device = Default::default();
        let samples = parse_transcript(SAMPLE).unwrap();
        let mut lang = Lang::new();
        index_vocabulary(&mut lang, &samples);
        let instances = build_instances(&samples, &lang);
        assert_eq!(instances[0].kb_len, 3);
        assert_eq!(instances[0].conv_len, 2);

        let config = GlmpConfig::new()
            .with_hidden(16)
            .with_hops(2)
            .with_nheads(2)
            .with_recurrent_size(2);
        let model = config.init::<B>(lang.n_words(), &settings, &device);

        let mut rng = XorShift64::new(11);
        let batch = Batch::<B>::new(&instances, &settings, 2, false, &mut rng, &device);
        let width = instances.iter().map(|i| i.context.len()).max().unwrap();
        let steps = batch.max_response_len();
        let out = model.encode_and_decode(&batch, steps, false, true, &lang);
        (out, width, steps)
    }

    #[test]
    fn joint_forward_pointer_shapes_and_normalization() {
        let (out, width, steps) = forward(RunSettings::default());
        assert_eq!(width, 10);

        let batch = 2;
        assert_eq!(out.global_pointer.dims(), [batch, width]);
        assert_eq!(out.global_logits.dims(), [batch, width]);
        assert_eq!(out.ptr_logits.dims(), [steps, batch, width]);

        let probs = out.global_pointer.into_data().to_vec::<f32>().unwrap();
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));

        // Softmax over the first step's pointer logits sums to 1 per row.
        let first = out.ptr_logits.slice([0..1]).squeeze_dim::<2>(0);
        let dist = burn::tensor::activation::softmax(first, 1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        for row in dist.chunks(width) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4, "row sums to {}", sum);
        }
    }

    #[test]
    fn plain_memory_variant_matches_the_contract() {
        let settings = RunSettings {
            ablation_d: true,
            ..RunSettings::default()
        };
        let (out, width, steps) = forward(settings);
        assert_eq!(out.global_pointer.dims(), [2, width]);
        assert_eq!(out.vocab_logits.dims()[0], steps);
        assert_eq!(out.decoded_fine.len(), 2);
    }

    #[test]
    fn ablations_disable_gating_and_injection() {
        let settings = RunSettings {
            ablation_g: true,
            ablation_h: true,
            ..RunSettings::default()
        };
        let (out, width, _) = forward(settings);
        assert_eq!(out.global_pointer.dims(), [2, width]);
    }
}
