//! Dataset evaluation: greedy decoding + metric aggregation.
//!
//! Decodes every instance without teacher forcing, trims at EOS, and
//! aggregates per-response accuracy, corpus BLEU, entity F1 (overall and
//! per task domain) for assistant-style data, and dialogue accuracy for
//! babi-style data.

use std::collections::HashMap;

use burn::prelude::*;
use serde::Serialize;

use crate::config::{Dataset, EarlyStop, GlmpConfig, RunSettings};
use crate::data::memory::{Batch, Instance};
use crate::data::vocab::Lang;
use crate::metrics::{compute_prf, corpus_bleu};
use crate::model::glmp::Glmp;
use crate::rng::XorShift64;

/// Aggregated evaluation metrics.
#[derive(Debug, Clone, Serialize)]
pub struct EvalResult {
    /// Exact-match response accuracy.
    pub acc: f32,
    /// Corpus BLEU (percent).
    pub bleu: f32,
    /// Micro-averaged entity F1 over responses with gold entities.
    pub f1: f32,
    pub f1_nav: f32,
    pub f1_cal: f32,
    pub f1_wet: f32,
    /// Fraction of dialogues with every response correct (babi only).
    pub dialogue_acc: Option<f32>,
    pub responses: usize,
}

impl EvalResult {
    /// The value the early-stopping rule compares.
    pub fn early_stop_value(&self, metric: EarlyStop) -> f32 {
        match metric {
            EarlyStop::Bleu => self.bleu,
            EarlyStop::EntF1 => self.f1,
            EarlyStop::Acc => self.acc,
        }
    }
}

/// F1 accumulator: sum of per-response F1 and the number of counted
/// responses; an empty bucket reports zero.
#[derive(Default, Clone, Copy)]
struct F1Bucket {
    sum: f32,
    count: usize,
}

impl F1Bucket {
    fn add(&mut self, f1: f32, count: usize) {
        self.sum += f1;
        self.count += count;
    }

    fn value(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f32
        }
    }
}

/// Evaluate the model on a set of instances.
#[allow(clippy::too_many_arguments)]
pub fn evaluate<B: Backend>(
    model: &Glmp<B>,
    data: &[Instance],
    lang: &Lang,
    config: &GlmpConfig,
    settings: &RunSettings,
    global_entities: &[String],
    max_resp_len: usize,
    device: &B::Device,
) -> EvalResult {
    let mut refs: Vec<String> = Vec::new();
    let mut hyps: Vec<String> = Vec::new();
    let mut correct = 0usize;
    let mut total = 0usize;
    let mut f1_all = F1Bucket::default();
    let mut f1_nav = F1Bucket::default();
    let mut f1_cal = F1Bucket::default();
    let mut f1_wet = F1Bucket::default();
    let mut dialogues: HashMap<usize, bool> = HashMap::new();

    // Evaluation never masks memory tokens; the RNG is only a Batch argument.
    let mut rng = XorShift64::new(1);

    for chunk in data.chunks(settings.batch.max(1)) {
        let batch = Batch::<B>::new(chunk, settings, config.recurrent_size, false, &mut rng, device);
        let out = model.encode_and_decode(&batch, max_resp_len, false, true, lang);

        for (b, meta) in batch.meta.iter().enumerate() {
            let pred_sent = join_until_eos(&out.decoded_fine[b]);
            let pred_words: Vec<String> =
                pred_sent.split_whitespace().map(str::to_string).collect();
            let gold_sent = meta.response_plain.trim().to_string();

            let exact = pred_sent == gold_sent;
            total += 1;
            if exact {
                correct += 1;
            }
            refs.push(gold_sent.clone());
            hyps.push(pred_sent.clone());

            match settings.dataset {
                Dataset::Kvr => {
                    let (f1, count) = compute_prf(
                        &meta.gold_entities,
                        &pred_words,
                        global_entities,
                        &meta.kb_plain,
                    );
                    f1_all.add(f1, count);
                    match meta.task_type.as_str() {
                        "navigate" => f1_nav.add(f1, count),
                        "schedule" => f1_cal.add(f1, count),
                        "weather" => f1_wet.add(f1, count),
                        _ => {}
                    }
                }
                Dataset::Babi => {
                    dialogues
                        .entry(meta.dialogue_id)
                        .and_modify(|ok| *ok &= exact)
                        .or_insert(exact);
                }
            }

            if settings.gen_sample {
                let sketch_sent = join_until_eos(&out.decoded_coarse[b]);
                eprintln!("{} dialogue {}", meta.task_type, meta.dialogue_id);
                eprintln!("  sketch: {}", sketch_sent);
                eprintln!("  pred  : {}", pred_sent);
                eprintln!("  gold  : {}", gold_sent);
            }
        }
    }

    let dialogue_acc = match settings.dataset {
        Dataset::Babi if !dialogues.is_empty() => {
            let ok = dialogues.values().filter(|&&v| v).count();
            Some(ok as f32 / dialogues.len() as f32)
        }
        Dataset::Babi => Some(0.0),
        Dataset::Kvr => None,
    };

    EvalResult {
        acc: if total == 0 {
            0.0
        } else {
            correct as f32 / total as f32
        },
        bleu: corpus_bleu(&hyps, &refs, true),
        f1: f1_all.value(),
        f1_nav: f1_nav.value(),
        f1_cal: f1_cal.value(),
        f1_wet: f1_wet.value(),
        dialogue_acc,
        responses: total,
    }
}

/// Join decoded words up to (excluding) the first EOS.
fn join_until_eos(words: &[String]) -> String {
    let mut out: Vec<&str> = Vec::new();
    for word in words {
        if word == "EOS" {
            break;
        }
        out.push(word);
    }
    out.join(" ").trim().to_string()
}

// ─── Tests ────────────────────────────────────────────────────────
