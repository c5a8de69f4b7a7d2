//! Joint KB + dialogue memory construction and batching.
//!
//! Every (dialogue, turn) pair becomes one training instance: the KB facts
//! and the conversation history up to the current user utterance are laid
//! out as fixed-width memory slots `[KB facts | conversation tokens |
//! sentinel]`, together with the gold targets the losses need — the sketch
//! response, the per-step local-pointer index, and the binary global-pointer
//! selector — and the KB-graph edges that drive graph attention and the
//! graph-recurrent refinement.

use burn::prelude::*;
use rayon::prelude::*;

use crate::config::RunSettings;
use crate::data::edge_pairs::pair_indices;
use crate::data::transcript::DialogueSample;
use crate::data::vocab::{Lang, EOS_TOKEN, MEM_TOKEN_SIZE, PAD_TOKEN, UNK_TOKEN};
use crate::rng::XorShift64;

// ─── Edge Types ───────────────────────────────────────────────────

/// Self-loop edge type id (reserved; added per slot, never stored in deps).
pub const EDGE_SELF: usize = 0;
/// Navigate-style entity link between a property list and a triple.
pub const EDGE_ENTITY_LINK: usize = 1;
/// Shared-head link between two facts about the same subject.
pub const EDGE_SHARED_HEAD: usize = 2;
/// Sequential link between adjacent conversation tokens.
pub const EDGE_TURN_FLOW: usize = 3;

pub const NUM_EDGE_TYPES: usize = 4;

// ─── Instances ────────────────────────────────────────────────────

/// One decodable training/evaluation instance.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Memory slots: `kb_len` KB facts, `conv_len` conversation tokens,
    /// one trailing sentinel. Each slot is `MEM_TOKEN_SIZE` token ids.
    pub context: Vec<Vec<usize>>,
    /// The same slots as words (used for copying and metrics).
    pub context_plain: Vec<Vec<String>>,
    pub kb_len: usize,
    pub conv_len: usize,
    /// Sketch response ids, EOS-terminated.
    pub sketch: Vec<usize>,
    /// Gold memory address per response token (sentinel when not copied).
    pub ptr_index: Vec<usize>,
    /// Gold global-pointer mask, one value per memory slot.
    pub selector: Vec<f32>,
    pub response_plain: String,
    pub gold_entities: Vec<String>,
    /// KB-graph edges `(src_slot, dst_slot, edge_type)`.
    pub edges: Vec<(usize, usize, usize)>,
    pub task_type: String,
    pub dialogue_id: usize,
    pub turn: usize,
}

impl Instance {
    /// Index of the sentinel slot.
    pub fn sentinel(&self) -> usize {
        self.kb_len + self.conv_len
    }

    /// Words the decoder may copy (one head word per slot).
    pub fn copy_words(&self) -> Vec<String> {
        self.context_plain.iter().map(|slot| slot[0].clone()).collect()
    }
}

/// Memory-format token vector for a KB fact: tokens reversed (entity first),
/// truncated/padded to `MEM_TOKEN_SIZE`.
fn fact_slot(tokens: &[String]) -> Vec<String> {
    let mut slot: Vec<String> = tokens.iter().rev().cloned().collect();
    slot.truncate(MEM_TOKEN_SIZE);
    while slot.len() < MEM_TOKEN_SIZE {
        slot.push("PAD".to_string());
    }
    slot
}

/// Memory-format token vector for one conversation word.
fn word_slot(word: &str, speaker: &str, turn: usize, position: usize) -> Vec<String> {
    vec![
        word.to_string(),
        speaker.to_string(),
        format!("turn{}", turn),
        format!("word{}", position),
    ]
}

/// Sketch form of a response: entity words are replaced by `@<slot>` tags
/// derived from the local KB (the relation of a matching triple, `@poi` for
/// a matching fact head, `@entity` otherwise).
pub fn sketch_words(response: &str, gold_entities: &[String], kb: &[Vec<String>]) -> Vec<String> {
    response
        .split_whitespace()
        .map(|word| {
            if !gold_entities.iter().any(|e| e == word) {
                return word.to_string();
            }
            for fact in kb {
                if fact.len() == 3 && fact[2] == word {
                    return format!("@{}", fact[1]);
                }
            }
            if kb.iter().any(|fact| fact.first().map(String::as_str) == Some(word)) {
                return "@poi".to_string();
            }
            "@entity".to_string()
        })
        .collect()
}

/// Intern every surface word a set of samples can produce, including the
/// derived sketch tags and conversation tag tokens.
pub fn index_vocabulary(lang: &mut Lang, samples: &[DialogueSample]) {
    for sample in samples {
        for fact in &sample.kb {
            for slot_word in fact_slot(&fact.tokens) {
                lang.index_word(&slot_word);
            }
        }
        let kb: Vec<Vec<String>> = sample.kb.iter().map(|f| f.tokens.clone()).collect();
        for (t, turn) in sample.turns.iter().enumerate() {
            for (i, word) in turn.user.split_whitespace().enumerate() {
                for slot_word in word_slot(word, "$u", t, i) {
                    lang.index_word(&slot_word);
                }
            }
            for (i, word) in turn.system.split_whitespace().enumerate() {
                for slot_word in word_slot(word, "$s", t, i) {
                    lang.index_word(&slot_word);
                }
            }
            for word in sketch_words(&turn.system, &turn.gold_entities, &kb) {
                lang.index_word(&word);
            }
        }
    }
}

/// Expand samples into per-turn instances. Parallel over dialogues.
pub fn build_instances(samples: &[DialogueSample], lang: &Lang) -> Vec<Instance> {
    samples
        .par_iter()
        .flat_map_iter(|sample| sample_instances(sample, lang))
        .collect()
}

fn sample_instances(sample: &DialogueSample, lang: &Lang) -> Vec<Instance> {
    let kb_tokens: Vec<Vec<String>> = sample.kb.iter().map(|f| f.tokens.clone()).collect();
    let kb_slots: Vec<Vec<String>> = kb_tokens.iter().map(|t| fact_slot(t)).collect();
    let kb_pairs = pair_indices(&sample.task_type, &kb_tokens);
    let pair_kind = if sample.task_type == "navigate" {
        EDGE_ENTITY_LINK
    } else {
        EDGE_SHARED_HEAD
    };

    let mut instances = Vec::with_capacity(sample.turns.len());
    let mut history: Vec<Vec<String>> = Vec::new();

    for (t, turn) in sample.turns.iter().enumerate() {
        for (i, word) in turn.user.split_whitespace().enumerate() {
            history.push(word_slot(word, "$u", t, i));
        }

        let conv_len = history.len();
        let kb_len = kb_slots.len();
        let mut context_plain = kb_slots.clone();
        context_plain.extend(history.iter().cloned());
        context_plain.push(vec![
            "$$$$".to_string(),
            "PAD".to_string(),
            "PAD".to_string(),
            "PAD".to_string(),
        ]);
        let context: Vec<Vec<usize>> = context_plain
            .iter()
            .map(|slot| slot.iter().map(|w| lang.encode(w)).collect())
            .collect();

        let sentinel = kb_len + conv_len;
        let response_words: Vec<&str> = turn.system.split_whitespace().collect();

        let mut sketch: Vec<usize> = sketch_words(&turn.system, &turn.gold_entities, &kb_tokens)
            .iter()
            .map(|w| lang.encode(w))
            .collect();
        sketch.push(EOS_TOKEN);

        let mut ptr_index: Vec<usize> = response_words
            .iter()
            .map(|word| {
                let is_entity = turn.gold_entities.iter().any(|e| e == word);
                if !is_entity {
                    return sentinel;
                }
                context_plain[..sentinel]
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot[0] == *word)
                    .map(|(m, _)| m)
                    .max()
                    .unwrap_or(sentinel)
            })
            .collect();
        ptr_index.push(sentinel);

        let mut selector: Vec<f32> = context_plain[..sentinel]
            .iter()
            .map(|slot| {
                let word = slot[0].as_str();
                let hit = turn.gold_entities.iter().any(|e| e == word)
                    || response_words.contains(&word);
                if hit {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        selector.push(1.0); // sentinel is always a valid "no copy" target

        let mut edges: Vec<(usize, usize, usize)> =
            kb_pairs.iter().map(|&(i, j)| (i, j, pair_kind)).collect();
        for i in 0..conv_len.saturating_sub(1) {
            edges.push((kb_len + i, kb_len + i + 1, EDGE_TURN_FLOW));
            edges.push((kb_len + i + 1, kb_len + i, EDGE_TURN_FLOW));
        }

        instances.push(Instance {
            context,
            context_plain,
            kb_len,
            conv_len,
            sketch,
            ptr_index,
            selector,
            response_plain: turn.system.clone(),
            gold_entities: turn.gold_entities.clone(),
            edges,
            task_type: sample.task_type.clone(),
            dialogue_id: sample.id,
            turn: t,
        });

        for (i, word) in turn.system.split_whitespace().enumerate() {
            history.push(word_slot(word, "$s", t, i));
        }
    }
    instances
}

// ─── Batches ──────────────────────────────────────────────────────

/// Per-slot dependency tensors for the graph-recurrent refinement, one set
/// per propagation direction.
#[derive(Debug, Clone)]
pub struct GraphRecurrenceInputs<B: Backend> {
    /// Predecessor slot index per (slot, dependency slot): `[B, S, R]`.
    pub deps_fwd: Tensor<B, 3, Int>,
    pub types_fwd: Tensor<B, 3, Int>,
    /// 1.0 where the dependency slot is active: `[B, S, R]`.
    pub mask_fwd: Tensor<B, 3>,
    pub deps_bwd: Tensor<B, 3, Int>,
    pub types_bwd: Tensor<B, 3, Int>,
    pub mask_bwd: Tensor<B, 3>,
}

/// Evaluation-time metadata carried alongside the batch tensors.
#[derive(Debug, Clone)]
pub struct BatchMeta {
    pub response_plain: String,
    pub gold_entities: Vec<String>,
    /// Memory-format KB fact words (head word first).
    pub kb_plain: Vec<Vec<String>>,
    pub task_type: String,
    pub dialogue_id: usize,
}

/// One tensorized batch.
pub struct Batch<B: Backend> {
    /// Memory token ids: `[B, S, MEM_TOKEN_SIZE]`.
    pub context: Tensor<B, 3, Int>,
    /// Conversation token ids: `[B, C, MEM_TOKEN_SIZE]`.
    pub conv: Tensor<B, 3, Int>,
    pub kb_lengths: Vec<usize>,
    pub conv_lengths: Vec<usize>,
    /// Content length incl. sentinel, per sample.
    pub context_lengths: Vec<usize>,
    /// Gold sketch ids: `[B, T]`.
    pub sketch: Tensor<B, 2, Int>,
    /// Gold local-pointer index: `[B, T]`.
    pub ptr_index: Tensor<B, 2, Int>,
    /// Gold global-pointer mask: `[B, S]`.
    pub selector: Tensor<B, 2>,
    pub response_lengths: Vec<usize>,
    /// KB-graph adjacency: `[B, S, S]`, self-loops on content slots.
    pub adjacency: Tensor<B, 3>,
    pub graph: GraphRecurrenceInputs<B>,
    /// Copyable head word per slot, per sample.
    pub copy_list: Vec<Vec<String>>,
    pub meta: Vec<BatchMeta>,
}

impl<B: Backend> Batch<B> {
    /// Tensorize a group of instances, padding to the widest sample.
    ///
    /// In training mode with `unk_mask` set, the head token of every memory
    /// slot is independently dropped to UNK with probability
    /// `settings.dropout` (resampled per batch); the conversation copy of a
    /// masked token is masked identically.
    pub fn new(
        instances: &[Instance],
        settings: &RunSettings,
        recurrent_size: usize,
        training: bool,
        rng: &mut XorShift64,
        device: &B::Device,
    ) -> Self {
        assert!(!instances.is_empty(), "cannot batch zero instances");
        let bsz = instances.len();
        let width = instances
            .iter()
            .map(|ins| ins.context.len())
            .max()
            .unwrap_or(1);
        let conv_width = instances.iter().map(|ins| ins.conv_len).max().unwrap_or(1).max(1);
        let resp_width = instances.iter().map(|ins| ins.sketch.len()).max().unwrap_or(1);

        // Memory ids, with the dropout-style UNK masking applied up front so
        // that the conversation view stays consistent with the memory view.
        let mut context_ids: Vec<Vec<Vec<usize>>> = instances
            .iter()
            .map(|ins| ins.context.clone())
            .collect();
        if training && settings.unk_mask {
            for ids in context_ids.iter_mut() {
                for slot in ids.iter_mut() {
                    if rng.next_f64() < settings.dropout {
                        slot[0] = UNK_TOKEN;
                    }
                }
            }
        }

        let mut context_flat = vec![PAD_TOKEN as i32; bsz * width * MEM_TOKEN_SIZE];
        for (b, ids) in context_ids.iter().enumerate() {
            for (s, slot) in ids.iter().enumerate() {
                for (k, &id) in slot.iter().enumerate() {
                    context_flat[(b * width + s) * MEM_TOKEN_SIZE + k] = id as i32;
                }
            }
        }

        let mut conv_flat = vec![PAD_TOKEN as i32; bsz * conv_width * MEM_TOKEN_SIZE];
        for (b, (ids, ins)) in context_ids.iter().zip(instances).enumerate() {
            for c in 0..ins.conv_len {
                let slot = &ids[ins.kb_len + c];
                for (k, &id) in slot.iter().enumerate() {
                    conv_flat[(b * conv_width + c) * MEM_TOKEN_SIZE + k] = id as i32;
                }
            }
        }

        let mut sketch_flat = vec![PAD_TOKEN as i32; bsz * resp_width];
        let mut ptr_flat = vec![0i32; bsz * resp_width];
        let mut selector_flat = vec![0.0f32; bsz * width];
        for (b, ins) in instances.iter().enumerate() {
            for (t, &id) in ins.sketch.iter().enumerate() {
                sketch_flat[b * resp_width + t] = id as i32;
            }
            for t in 0..resp_width {
                // Padding steps point at the sentinel; the loss masks them out.
                let idx = ins.ptr_index.get(t).copied().unwrap_or(ins.sentinel());
                ptr_flat[b * resp_width + t] = idx as i32;
            }
            for (s, &v) in ins.selector.iter().enumerate() {
                selector_flat[b * width + s] = v;
            }
        }

        let mut adjacency_flat = vec![0.0f32; bsz * width * width];
        for (b, ins) in instances.iter().enumerate() {
            let content = ins.kb_len + ins.conv_len;
            for s in 0..content {
                adjacency_flat[(b * width + s) * width + s] = 1.0;
            }
            for &(src, dst, _) in &ins.edges {
                adjacency_flat[(b * width + src) * width + dst] = 1.0;
            }
        }

        let graph = build_recurrence_inputs(instances, width, recurrent_size, device);

        Self {
            context: Tensor::from_data(
                TensorData::new(context_flat, [bsz, width, MEM_TOKEN_SIZE]),
                device,
            ),
            conv: Tensor::from_data(
                TensorData::new(conv_flat, [bsz, conv_width, MEM_TOKEN_SIZE]),
                device,
            ),
            kb_lengths: instances.iter().map(|i| i.kb_len).collect(),
            conv_lengths: instances.iter().map(|i| i.conv_len).collect(),
            context_lengths: instances.iter().map(|i| i.context.len()).collect(),
            sketch: Tensor::from_data(TensorData::new(sketch_flat, [bsz, resp_width]), device),
            ptr_index: Tensor::from_data(TensorData::new(ptr_flat, [bsz, resp_width]), device),
            selector: Tensor::from_data(TensorData::new(selector_flat, [bsz, width]), device),
            response_lengths: instances.iter().map(|i| i.sketch.len()).collect(),
            adjacency: Tensor::from_data(
                TensorData::new(adjacency_flat, [bsz, width, width]),
                device,
            ),
            graph,
            copy_list: instances.iter().map(|i| i.copy_words()).collect(),
            meta: instances
                .iter()
                .map(|i| BatchMeta {
                    response_plain: i.response_plain.clone(),
                    gold_entities: i.gold_entities.clone(),
                    kb_plain: i.context_plain[..i.kb_len].to_vec(),
                    task_type: i.task_type.clone(),
                    dialogue_id: i.dialogue_id,
                })
                .collect(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.kb_lengths.len()
    }

    /// Widest target length in the batch.
    pub fn max_response_len(&self) -> usize {
        self.response_lengths.iter().copied().max().unwrap_or(1)
    }
}

/// Per-slot incoming-edge dependency tensors, split by direction: the
/// forward pass may only depend on lower slot indices, the backward pass on
/// higher ones. At most `recurrent_size` dependencies per slot; the rest
/// are masked inactive.
fn build_recurrence_inputs<B: Backend>(
    instances: &[Instance],
    width: usize,
    recurrent_size: usize,
    device: &B::Device,
) -> GraphRecurrenceInputs<B> {
    let bsz = instances.len();
    let volume = bsz * width * recurrent_size;
    let mut deps_fwd = vec![0i32; volume];
    let mut types_fwd = vec![EDGE_SELF as i32; volume];
    let mut mask_fwd = vec![0.0f32; volume];
    let mut deps_bwd = vec![0i32; volume];
    let mut types_bwd = vec![EDGE_SELF as i32; volume];
    let mut mask_bwd = vec![0.0f32; volume];

    for (b, ins) in instances.iter().enumerate() {
        let mut fwd: Vec<Vec<(usize, usize)>> = vec![Vec::new(); width];
        let mut bwd: Vec<Vec<(usize, usize)>> = vec![Vec::new(); width];
        for &(src, dst, ty) in &ins.edges {
            if src < dst {
                fwd[dst].push((src, ty));
            } else if src > dst {
                bwd[dst].push((src, ty));
            }
        }
        for s in 0..width {
            for (k, &(src, ty)) in fwd[s].iter().take(recurrent_size).enumerate() {
                let at = (b * width + s) * recurrent_size + k;
                deps_fwd[at] = src as i32;
                types_fwd[at] = ty as i32;
                mask_fwd[at] = 1.0;
            }
            for (k, &(src, ty)) in bwd[s].iter().take(recurrent_size).enumerate() {
                let at = (b * width + s) * recurrent_size + k;
                deps_bwd[at] = src as i32;
                types_bwd[at] = ty as i32;
                mask_bwd[at] = 1.0;
            }
        }
    }

    let shape = [bsz, width, recurrent_size];
    GraphRecurrenceInputs {
        deps_fwd: Tensor::from_data(TensorData::new(deps_fwd, shape), device),
        types_fwd: Tensor::from_data(TensorData::new(types_fwd, shape), device),
        mask_fwd: Tensor::from_data(TensorData::new(mask_fwd, shape), device),
        deps_bwd: Tensor::from_data(TensorData::new(deps_bwd, shape), device),
        types_bwd: Tensor::from_data(TensorData::new(types_bwd, shape), device),
        mask_bwd: Tensor::from_data(TensorData::new(mask_bwd, shape), device),
    }
}
