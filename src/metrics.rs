//! Evaluation metrics: entity F1, corpus BLEU, accuracy helpers.

use std::collections::{HashMap, HashSet};

/// Micro precision/recall F1 for one response.
///
/// `gold` is the turn's gold entity set; `pred` the decoded response words.
/// A predicted word only counts as a false positive when it is a known
/// entity — present in `global_entity_list` or among the local KB head
/// words (`local_kb` rows are memory-format facts, head word first).
///
/// Returns `(f1, count)`; responses without gold entities return `(0, 0)`
/// and are excluded from the corpus average via the count.
pub fn compute_prf(
    gold: &[String],
    pred: &[String],
    global_entity_list: &[String],
    local_kb: &[Vec<String>],
) -> (f32, usize) {
    if gold.is_empty() {
        return (0.0, 0);
    }
    let local_kb_word: HashSet<&str> = local_kb
        .iter()
        .filter_map(|fact| fact.first())
        .map(String::as_str)
        .collect();

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;

    for g in gold {
        if pred.iter().any(|p| p == g) {
            tp += 1;
        } else {
            fn_ += 1;
        }
    }
    let unique: HashSet<&str> = pred.iter().map(String::as_str).collect();
    for p in unique {
        let known = global_entity_list.iter().any(|e| e == p) || local_kb_word.contains(p);
        if known && !gold.iter().any(|g| g == p) {
            fp += 1;
        }
    }

    let precision = if tp + fp != 0 {
        tp as f32 / (tp + fp) as f32
    } else {
        0.0
    };
    let recall = if tp + fn_ != 0 {
        tp as f32 / (tp + fn_) as f32
    } else {
        0.0
    };
    let f1 = if precision + recall != 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (f1, 1)
}

/// Corpus-level BLEU-4 with brevity penalty, in percent.
///
/// Multi-bleu style: modified n-gram precisions are pooled over the whole
/// corpus and any zero precision zeroes the score (no smoothing).
pub fn corpus_bleu(hypotheses: &[String], references: &[String], lowercase: bool) -> f32 {
    assert_eq!(
        hypotheses.len(),
        references.len(),
        "hypothesis/reference count mismatch"
    );
    if hypotheses.is_empty() {
        return 0.0;
    }

    let tokenize = |s: &String| -> Vec<String> {
        let s = if lowercase { s.to_lowercase() } else { s.clone() };
        s.split_whitespace().map(str::to_string).collect()
    };

    let mut matches = [0usize; 4];
    let mut totals = [0usize; 4];
    let mut hyp_len = 0usize;
    let mut ref_len = 0usize;

    for (hyp, reference) in hypotheses.iter().zip(references) {
        let hyp = tokenize(hyp);
        let reference = tokenize(reference);
        hyp_len += hyp.len();
        ref_len += reference.len();

        for n in 1..=4 {
            if hyp.len() < n {
                continue;
            }
            let mut ref_counts: HashMap<&[String], usize> = HashMap::new();
            if reference.len() >= n {
                for gram in reference.windows(n) {
                    *ref_counts.entry(gram).or_insert(0) += 1;
                }
            }
            let mut hyp_counts: HashMap<&[String], usize> = HashMap::new();
            for gram in hyp.windows(n) {
                *hyp_counts.entry(gram).or_insert(0) += 1;
            }
            for (gram, &count) in &hyp_counts {
                let clip = ref_counts.get(gram).copied().unwrap_or(0);
                matches[n - 1] += count.min(clip);
                totals[n - 1] += count;
            }
        }
    }

    let mut log_precision_sum = 0.0f64;
    for n in 0..4 {
        if totals[n] == 0 || matches[n] == 0 {
            return 0.0;
        }
        log_precision_sum += (matches[n] as f64 / totals[n] as f64).ln();
    }

    let brevity = if hyp_len >= ref_len || hyp_len == 0 {
        1.0
    } else {
        (1.0 - ref_len as f64 / hyp_len as f64).exp()
    };

    (brevity * (log_precision_sum / 4.0).exp() * 100.0) as f32
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn s(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn prf_without_gold_entities_counts_nothing() {
        let (f1, count) = compute_prf(&[], &s(&["anything", "at", "all"]), &[], &[]);
        assert_eq!(f1, 0.0);
        assert_eq!(count, 0);
    }

    #[test]
    fn prf_exact_match_is_one() {
        let (f1, count) = compute_prf(&s(&["x"]), &s(&["x"]), &[], &[]);
        assert_eq!(count, 1);
        assert!((f1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn prf_counts_false_positives_only_for_known_entities() {
        let gold = s(&["10am"]);
        let pred = s(&["monday", "10am", "hello"]);
        let kb = vec![s(&["monday", "date", "meeting"])];
        // "monday" is a local KB head word → FP; "hello" is no entity.
        let (f1, count) = compute_prf(&gold, &pred, &[], &kb);
        assert_eq!(count, 1);
        // precision 1/2, recall 1/1 → F1 = 2/3
        assert!((f1 - 2.0 / 3.0).abs() < 1e-5, "f1 = {}", f1);
    }

    #[test]
    fn prf_missed_gold_lowers_recall() {
        let gold = s(&["a", "b"]);
        let pred = s(&["a"]);
        let (f1, _) = compute_prf(&gold, &pred, &s(&["a", "b"]), &[]);
        // precision 1, recall 1/2 → F1 = 2/3
        assert!((f1 - 2.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn bleu_identical_corpus_is_100() {
        let refs = vec!["the meeting is at ten am today".to_string()];
        let bleu = corpus_bleu(&refs, &refs, true);
        assert!((bleu - 100.0).abs() < 1e-3, "bleu = {}", bleu);
    }

    #[test]
    fn bleu_disjoint_corpus_is_zero() {
        let hyp = vec!["aa bb cc dd".to_string()];
        let reference = vec!["ee ff gg hh".to_string()];
        assert_eq!(corpus_bleu(&hyp, &reference, false), 0.0);
    }

    #[test]
    fn bleu_short_hypotheses_are_penalized() {
        let reference = vec!["the meeting is at ten am on monday morning".to_string()];
        let full = vec!["the meeting is at ten am on monday morning".to_string()];
        let short = vec!["the meeting is at ten".to_string()];
        let b_full = corpus_bleu(&full, &reference, false);
        let b_short = corpus_bleu(&short, &reference, false);
        assert!(b_short < b_full);
    }

    #[test]
    fn bleu_empty_corpus_is_zero() {
        assert_eq!(corpus_bleu(&[], &[], false), 0.0);
    }
}
