//! KB entity-pair edge extraction.
//!
//! A pure batch text transform over the transcript format: for every sample
//! it emits the pairs of KB facts that are graph-connected, one
//! `[fact1],[fact2]` line per edge, grouped under `#<sample>` headers.
//! Pairing rules are task-specific:
//!
//! - `navigate`: a 5-token fact links to every 3-token fact whose head is
//!   the 5-token fact's trailing entity, and vice versa (entity linking);
//! - `schedule` / `weather`: two distinct facts link when they share a head
//!   (`weather` only pairs outward from facts with at least 3 tokens).
//!
//! The same pairing drives adjacency-matrix construction at batch time.

use std::path::Path;

/// Index pairs `(i, j)` of connected facts, in emission order.
///
/// `kb` holds each fact's whitespace tokens. Facts are compared by content,
/// so duplicated fact lines pair exactly like the duplicated originals.
pub fn pair_indices(task_type: &str, kb: &[Vec<String>]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    match task_type {
        "navigate" => {
            for (i, fact) in kb.iter().enumerate() {
                if fact.len() == 5 {
                    let ent = &fact[fact.len() - 1];
                    for (j, other) in kb.iter().enumerate() {
                        if other.len() == 3 && &other[0] == ent {
                            pairs.push((i, j));
                        }
                    }
                } else if fact.len() == 3 {
                    let head = &fact[0];
                    for (j, other) in kb.iter().enumerate() {
                        if other.len() == 5 && &other[other.len() - 1] == head {
                            pairs.push((i, j));
                        }
                    }
                }
            }
        }
        "schedule" => {
            for (i, fact) in kb.iter().enumerate() {
                let head = &fact[0];
                for (j, other) in kb.iter().enumerate() {
                    if &other[0] == head && other != fact {
                        pairs.push((i, j));
                    }
                }
            }
        }
        "weather" => {
            for (i, fact) in kb.iter().enumerate() {
                if fact.len() >= 3 {
                    let head = &fact[0];
                    for (j, other) in kb.iter().enumerate() {
                        if &other[0] == head && other != fact {
                            pairs.push((i, j));
                        }
                    }
                }
            }
        }
        _ => {}
    }
    pairs
}

/// Transform a transcript into edge-pair lines.
///
/// Pairs for a sample are emitted once: at the first dialogue-turn line, or
/// at the end of the sample when no turn line follows the KB. Samples with
/// an empty KB emit a single `[]` line.
pub fn extract_edge_pairs(text: &str) -> String {
    let mut out = String::new();
    let mut nsample = 0usize;
    let mut task_type = String::new();
    let mut kb: Vec<Vec<String>> = Vec::new();
    let mut emitted = false;

    let emit = |out: &mut String, task: &str, kb: &[Vec<String>]| {
        for (i, j) in pair_indices(task, kb) {
            out.push_str(&format!("[{}],[{}]\n", kb[i].join(" "), kb[j].join(" ")));
        }
    };

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            if kb.is_empty() {
                out.push_str("[]\n");
            }
            if !emitted {
                emit(&mut out, &task_type, &kb);
            }
            out.push('\n');
            kb.clear();
            nsample += 1;
            emitted = false;
            continue;
        }
        if let Some(task) = line.strip_prefix('#') {
            out.push_str(&format!("#{}\n", nsample));
            task_type = task.trim().to_string();
            continue;
        }
        let Some((nid, content)) = line.split_once(' ') else {
            continue;
        };
        if nid == "0" {
            kb.push(content.split_whitespace().map(str::to_string).collect());
        } else if !kb.is_empty() && !emitted {
            emit(&mut out, &task_type, &kb);
            emitted = true;
        }
    }
    out
}

/// File-to-file wrapper around [`extract_edge_pairs`].
pub fn extract_edge_pairs_file(input: &Path, output: &Path) -> Result<(), String> {
    let text = std::fs::read_to_string(input)
        .map_err(|e| format!("read {}: {}", input.display(), e))?;
    std::fs::write(output, extract_edge_pairs(&text))
        .map_err(|e| format!("write {}: {}", output.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(lines: &[&str]) -> Vec<Vec<String>> {
        lines
            .iter()
            .map(|l| l.split_whitespace().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn navigate_links_five_token_to_three_token_facts() {
        let kb = facts(&[
            "home_2 5_miles moderate_traffic home chef_chu",
            "chef_chu address 593_arrowhead_way",
            "unrelated address 1_main_st",
        ]);
        let pairs = pair_indices("navigate", &kb);
        // 5-token fact 0 links to 3-token fact 1 (head chef_chu), and back.
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn schedule_links_shared_heads_both_ways() {
        let kb = facts(&[
            "meeting time 10am",
            "meeting date monday",
            "dinner time 7pm",
        ]);
        let pairs = pair_indices("schedule", &kb);
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn weather_requires_three_tokens_on_the_source_fact() {
        let kb = facts(&["boston monday", "boston tuesday cloudy"]);
        let pairs = pair_indices("weather", &kb);
        // Only the 3-token fact pairs outward; the 2-token fact is skipped.
        assert_eq!(pairs, vec![(1, 0)]);
    }

    #[test]
    fn unknown_task_type_produces_no_pairs() {
        let kb = facts(&["a b c", "a d e"]);
        assert!(pair_indices("chitchat", &kb).is_empty());
    }

    #[test]
    fn extract_groups_by_sample_and_marks_empty_kb() {
        let text = "\
#schedule
0 meeting time 10am
0 meeting date monday
1 when is my meeting\tat 10am monday\t[\"10am\", \"monday\"]

#schedule
1 hello\thi there\t[]
";
        let out = extract_edge_pairs(text);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "#0");
        assert_eq!(lines[1], "[meeting time 10am],[meeting date monday]");
        assert_eq!(lines[2], "[meeting date monday],[meeting time 10am]");
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "#1");
        assert_eq!(lines[5], "[]");
    }

    #[test]
    fn kb_without_turns_still_emits_pairs_at_sample_end() {
        let text = "\
#schedule
0 meeting time 10am
0 meeting date monday

";
        let out = extract_edge_pairs(text);
        assert!(out.contains("[meeting time 10am],[meeting date monday]"));
    }
}
