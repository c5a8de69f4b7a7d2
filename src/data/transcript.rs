//! Line-oriented dialogue transcript reader.
//!
//! Format, per sample (samples are blank-line-delimited):
//!
//! ```text
//! #navigate
//! 0 pizza_hut distance 4_miles
//! 0 pizza_hut poi_type pizza_restaurant
//! 1 where is the nearest pizza place\tpizza_hut is 4_miles away\t["pizza_hut", "4_miles"]
//! ```
//!
//! `#<type>` names the task, `0 ...` lines are KB facts, numbered lines are
//! turns: user utterance, system response, and (tab-separated, optional)
//! a JSON list of gold entities for the response.

use std::path::Path;

/// One KB fact line, kept as its raw whitespace tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbFact {
    pub tokens: Vec<String>,
}

/// One dialogue turn: user utterance, gold system response, gold entities.
#[derive(Debug, Clone)]
pub struct DialogueTurn {
    pub user: String,
    pub system: String,
    pub gold_entities: Vec<String>,
}

/// One dialogue with its KB.
#[derive(Debug, Clone)]
pub struct DialogueSample {
    /// Task type from the `#` header (navigate / schedule / weather / …).
    pub task_type: String,
    pub kb: Vec<KbFact>,
    pub turns: Vec<DialogueTurn>,
    /// Position of the dialogue in the file; groups responses for the
    /// dialogue-accuracy metric.
    pub id: usize,
}

/// Read every sample from a transcript file.
pub fn read_transcript(path: &Path) -> Result<Vec<DialogueSample>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("read {}: {}", path.display(), e))?;
    parse_transcript(&text)
}

/// Parse transcript text. Malformed turn lines are reported with their
/// 1-based line number.
pub fn parse_transcript(text: &str) -> Result<Vec<DialogueSample>, String> {
    let mut samples = Vec::new();
    let mut current = DialogueSample {
        task_type: String::new(),
        kb: Vec::new(),
        turns: Vec::new(),
        id: 0,
    };
    let mut open = false;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            if open {
                current.id = samples.len();
                samples.push(std::mem::replace(
                    &mut current,
                    DialogueSample {
                        task_type: String::new(),
                        kb: Vec::new(),
                        turns: Vec::new(),
                        id: 0,
                    },
                ));
                open = false;
            }
            continue;
        }
        open = true;

        if let Some(task) = line.strip_prefix('#') {
            current.task_type = task.trim().to_string();
            continue;
        }

        let (nid, content) = line
            .split_once(' ')
            .ok_or_else(|| format!("line {}: expected '<turn_id> <content>'", lineno + 1))?;
        if nid == "0" {
            current.kb.push(KbFact {
                tokens: content.split_whitespace().map(str::to_string).collect(),
            });
        } else {
            let mut fields = content.split('\t');
            let user = fields
                .next()
                .ok_or_else(|| format!("line {}: missing user utterance", lineno + 1))?;
            let system = fields
                .next()
                .ok_or_else(|| format!("line {}: missing system response", lineno + 1))?;
            let gold_entities = match fields.next() {
                Some(json) => serde_json::from_str::<Vec<String>>(json)
                    .map_err(|e| format!("line {}: bad entity list: {}", lineno + 1, e))?,
                None => Vec::new(),
            };
            current.turns.push(DialogueTurn {
                user: user.trim().to_string(),
                system: system.trim().to_string(),
                gold_entities,
            });
        }
    }
    if open {
        current.id = samples.len();
        samples.push(current);
    }
    Ok(samples)
}

/// Load the global entity list from the assistant entity JSON file.
///
/// The file maps slot types to entity lists; `poi` entries are objects whose
/// every field value is an entity. Entities are lowercased with spaces
/// replaced by underscores, deduplicated.
pub fn load_global_entities(path: &Path) -> Result<Vec<String>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("read {}: {}", path.display(), e))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| format!("parse {}: {}", path.display(), e))?;
    let map = value
        .as_object()
        .ok_or_else(|| format!("{}: expected a JSON object", path.display()))?;

    let mut entities = Vec::new();
    for (key, items) in map {
        let items = items
            .as_array()
            .ok_or_else(|| format!("{}: '{}' is not a list", path.display(), key))?;
        for item in items {
            match item {
                serde_json::Value::Object(fields) => {
                    for field in fields.values() {
                        if let Some(s) = field.as_str() {
                            entities.push(normalize_entity(s));
                        }
                    }
                }
                other => {
                    if let Some(s) = other.as_str() {
                        entities.push(normalize_entity(s));
                    } else {
                        entities.push(normalize_entity(&other.to_string()));
                    }
                }
            }
        }
    }
    entities.sort();
    entities.dedup();
    Ok(entities)
}

fn normalize_entity(s: &str) -> String {
    s.to_lowercase().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
#navigate
0 pizza_hut distance 4_miles
0 pizza_hut poi_type pizza_restaurant
1 where is the nearest pizza place\tpizza_hut is 4_miles away\t[\"pizza_hut\", \"4_miles\"]

#schedule
1 what time is my meeting\tyour meeting is at 10am\t[\"10am\"]
2 thanks\tyou are welcome\t[]
";

    #[test]
    fn parses_samples_and_kb() {
        let samples = parse_transcript(SAMPLE).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].task_type, "navigate");
        assert_eq!(samples[0].kb.len(), 2);
        assert_eq!(samples[0].turns.len(), 1);
        assert_eq!(
            samples[0].turns[0].gold_entities,
            vec!["pizza_hut".to_string(), "4_miles".to_string()]
        );
        assert_eq!(samples[1].task_type, "schedule");
        assert!(samples[1].kb.is_empty());
        assert_eq!(samples[1].turns.len(), 2);
        assert_eq!(samples[1].id, 1);
    }

    #[test]
    fn rejects_malformed_turn_line() {
        let err = parse_transcript("#navigate\nbroken\n").unwrap_err();
        assert!(err.contains("line 2"), "unexpected error: {}", err);
    }

    #[test]
    fn global_entities_flatten_poi_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entities.json");
        std::fs::write(
            &path,
            r#"{"poi": [{"address": "593 Arrowhead Way", "poi": "Chef Chu"}],
                "time": ["10 am", "11 am"]}"#,
        )
        .unwrap();
        let entities = load_global_entities(&path).unwrap();
        assert!(entities.contains(&"chef_chu".to_string()));
        assert!(entities.contains(&"593_arrowhead_way".to_string()));
        assert!(entities.contains(&"10_am".to_string()));
        assert_eq!(entities.len(), 4);
    }
}
