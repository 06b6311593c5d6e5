//! Path operations on the JSON status document.
//!
//! The document follows real-time database semantics: writing `null` removes
//! a node, and an object left without children disappears with its last child.

use serde_json::{Map, Value};

pub fn get_path<'a>(document: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(document, |node, segment| node.get(*segment))
}

pub fn set_path(document: &mut Value, segments: &[&str], value: Value) {
    if value.is_null() {
        remove_path(document, segments);
        return;
    }
    let Some((last, parents)) = segments.split_last() else {
        *document = value;
        return;
    };
    let mut node = document;
    for segment in parents {
        node = ensure_object(node)
            .entry(segment.to_string())
            .or_insert(Value::Null);
    }
    ensure_object(node).insert(last.to_string(), value);
}

/// Removes the node at `segments` and prunes parents that became empty.
pub fn remove_path(document: &mut Value, segments: &[&str]) -> Option<Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(std::mem::take(document));
    };
    let map = document.as_object_mut()?;
    if rest.is_empty() {
        return map.remove(*first);
    }
    let child = map.get_mut(*first)?;
    let removed = remove_path(child, rest);
    if child.as_object().is_some_and(|c| c.is_empty()) {
        map.remove(*first);
    }
    removed
}

/// Flattens `value` into `(path, leaf)` pairs, joining keys with `/`.
pub fn leaves(prefix: &str, value: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    collect_leaves(prefix, value, &mut out);
    out
}

fn collect_leaves(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}/{key}")
                };
                collect_leaves(&path, child, out);
            }
        }
        Value::Null => {}
        leaf => out.push((prefix.to_string(), leaf.clone())),
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was replaced by an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_creates_intermediate_objects() {
        let mut doc = Value::Null;
        set_path(&mut doc, &["countdownModel", "secondsLeft"], json!(600));
        assert_eq!(doc, json!({"countdownModel": {"secondsLeft": 600}}));
        assert_eq!(
            get_path(&doc, &["countdownModel", "secondsLeft"]),
            Some(&json!(600))
        );
    }

    #[test]
    fn set_root_replaces_document() {
        let mut doc = json!({"manualShade": 10});
        set_path(&mut doc, &[], json!({"automaticMode": true}));
        assert_eq!(doc, json!({"automaticMode": true}));
    }

    #[test]
    fn removing_last_child_prunes_parent() {
        let mut doc = json!({"manualShade": 10, "countdownModel": {"secondsLeft": 30}});
        let removed = remove_path(&mut doc, &["countdownModel", "secondsLeft"]);
        assert_eq!(removed, Some(json!(30)));
        assert_eq!(doc, json!({"manualShade": 10}));
    }

    #[test]
    fn writing_null_deletes() {
        let mut doc = json!({"countdownModel": {"secondsLeft": 30}});
        set_path(&mut doc, &["countdownModel"], Value::Null);
        assert_eq!(doc, json!({}));
        assert_eq!(get_path(&doc, &["countdownModel"]), None);
    }

    #[test]
    fn flatten_nested_record() {
        let value = json!({"automaticMode": true, "countdownModel": {"secondsLeft": 90}});
        let mut flat = leaves("", &value);
        flat.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            flat,
            vec![
                ("automaticMode".to_string(), json!(true)),
                ("countdownModel/secondsLeft".to_string(), json!(90)),
            ]
        );
    }
}
