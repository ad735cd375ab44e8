use serde_json::{Map, Value};

/// Section → key → value statistics tree with cosmetic noise removed.
///
/// `serde_json::Map` keeps keys in sorted order, which the canonical byte
/// form depends on.
pub type StatsTree = Map<String, Value>;

/// Turns one raw snapshot document into a normalized tree.
///
/// An outer `{"stats": {...}}` envelope is unwrapped when present. Keys
/// ending in any of the configured cosmetic suffixes are dropped from
/// object-valued sections; such values change without statistical meaning
/// and would defeat change detection. A non-object document yields an empty
/// tree so one malformed file cannot abort the pass.
pub fn normalize(raw: Value, cosmetic_suffixes: &[String]) -> StatsTree {
    let mut tree = match raw {
        Value::Object(mut outer) => match outer.remove("stats") {
            Some(Value::Object(inner)) => inner,
            Some(other) => {
                outer.insert("stats".to_string(), other);
                outer
            }
            None => outer,
        },
        _ => Map::new(),
    };

    for (_, section) in tree.iter_mut() {
        if let Value::Object(entries) = section {
            entries.retain(|key, _| {
                !cosmetic_suffixes
                    .iter()
                    .any(|suffix| key.ends_with(suffix.as_str()))
            });
        }
    }

    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn suffixes() -> Vec<String> {
        vec!["_wall_banner".to_string()]
    }

    #[test]
    fn unwraps_stats_envelope() {
        let raw = json!({ "stats": { "mined": { "stone": 10 } }, "DataVersion": 3465 });
        let tree = normalize(raw, &suffixes());

        assert_eq!(tree.len(), 1);
        assert_eq!(tree["mined"]["stone"], 10);
    }

    #[test]
    fn keeps_bare_tree_without_envelope() {
        let raw = json!({ "mined": { "stone": 3 } });
        let tree = normalize(raw, &suffixes());
        assert_eq!(tree["mined"]["stone"], 3);
    }

    #[test]
    fn keeps_document_when_stats_key_is_not_an_object() {
        let raw = json!({ "stats": 7, "mined": { "stone": 1 } });
        let tree = normalize(raw, &suffixes());

        assert_eq!(tree["stats"], 7);
        assert_eq!(tree["mined"]["stone"], 1);
    }

    #[test]
    fn strips_cosmetic_keys_from_every_section() {
        let raw = json!({
            "mined": { "stone": 4, "red_wall_banner": 2 },
            "placed": { "blue_wall_banner": 9 }
        });
        let tree = normalize(raw, &suffixes());

        assert_eq!(tree["mined"]["stone"], 4);
        assert!(tree["mined"].get("red_wall_banner").is_none());
        assert!(tree["placed"].as_object().unwrap().is_empty());
    }

    #[test]
    fn leaves_non_object_sections_alone() {
        let raw = json!({ "mined": 12 });
        let tree = normalize(raw, &suffixes());
        assert_eq!(tree["mined"], 12);
    }

    #[test]
    fn non_object_document_yields_empty_tree() {
        assert!(normalize(json!([1, 2, 3]), &suffixes()).is_empty());
        assert!(normalize(json!("text"), &suffixes()).is_empty());
        assert!(normalize(Value::Null, &suffixes()).is_empty());
    }
}
