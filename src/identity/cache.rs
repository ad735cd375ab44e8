use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use super::resolver::truncate_name;

/// One identity cache record. Extra fields (expiry timestamps and the like)
/// are ignored; both `id` and `uuid` key spellings are accepted.
#[derive(Debug, Deserialize)]
struct CacheEntry {
    name: Option<String>,
    #[serde(alias = "uuid")]
    id: Option<String>,
}

/// Loads the identity cache: a JSON array of `{name, id, ...}` records.
///
/// A missing or unreadable file yields an empty map (the resolver falls back
/// to stored names); individual malformed records are dropped.
pub fn load_identity_cache(path: &Path) -> HashMap<Uuid, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Identity cache not readable; continuing without it");
            return HashMap::new();
        }
    };

    let entries: Vec<CacheEntry> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Identity cache is not a JSON array; continuing without it");
            return HashMap::new();
        }
    };

    let mut names = HashMap::new();
    for entry in entries {
        let (Some(name), Some(id)) = (entry.name, entry.id) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let Ok(player) = Uuid::parse_str(id.trim()) else {
            continue;
        };
        names.insert(player, truncate_name(&name));
    }
    names
}
