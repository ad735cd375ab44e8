use std::collections::HashMap;

use chrono::{DateTime, Utc};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Display names are capped at this many characters; truncation is silent.
pub const MAX_NAME_LEN: usize = 16;

/// Where a resolved display name came from. Stored alongside the profile so
/// the external name-refresh job can prioritize synthesized entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum NameSource {
    /// Identity cache supplied with this pass.
    Cache,
    /// Name already stored for this player in this run.
    Known,
    /// Synthesized from the player id.
    Fallback,
}

/// Name metadata previously stored for a player in the active run.
#[derive(Debug, Clone)]
pub struct KnownName {
    pub name: String,
    pub source: Option<NameSource>,
    pub checked_at: Option<DateTime<Utc>>,
}

/// A display name picked for the current pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedName {
    pub name: String,
    pub source: NameSource,
    pub checked_at: Option<DateTime<Utc>>,
}

/// Classifies display names that were synthesized rather than observed.
///
/// Best-effort by design: the rule set is configuration, not a hardened
/// parser. Defaults match the stock fallback shape (empty, "Unknown", or
/// 12 lowercase hex chars).
#[derive(Debug, Clone)]
pub struct PlaceholderPolicy {
    pub literals: Vec<String>,
    pub hex_len: Option<usize>,
}

impl Default for PlaceholderPolicy {
    fn default() -> Self {
        Self {
            literals: vec![String::new(), "Unknown".to_string()],
            hex_len: Some(12),
        }
    }
}

impl PlaceholderPolicy {
    pub fn is_placeholder(&self, name: &str) -> bool {
        if self.literals.iter().any(|literal| literal == name) {
            return true;
        }
        match self.hex_len {
            Some(len) => {
                name.len() == len
                    && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            }
            None => false,
        }
    }
}

/// Resolves display names from local sources only, in priority order:
/// identity cache, then the name already stored for this run, then a
/// deterministic fallback derived from the player id. A stored name is never
/// replaced by the lower-priority fallback.
pub struct NameResolver {
    cache: HashMap<Uuid, String>,
    known: HashMap<Uuid, KnownName>,
    policy: PlaceholderPolicy,
}

impl NameResolver {
    pub fn new(
        cache: HashMap<Uuid, String>,
        known: HashMap<Uuid, KnownName>,
        policy: PlaceholderPolicy,
    ) -> Self {
        Self {
            cache,
            known,
            policy,
        }
    }

    pub fn resolve(&self, player: Uuid, now: DateTime<Utc>) -> ResolvedName {
        if let Some(name) = self.cache.get(&player) {
            // Cache hits count as freshly checked so the external refresh job
            // does not immediately re-query them.
            return ResolvedName {
                name: truncate_name(name),
                source: NameSource::Cache,
                checked_at: Some(now),
            };
        }

        if let Some(known) = self.known.get(&player) {
            let source = if self.policy.is_placeholder(&known.name) {
                NameSource::Fallback
            } else {
                known.source.unwrap_or(NameSource::Known)
            };
            return ResolvedName {
                name: truncate_name(&known.name),
                source,
                checked_at: known.checked_at,
            };
        }

        ResolvedName {
            name: fallback_name(player),
            source: NameSource::Fallback,
            checked_at: None,
        }
    }
}

pub fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_NAME_LEN).collect()
}

/// Stable fallback: the first 12 hex chars of the undashed player id.
pub fn fallback_name(player: Uuid) -> String {
    player.simple().to_string().chars().take(12).collect()
}
