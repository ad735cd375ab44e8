use std::collections::HashMap;

use uuid::Uuid;

use super::canonical::SnapshotDigest;

/// Owns the player → last-stored-digest map for one run.
///
/// Loaded once at run start and updated in place as players are observed, so
/// the map stays current for the remainder of the pass. Deliberately a value
/// owned by the pipeline instance rather than process-wide state.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    known: HashMap<Uuid, SnapshotDigest>,
}

impl ChangeDetector {
    pub fn new(known: HashMap<Uuid, SnapshotDigest>) -> Self {
        Self { known }
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Compares a freshly computed digest against the stored one. Returns
    /// `true` (and records the new digest) when the player is new or their
    /// data changed; `false` means the player can be skipped for storage and
    /// metric recomputation this pass.
    pub fn observe(&mut self, player: Uuid, digest: SnapshotDigest) -> bool {
        match self.known.get(&player) {
            Some(previous) if *previous == digest => false,
            _ => {
                self.known.insert(player, digest);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(seed: u8) -> SnapshotDigest {
        [seed; 20]
    }

    #[test]
    fn new_player_is_changed() {
        let mut detector = ChangeDetector::default();
        assert!(detector.observe(Uuid::from_u128(1), digest(1)));
        assert_eq!(detector.len(), 1);
    }

    #[test]
    fn matching_digest_is_unchanged() {
        let player = Uuid::from_u128(7);
        let mut detector = ChangeDetector::new(HashMap::from([(player, digest(3))]));

        assert!(!detector.observe(player, digest(3)));
    }

    #[test]
    fn differing_digest_is_changed_and_updates_in_place() {
        let player = Uuid::from_u128(7);
        let mut detector = ChangeDetector::new(HashMap::from([(player, digest(3))]));

        assert!(detector.observe(player, digest(4)));
        // The map now holds the new digest, so a repeat observation is a skip.
        assert!(!detector.observe(player, digest(4)));
    }
}
