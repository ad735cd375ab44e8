use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

use super::normalizer::StatsTree;

/// 20-byte content digest of a canonical snapshot.
pub type SnapshotDigest = [u8; 20];

const PAYLOAD_COMPRESSION_LEVEL: u32 = 6;

/// Serializes a normalized tree to its canonical byte form: compact JSON with
/// keys sorted at every nesting level. Two trees with identical contents
/// always produce identical bytes, regardless of input key order.
pub fn canonical_bytes(tree: &StatsTree) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(tree)
}

/// SHA-1 digest over the canonical bytes.
pub fn snapshot_digest(bytes: &[u8]) -> SnapshotDigest {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Gzip-compresses the canonical bytes for storage.
pub fn compress_payload(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(bytes.len() / 2),
        Compression::new(PAYLOAD_COMPRESSION_LEVEL),
    );
    encoder.write_all(bytes)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::normalize;
    use flate2::read::GzDecoder;
    use rstest::rstest;
    use serde_json::json;
    use std::io::Read;

    const NO_SUFFIXES: &[String] = &[];

    #[rstest]
    #[case(
        json!({ "mined": { "stone": 1, "dirt": 2 }, "used": { "torch": 3 } }),
        json!({ "used": { "torch": 3 }, "mined": { "dirt": 2, "stone": 1 } })
    )]
    #[case(
        json!({ "custom": { "jumps": 9, "deaths": 1 } }),
        json!({ "custom": { "deaths": 1, "jumps": 9 } })
    )]
    fn key_order_does_not_change_canonical_form(#[case] left: serde_json::Value, #[case] right: serde_json::Value) {
        let left = canonical_bytes(&normalize(left, NO_SUFFIXES)).unwrap();
        let right = canonical_bytes(&normalize(right, NO_SUFFIXES)).unwrap();

        assert_eq!(left, right);
        assert_eq!(snapshot_digest(&left), snapshot_digest(&right));
    }

    #[test]
    fn canonical_form_has_no_incidental_whitespace() {
        let tree = normalize(json!({ "a": { "b": 1 } }), NO_SUFFIXES);
        let bytes = canonical_bytes(&tree).unwrap();
        assert_eq!(bytes, br#"{"a":{"b":1}}"#);
    }

    #[test]
    fn different_values_produce_different_digests() {
        let one = canonical_bytes(&normalize(json!({ "a": { "b": 1 } }), NO_SUFFIXES)).unwrap();
        let two = canonical_bytes(&normalize(json!({ "a": { "b": 2 } }), NO_SUFFIXES)).unwrap();
        assert_ne!(snapshot_digest(&one), snapshot_digest(&two));
    }

    #[test]
    fn digest_is_twenty_bytes() {
        assert_eq!(snapshot_digest(b"anything").len(), 20);
    }

    #[test]
    fn compressed_payload_round_trips() {
        let bytes = canonical_bytes(&normalize(json!({ "mined": { "stone": 42 } }), NO_SUFFIXES)).unwrap();
        let packed = compress_payload(&bytes).unwrap();

        let mut unpacked = Vec::new();
        GzDecoder::new(packed.as_slice())
            .read_to_end(&mut unpacked)
            .unwrap();
        assert_eq!(unpacked, bytes);
    }
}
