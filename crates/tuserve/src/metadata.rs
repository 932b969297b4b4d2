//! Codec for the `Upload-Metadata` header.
//!
//! The header carries comma-separated `key base64(value)` pairs. Parsing is
//! lenient: entries whose key is empty or not followed by a decodable
//! base64 value are skipped, and a duplicated key keeps the last value.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Key-value metadata attached to an upload.
///
/// Keys are ASCII tokens; values are arbitrary bytes. The empty mapping is
/// valid and serializes to no header at all.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(pub HashMap<String, Vec<u8>>);

impl Metadata {
    pub fn parse(raw: &str) -> Metadata {
        let mut map = HashMap::new();

        for item in raw.split(',') {
            let item = item.trim();
            let Some((key, b64)) = item.split_once(' ') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() || key.contains(',') {
                continue;
            }
            let Ok(value) = STANDARD.decode(b64.trim()) else {
                continue;
            };
            map.insert(key.to_owned(), value);
        }

        Metadata(map)
    }

    /// Serializes back to the header shape. Pair order is unspecified.
    pub fn to_header(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let value = self
            .0
            .iter()
            .map(|(key, value)| format!("{key} {}", STANDARD.encode(value)))
            .collect::<Vec<_>>()
            .join(",");
        Some(value)
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// The value for `key` when it is valid UTF-8.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs() {
        let meta = Metadata::parse("name bHVucmpzLnBuZw==,type aW1hZ2UvcG5n");
        assert_eq!(meta.get_str("name"), Some("lunrjs.png"));
        assert_eq!(meta.get_str("type"), Some("image/png"));
        assert_eq!(meta.0.len(), 2);
    }

    #[test]
    fn tolerates_whitespace_around_commas() {
        let meta = Metadata::parse("name bHVucmpzLnBuZw== , type aW1hZ2UvcG5n");
        assert_eq!(meta.get_str("name"), Some("lunrjs.png"));
        assert_eq!(meta.get_str("type"), Some("image/png"));
    }

    #[test]
    fn skips_keys_without_value() {
        let meta = Metadata::parse("is_confidential,name bHVucmpzLnBuZw==");
        assert_eq!(meta.0.len(), 1);
        assert_eq!(meta.get_str("name"), Some("lunrjs.png"));
    }

    #[test]
    fn skips_undecodable_values() {
        let meta = Metadata::parse("name !!!not-base64!!!,type aW1hZ2UvcG5n");
        assert_eq!(meta.0.len(), 1);
        assert_eq!(meta.get_str("type"), Some("image/png"));
    }

    #[test]
    fn duplicate_keys_last_wins() {
        let meta = Metadata::parse("k Zmlyc3Q=,k c2Vjb25k");
        assert_eq!(meta.get_str("k"), Some("second"));
    }

    #[test]
    fn empty_header_parses_to_empty_mapping() {
        assert!(Metadata::parse("").is_empty());
        assert!(Metadata::parse("   ").is_empty());
    }

    #[test]
    fn empty_mapping_serializes_to_no_header() {
        assert_eq!(Metadata::default().to_header(), None);
    }

    #[test]
    fn round_trips_through_header_form() {
        let mut meta = Metadata::default();
        meta.insert("filename", "report.pdf".as_bytes());
        meta.insert("filetype", "application/pdf".as_bytes());

        let header = meta.to_header().unwrap();
        assert_eq!(Metadata::parse(&header), meta);
    }

    #[test]
    fn round_trips_arbitrary_bytes() {
        let mut meta = Metadata::default();
        meta.insert("blob", vec![0u8, 255, 128, 7]);

        let header = meta.to_header().unwrap();
        assert_eq!(Metadata::parse(&header), meta);
    }
}
