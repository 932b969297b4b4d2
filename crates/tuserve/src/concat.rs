//! Parser for the `Upload-Concat` header.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ProtocolError;

static RE_LAST_SEGMENT: OnceLock<Regex> = OnceLock::new();

fn last_segment_regex() -> &'static Regex {
    RE_LAST_SEGMENT.get_or_init(|| Regex::new(r"([^/]+)/?$").expect("invalid regex pattern"))
}

/// The upload id referenced by a partial-upload URL: its last path segment.
/// A trailing slash is tolerated.
pub(crate) fn id_from_url(url: &str) -> Option<String> {
    let path = url.split('?').next().unwrap_or(url);
    last_segment_regex()
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Parsed form of `Upload-Concat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadConcat {
    /// `Upload-Concat: partial` — a fragment meant for later concatenation.
    Partial,
    /// `Upload-Concat: final;<url> <url>…` — the ordered source ids.
    Final { parts: Vec<String> },
}

impl UploadConcat {
    pub fn parse(raw: &str) -> Result<UploadConcat, ProtocolError> {
        let raw = raw.trim();
        if raw == "partial" {
            return Ok(UploadConcat::Partial);
        }
        if let Some(list) = raw.strip_prefix("final;") {
            let parts: Vec<String> = list.split_whitespace().filter_map(id_from_url).collect();
            if parts.is_empty() {
                return Err(ProtocolError::InvalidConcat);
            }
            return Ok(UploadConcat::Final { parts });
        }
        Err(ProtocolError::InvalidConcat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial() {
        assert_eq!(UploadConcat::parse("partial").unwrap(), UploadConcat::Partial);
        assert_eq!(UploadConcat::parse(" partial ").unwrap(), UploadConcat::Partial);
    }

    #[test]
    fn parses_final_with_absolute_and_relative_urls() {
        let parsed = UploadConcat::parse("final;http://tus.io/files/a /files/b/").unwrap();
        assert_eq!(
            parsed,
            UploadConcat::Final {
                parts: vec!["a".to_owned(), "b".to_owned()]
            }
        );
    }

    #[test]
    fn tolerates_space_after_semicolon() {
        let parsed = UploadConcat::parse("final; http://tus.io/files/a /files/b").unwrap();
        assert_eq!(
            parsed,
            UploadConcat::Final {
                parts: vec!["a".to_owned(), "b".to_owned()]
            }
        );
    }

    #[test]
    fn preserves_source_order() {
        let parsed = UploadConcat::parse("final;/f/3 /f/1 /f/2").unwrap();
        match parsed {
            UploadConcat::Final { parts } => assert_eq!(parts, vec!["3", "1", "2"]),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn rejects_final_without_sources() {
        assert!(matches!(
            UploadConcat::parse("final;"),
            Err(ProtocolError::InvalidConcat)
        ));
        assert!(matches!(
            UploadConcat::parse("final; "),
            Err(ProtocolError::InvalidConcat)
        ));
    }

    #[test]
    fn rejects_unknown_syntax() {
        assert!(UploadConcat::parse("").is_err());
        assert!(UploadConcat::parse("partial2").is_err());
        assert!(UploadConcat::parse("final").is_err());
    }

    #[test]
    fn id_extraction_takes_last_segment() {
        assert_eq!(id_from_url("http://host/files/abc").as_deref(), Some("abc"));
        assert_eq!(id_from_url("/files/abc/").as_deref(), Some("abc"));
        assert_eq!(id_from_url("abc").as_deref(), Some("abc"));
        assert_eq!(id_from_url("http://host/files/abc?x=1").as_deref(), Some("abc"));
    }
}
