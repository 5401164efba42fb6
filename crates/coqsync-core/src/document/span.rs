use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::text::Region;
use crate::wire::StateId;

/// SHA-256 of a span's text when it was recorded.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(text: &str) -> Self {
        Self(Sha256::digest(text.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first few bytes are enough to tell hashes apart in logs.
        write!(f, "ContentHash(")?;
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..)")
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let hex: String = self.0.iter().map(|b| format!("{:02x}", b)).collect();
        serializer.serialize_str(&hex)
    }
}

/// One entry of the committed prefix.
///
/// A committed span carries the backend state its sentence produced; a skip
/// span (whitespace and comments) carries none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub region: Region,
    pub content_hash: Option<ContentHash>,
    pub backend_id: Option<StateId>,
}

impl Span {
    pub fn committed(region: Region, text: &str, backend_id: StateId) -> Self {
        Self {
            region,
            content_hash: Some(ContentHash::of(text)),
            backend_id: Some(backend_id),
        }
    }

    pub fn skip(region: Region, text: &str) -> Self {
        Self {
            region,
            content_hash: Some(ContentHash::of(text)),
            backend_id: None,
        }
    }

    pub fn is_skip(&self) -> bool {
        self.backend_id.is_none()
    }

    /// Whether `region`, currently holding `text`, is still this span.
    pub fn matches(&self, region: Region, text: &str) -> bool {
        self.region == region
            && self
                .content_hash
                .map_or(true, |hash| hash == ContentHash::of(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_sha256() {
        let hash = ContentHash::of("abc");
        assert_eq!(hash.as_bytes()[..4], [0xba, 0x78, 0x16, 0xbf]);
        assert_eq!(format!("{:?}", hash), "ContentHash(ba7816bf8f01..)");
        assert_ne!(hash, ContentHash::of("abd"));
    }

    #[test]
    fn matching_needs_same_region_and_text() {
        let span = Span::committed(Region::new(0, 3), "Qed", StateId::new("4"));
        assert!(span.matches(Region::new(0, 3), "Qed"));
        assert!(!span.matches(Region::new(0, 3), "Qeb"));
        assert!(!span.matches(Region::new(1, 4), "Qed"));
        assert!(!span.is_skip());
        assert!(Span::skip(Region::new(3, 4), " ").is_skip());
    }

    #[test]
    fn unhashed_span_matches_on_region_alone() {
        let span = Span {
            region: Region::new(0, 2),
            content_hash: None,
            backend_id: None,
        };
        assert!(span.matches(Region::new(0, 2), "anything"));
    }

    #[test]
    fn serializes_hash_as_hex() {
        let span = Span::skip(Region::new(0, 3), "abc");
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["region"]["end"], 3);
        assert!(json["content_hash"]
            .as_str()
            .unwrap()
            .starts_with("ba7816bf"));
        assert!(json["backend_id"].is_null());
    }
}
