//! Byte regions and the minimal text-search interface the scanner needs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open byte range `[start, end)` into a UTF-8 document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region {
    pub start: usize,
    pub end: usize,
}

impl Region {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos < self.end
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Read access to a document's text.
pub trait TextSource {
    /// Leftmost match of `pattern` starting at or after byte `from`.
    fn find(&self, pattern: &Regex, from: usize) -> Option<Region>;

    /// Text covered by `region`, clamped to the document.
    fn substr(&self, region: Region) -> String;
}

impl TextSource for str {
    fn find(&self, pattern: &Regex, from: usize) -> Option<Region> {
        if from > self.len() {
            return None;
        }
        pattern
            .find_at(self, from)
            .map(|m| Region::new(m.start(), m.end()))
    }

    fn substr(&self, region: Region) -> String {
        let end = region.end.min(self.len());
        let start = region.start.min(end);
        self.get(start..end).unwrap_or_default().to_string()
    }
}

impl TextSource for String {
    fn find(&self, pattern: &Regex, from: usize) -> Option<Region> {
        TextSource::find(self.as_str(), pattern, from)
    }

    fn substr(&self, region: Region) -> String {
        TextSource::substr(self.as_str(), region)
    }
}
