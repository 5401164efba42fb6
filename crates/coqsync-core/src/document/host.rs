//! What a document needs from the editor holding its text.

use std::collections::HashMap;

use regex::Regex;

use crate::text::{Region, TextSource};

/// An editor buffer: text search plus tagged highlight regions.
///
/// The editor is expected to move regions as the user edits, which is what
/// change detection relies on.
pub trait EditorHost: TextSource {
    fn cursor_position(&self) -> usize;

    /// Replace every region stored under `tag`.
    fn set_highlighted_regions(&mut self, tag: &str, regions: &[Region]);

    /// Regions currently stored under `tag`, after any edits.
    fn highlighted_regions(&self, tag: &str) -> Vec<Region>;
}

/// In-memory [`EditorHost`].
///
/// Edits move stored regions like an editor would: text inserted exactly at
/// a region's end stays outside it, while text inserted at its start pushes
/// the whole region along.
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    text: String,
    cursor: usize,
    regions: HashMap<String, Vec<Region>>,
}

impl TextBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn set_cursor(&mut self, pos: usize) {
        self.cursor = pos.min(self.text.len());
    }

    /// Replace `range` with `replacement`.
    ///
    /// Out-of-range or non-boundary edits are clamped to the nearest char
    /// boundary below.
    pub fn replace(&mut self, range: Region, replacement: &str) {
        let end = floor_boundary(&self.text, range.end);
        let start = floor_boundary(&self.text, range.start.min(end));
        let edit = Region::new(start, end);
        self.text.replace_range(start..end, replacement);

        let inserted = replacement.len();
        for regions in self.regions.values_mut() {
            for region in regions.iter_mut() {
                region.start = shift(region.start, edit, inserted, Bias::After);
                region.end = shift(region.end, edit, inserted, Bias::Before);
                if region.end < region.start {
                    region.end = region.start;
                }
            }
        }
        self.cursor = shift(self.cursor, edit, inserted, Bias::After);
    }

    pub fn insert(&mut self, pos: usize, text: &str) {
        self.replace(Region::new(pos, pos), text);
    }

    pub fn delete(&mut self, range: Region) {
        self.replace(range, "");
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Bias {
    /// Stay in front of text inserted at this position.
    Before,
    /// Move behind text inserted at this position.
    After,
}

fn shift(pos: usize, edit: Region, inserted: usize, bias: Bias) -> usize {
    if pos < edit.start || (pos == edit.start && bias == Bias::Before) {
        pos
    } else if pos >= edit.end {
        pos - edit.len() + inserted
    } else if bias == Bias::After {
        edit.start + inserted
    } else {
        edit.start
    }
}

fn floor_boundary(text: &str, pos: usize) -> usize {
    let mut pos = pos.min(text.len());
    while !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

impl TextSource for TextBuffer {
    fn find(&self, pattern: &Regex, from: usize) -> Option<Region> {
        TextSource::find(self.text.as_str(), pattern, from)
    }

    fn substr(&self, region: Region) -> String {
        TextSource::substr(self.text.as_str(), region)
    }
}

impl EditorHost for TextBuffer {
    fn cursor_position(&self) -> usize {
        self.cursor
    }

    fn set_highlighted_regions(&mut self, tag: &str, regions: &[Region]) {
        if regions.is_empty() {
            self.regions.remove(tag);
        } else {
            self.regions.insert(tag.to_string(), regions.to_vec());
        }
    }

    fn highlighted_regions(&self, tag: &str) -> Vec<Region> {
        self.regions.get(tag).cloned().unwrap_or_default()
    }
}
