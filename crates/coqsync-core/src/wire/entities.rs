//! Entity decoding for inbound text and attribute values, escaping for
//! outbound call payloads.

use std::collections::HashMap;

use super::parser::ParseError;

/// Named entities understood by the decoder.
///
/// The backend only emits a handful of entities; anything outside this table
/// is a protocol violation and decoding fails instead of passing it through.
#[derive(Debug, Clone)]
pub struct EntityTable {
    entries: HashMap<String, String>,
}

impl EntityTable {
    /// An empty table. Only numeric character references decode.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register (or replace) an entity.
    pub fn with_entity(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Expand every `&name;` reference in `raw`.
    pub fn decode(&self, raw: &str) -> Result<String, ParseError> {
        if !raw.contains('&') {
            return Ok(raw.to_string());
        }

        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            let after = &rest[amp + 1..];
            let semi = after
                .find(';')
                .ok_or_else(|| ParseError::UnterminatedEntity(truncate(&rest[amp..])))?;
            let name = &after[..semi];
            out.push_str(&self.resolve(name)?);
            rest = &after[semi + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn resolve(&self, name: &str) -> Result<String, ParseError> {
        if let Some(value) = self.get(name) {
            return Ok(value.to_string());
        }

        // Numeric character references: &#123; and &#x7b;
        if let Some(num) = name.strip_prefix('#') {
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => num.parse::<u32>().ok(),
            };
            if let Some(ch) = code.and_then(char::from_u32) {
                return Ok(ch.to_string());
            }
        }

        Err(ParseError::UnknownEntity(name.to_string()))
    }
}

impl Default for EntityTable {
    fn default() -> Self {
        Self::empty()
            .with_entity("amp", "&")
            .with_entity("lt", "<")
            .with_entity("gt", ">")
            .with_entity("quot", "\"")
            .with_entity("apos", "'")
            .with_entity("nbsp", " ")
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(16).collect()
}

/// Escape text for inclusion in a call, either as element text or inside a
/// quoted attribute value.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}
