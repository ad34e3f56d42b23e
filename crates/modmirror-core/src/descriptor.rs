//! Declarative source descriptors
//!
//! A descriptor is an ini-like block. Only the `[General]` section (and any
//! keys written before the first section header) is read. Parsing is total:
//! lines that are not `key=value` pairs are skipped, so a malformed descriptor
//! simply carries fewer keys.
//!
//! ```text
//! [General]
//! directURL=https://example.com/mod.zip
//! ```

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Section that carries source fields.
pub const GENERAL_SECTION: &str = "General";

/// Parsed key/value block of a source descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    fields: BTreeMap<String, String>,
}

impl Descriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse descriptor text. Never fails.
    pub fn parse(text: &str) -> Self {
        let mut fields = BTreeMap::new();
        let mut in_general = true;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_general = section.trim().eq_ignore_ascii_case(GENERAL_SECTION);
                continue;
            }

            if !in_general {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                fields.insert(key.to_string(), value.trim().to_string());
            }
        }

        Self { fields }
    }

    /// Look up a field. Key names are matched exactly.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Display for Descriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(f, "[{}]", GENERAL_SECTION)?;
        for (key, value) in &self.fields {
            writeln!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Descriptor {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut descriptor = Descriptor::new();
        for (k, v) in iter {
            descriptor.insert(k, v);
        }
        descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_general_section() {
        let d = Descriptor::parse("[General]\ndirectURL = https://host/mod.zip\n");
        assert_eq!(d.get("directURL"), Some("https://host/mod.zip"));
    }

    #[test]
    fn keys_before_any_section_are_general() {
        let d = Descriptor::parse("directURL=https://host/a.zip");
        assert_eq!(d.get("directURL"), Some("https://host/a.zip"));
    }

    #[test]
    fn other_sections_are_ignored() {
        let d = Descriptor::parse("[Other]\ndirectURL=https://nope\n[General]\nname=x\n");
        assert_eq!(d.get("directURL"), None);
        assert_eq!(d.get("name"), Some("x"));
    }

    #[test]
    fn garbage_is_skipped_not_rejected() {
        let d = Descriptor::parse("[[[\n=value\nno equals here\n; comment\nk=v=w\n");
        assert_eq!(d.get("k"), Some("v=w"));
        assert_eq!(d.iter().count(), 1);
    }

    #[test]
    fn empty_values_read_as_absent() {
        let d = Descriptor::parse("[General]\ndirectURL=\n");
        assert_eq!(d.get("directURL"), None);
    }

    #[test]
    fn display_round_trips() {
        let d = Descriptor::new()
            .with("directURL", "https://host/mod.zip")
            .with("directURLHeaders", "Cookie: a=b");
        assert_eq!(Descriptor::parse(&d.to_string()), d);
    }
}
