use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::PathBuf;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// A parsed `KEY=VALUE` entry from a `.env` file or input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
    pub source: Option<PathBuf>,
    /// Line of the key, 1-based.
    pub line: u32,
    pub style: ValueStyle,
    /// Byte ranges of `value` that came from single-quoted segments.
    /// Substitution never expands text inside them.
    pub literal_spans: Vec<Range<usize>>,
}

/// How a value was written in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueStyle {
    #[default]
    Unquoted,
    SingleQuoted,
    DoubleQuoted,
    /// Two or more adjacent quoted segments joined together.
    Concatenated,
}

/// Ordered mapping of keys to entries produced by one parse call.
///
/// Keys are unique. When a key repeats, the last value wins and the entry
/// keeps the position of the key's first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParseResult {
    entries: Vec<Entry>,
    by_key: HashMap<String, usize>,
}

impl ParseResult {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, entry: Entry) {
        if let Some(existing_idx) = self.by_key.get(&entry.key).copied() {
            self.entries[existing_idx] = entry;
        } else {
            self.by_key.insert(entry.key.clone(), self.entries.len());
            self.entries.push(entry);
        }
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [Entry] {
        &mut self.entries
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_entry(key).map(|entry| entry.value.as_str())
    }

    pub fn get_entry(&self, key: &str) -> Option<&Entry> {
        self.by_key.get(key).map(|idx| &self.entries[*idx])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.key.as_str())
    }

    /// Copy the key/value pairs into a sorted map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect()
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }
}

impl IntoIterator for ParseResult {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a ParseResult {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl Serialize for ParseResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.key, &entry.value)?;
        }
        map.end()
    }
}

/// Summary of the load operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped_existing: usize,
    pub files_read: usize,
}

/// Variable expansion behavior for loader values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubstitutionMode {
    /// Keep values as parsed with no expansion.
    #[default]
    Disabled,
    /// Expand `$VAR` and `${VAR}` placeholders outside single quotes.
    Expand,
}

/// Key validation behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyParsingMode {
    /// Any non-empty key is accepted.
    #[default]
    Lenient,
    /// Keys must match `[A-Za-z0-9_.-]+`.
    Strict,
}

/// Parser switches. Every extension is off by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseOptions {
    pub key_parsing_mode: KeyParsingMode,
    /// Join `"a" "b"` on one line into `ab`.
    pub concat_adjacent_quotes: bool,
    /// Continue unquoted values whose line ends in `\` onto the next line.
    pub line_continuation: bool,
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_parsing_mode(mut self, key_parsing_mode: KeyParsingMode) -> Self {
        self.key_parsing_mode = key_parsing_mode;
        self
    }

    pub fn concat_adjacent_quotes(mut self, enabled: bool) -> Self {
        self.concat_adjacent_quotes = enabled;
        self
    }

    pub fn line_continuation(mut self, enabled: bool) -> Self {
        self.line_continuation = enabled;
        self
    }
}
