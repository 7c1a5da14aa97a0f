use std::collections::HashMap;
use std::io::ErrorKind;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::env::{TargetEnv, apply};
use crate::error::Error;
use crate::model::{Entry, LoadReport, ParseOptions, ParseResult, SubstitutionMode};
use crate::parser::parse_str_with_source;

const DEFAULT_FILE: &str = ".env";

/// Load `.env` from the current working directory into the process environment.
///
/// # Safety
///
/// Same contract as [`TargetEnv::process`].
pub unsafe fn dotenv() -> Result<LoadReport, Error> {
    // SAFETY: forwarded to the caller.
    unsafe { from_path(DEFAULT_FILE) }
}

/// Load a `.env` file from a specific path into the process environment.
///
/// # Safety
///
/// Same contract as [`TargetEnv::process`].
pub unsafe fn from_path(path: impl AsRef<Path>) -> Result<LoadReport, Error> {
    // SAFETY: forwarded to the caller.
    let target = unsafe { TargetEnv::process() };
    EnvLoader::new().path(path).target(target).load()
}

/// Load multiple `.env` files into the process environment, later files
/// taking precedence.
///
/// # Safety
///
/// Same contract as [`TargetEnv::process`].
pub unsafe fn from_paths<I, P>(paths: I) -> Result<LoadReport, Error>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    // SAFETY: forwarded to the caller.
    let target = unsafe { TargetEnv::process() };
    EnvLoader::new().paths(paths).target(target).load()
}

/// Builder-style dotenv loader.
///
/// The default target is an empty in-memory map; pass
/// [`TargetEnv::process`] explicitly to write the real environment.
#[derive(Debug, Clone)]
pub struct EnvLoader {
    paths: Vec<PathBuf>,
    dir: Option<PathBuf>,
    required: bool,
    required_keys: Vec<String>,
    override_existing: bool,
    substitution_mode: SubstitutionMode,
    parse_options: ParseOptions,
    target: TargetEnv,
}

impl EnvLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.paths
            .extend(paths.into_iter().map(|path| path.as_ref().to_path_buf()));
        self
    }

    /// Base directory for relative paths.
    pub fn dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// When `false`, missing files are skipped instead of failing the load.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Keys that must end up defined with a non-empty value.
    pub fn required_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.required_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn override_existing(mut self, override_existing: bool) -> Self {
        self.override_existing = override_existing;
        self
    }

    pub fn substitution_mode(mut self, substitution_mode: SubstitutionMode) -> Self {
        self.substitution_mode = substitution_mode;
        self
    }

    pub fn parse_options(mut self, parse_options: ParseOptions) -> Self {
        self.parse_options = parse_options;
        self
    }

    pub fn target(mut self, target: TargetEnv) -> Self {
        self.target = target;
        self
    }

    pub fn target_env(&self) -> &TargetEnv {
        &self.target
    }

    pub fn into_target(self) -> TargetEnv {
        self.target
    }

    /// Read, merge and expand the configured files without touching the target.
    pub fn parse_only(&self) -> Result<ParseResult, Error> {
        self.collect().map(|(result, _)| result)
    }

    pub fn load(&mut self) -> Result<LoadReport, Error> {
        let (result, files_read) = self.collect()?;
        let mut report = apply(&result, &mut self.target, self.override_existing)?;
        report.files_read = files_read;

        tracing::debug!(
            loaded = report.loaded,
            skipped_existing = report.skipped_existing,
            files_read = report.files_read,
            "environment loaded"
        );
        Ok(report)
    }

    fn collect(&self) -> Result<(ParseResult, usize), Error> {
        let (mut result, files_read) = self.read_files()?;
        self.apply_substitution(&mut result);
        self.check_required_keys(&result)?;
        Ok((result, files_read))
    }

    fn read_files(&self) -> Result<(ParseResult, usize), Error> {
        let mut merged = ParseResult::default();
        let mut files_read = 0usize;

        for path in self.effective_paths() {
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound && !self.required => {
                    tracing::debug!(path = %path.display(), "env file not found, skipping");
                    continue;
                }
                Err(err) => return Err(Error::Io(err)),
            };
            files_read += 1;

            let content = std::str::from_utf8(&bytes)?;
            let parsed = parse_str_with_source(content, Some(&path), self.parse_options)?;
            tracing::debug!(path = %path.display(), entries = parsed.len(), "read env file");

            for entry in parsed {
                merged.insert(entry);
            }
        }

        Ok((merged, files_read))
    }

    fn apply_substitution(&self, result: &mut ParseResult) {
        if self.substitution_mode == SubstitutionMode::Disabled {
            return;
        }

        let mut resolver =
            SubstitutionResolver::new(result.iter(), &self.target, self.override_existing);
        for entry in result.entries_mut() {
            let resolved = resolver.resolve_entry(&entry.key);
            entry.value = resolved.text;
            entry.literal_spans = resolved.literal_spans;
        }
    }

    fn check_required_keys(&self, result: &ParseResult) -> Result<(), Error> {
        let missing: Vec<String> = self
            .required_keys
            .iter()
            .filter(|key| {
                let from_file = result.get(key).is_some_and(|value| !value.is_empty());
                let from_target = self
                    .target
                    .get_var(key)
                    .is_some_and(|value| !value.is_empty());
                !from_file && !from_target
            })
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingKeys { keys: missing })
        }
    }

    fn effective_paths(&self) -> Vec<PathBuf> {
        let paths = if self.paths.is_empty() {
            vec![PathBuf::from(DEFAULT_FILE)]
        } else {
            self.paths.clone()
        };

        match &self.dir {
            Some(dir) => paths.into_iter().map(|path| dir.join(path)).collect(),
            None => paths,
        }
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            dir: None,
            required: true,
            required_keys: Vec::new(),
            override_existing: false,
            substitution_mode: SubstitutionMode::Disabled,
            parse_options: ParseOptions::default(),
            target: TargetEnv::memory(),
        }
    }
}

/// A value together with the byte ranges that must stay unexpanded.
#[derive(Debug, Clone, Default)]
struct SpannedValue {
    text: String,
    literal_spans: Vec<Range<usize>>,
}

struct SubstitutionResolver<'a> {
    raw_values: HashMap<String, SpannedValue>,
    resolved_values: HashMap<String, SpannedValue>,
    target: &'a TargetEnv,
    override_existing: bool,
}

impl<'a> SubstitutionResolver<'a> {
    fn new<'e>(
        entries: impl Iterator<Item = &'e Entry>,
        target: &'a TargetEnv,
        override_existing: bool,
    ) -> Self {
        let raw_values = entries
            .map(|entry| {
                let raw = SpannedValue {
                    text: entry.value.clone(),
                    literal_spans: entry.literal_spans.clone(),
                };
                (entry.key.clone(), raw)
            })
            .collect();

        Self {
            raw_values,
            resolved_values: HashMap::new(),
            target,
            override_existing,
        }
    }

    fn resolve_entry(&mut self, key: &str) -> SpannedValue {
        self.resolve_key(key, &mut Vec::new())
    }

    /// Expand the file's own value for `key`, leaving literal spans as written.
    fn resolve_key(&mut self, key: &str, stack: &mut Vec<String>) -> SpannedValue {
        if let Some(existing) = self.resolved_values.get(key) {
            return existing.clone();
        }

        let Some(raw) = self.raw_values.get(key).cloned() else {
            return SpannedValue::default();
        };

        stack.push(key.to_owned());
        let mut resolved = SpannedValue::default();
        let mut cursor = 0usize;
        for span in &raw.literal_spans {
            let expanded = self.expand_text(key, &raw.text[cursor..span.start], stack);
            resolved.text.push_str(&expanded);
            let start = resolved.text.len();
            resolved.text.push_str(&raw.text[span.clone()]);
            resolved.literal_spans.push(start..resolved.text.len());
            cursor = span.end;
        }
        let expanded = self.expand_text(key, &raw.text[cursor..], stack);
        resolved.text.push_str(&expanded);
        stack.pop();

        self.resolved_values
            .insert(key.to_owned(), resolved.clone());
        resolved
    }

    fn expand_text(&mut self, owner: &str, text: &str, stack: &mut Vec<String>) -> String {
        expand_template(text, |name, token| {
            self.resolve_placeholder(owner, name, token, stack)
        })
    }

    fn resolve_placeholder(
        &mut self,
        owner: &str,
        name: &str,
        token: &str,
        stack: &mut Vec<String>,
    ) -> String {
        // Without override the target keeps its value, so references see it too.
        if !self.override_existing
            && let Some(existing) = self.target.get_var(name)
        {
            return existing;
        }

        if stack.iter().any(|item| item == name) {
            return token.to_owned();
        }

        if self.raw_values.contains_key(name) {
            return self.resolve_key(name, stack).text;
        }

        self.target.get_var(name).unwrap_or_else(|| {
            tracing::warn!(
                key = %owner,
                variable = %name,
                "unable to resolve interpolated variable, using an empty value"
            );
            String::new()
        })
    }
}

fn expand_template<F>(input: &str, mut resolve: F) -> String
where
    F: FnMut(&str, &str) -> String,
{
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0usize;
    let mut idx = 0usize;
    let bytes = input.as_bytes();

    while idx < bytes.len() {
        if bytes[idx] != b'$' {
            idx += 1;
            continue;
        }

        let Some((name_start, name_end, token_end)) = parse_placeholder(input, idx) else {
            idx += 1;
            continue;
        };

        let name = &input[name_start..name_end];
        let token = &input[idx..token_end];

        out.push_str(&input[cursor..idx]);
        out.push_str(&resolve(name, token));

        cursor = token_end;
        idx = token_end;
    }

    out.push_str(&input[cursor..]);
    out
}

/// Locate `${NAME}` or `$NAME` at `start`, returning the name span and the
/// end of the whole token.
fn parse_placeholder(input: &str, start: usize) -> Option<(usize, usize, usize)> {
    let bytes = input.as_bytes();
    if start + 1 >= bytes.len() {
        return None;
    }

    if bytes[start + 1] == b'{' {
        let name_start = start + 2;
        let name_end = name_start + input[name_start..].find('}')?;
        let name = &input[name_start..name_end];
        if name.is_empty() || !name.bytes().all(is_braced_var_char) {
            return None;
        }

        return Some((name_start, name_end, name_end + 1));
    }

    let name_start = start + 1;
    if !is_unbraced_var_start(bytes[name_start]) {
        return None;
    }

    let mut name_end = name_start + 1;
    while name_end < bytes.len() && is_unbraced_var_char(bytes[name_end]) {
        name_end += 1;
    }

    Some((name_start, name_end, name_end))
}

fn is_braced_var_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'.' || byte == b'-'
}

fn is_unbraced_var_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_unbraced_var_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}
