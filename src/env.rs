use std::collections::BTreeMap;

use crate::error::Error;
use crate::model::{LoadReport, ParseResult};

/// Destination for loaded environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEnv {
    kind: TargetEnvKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TargetEnvKind {
    /// Apply entries to the current process environment.
    ///
    /// This writes through [`std::env::set_var`], which mutates global process
    /// state and is not thread-safe for concurrent environment access.
    Process,
    /// Apply entries to an in-memory map.
    Memory(BTreeMap<String, String>),
}

impl Default for TargetEnv {
    fn default() -> Self {
        Self::memory()
    }
}

impl TargetEnv {
    /// Create a process-environment target.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other threads concurrently read or write the
    /// process environment for the duration of operations that may mutate this
    /// target.
    pub unsafe fn process() -> Self {
        Self {
            kind: TargetEnvKind::Process,
        }
    }

    /// Create an empty in-memory target.
    pub fn memory() -> Self {
        Self::from_memory(BTreeMap::new())
    }

    pub fn from_memory(map: BTreeMap<String, String>) -> Self {
        Self {
            kind: TargetEnvKind::Memory(map),
        }
    }

    pub fn is_process(&self) -> bool {
        matches!(self.kind, TargetEnvKind::Process)
    }

    pub fn as_memory(&self) -> Option<&BTreeMap<String, String>> {
        match &self.kind {
            TargetEnvKind::Memory(map) => Some(map),
            TargetEnvKind::Process => None,
        }
    }

    pub fn into_memory(self) -> Option<BTreeMap<String, String>> {
        match self.kind {
            TargetEnvKind::Memory(map) => Some(map),
            TargetEnvKind::Process => None,
        }
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        match &self.kind {
            TargetEnvKind::Process => std::env::var_os(key).is_some(),
            TargetEnvKind::Memory(map) => map.contains_key(key),
        }
    }

    pub(crate) fn get_var(&self, key: &str) -> Option<String> {
        match &self.kind {
            TargetEnvKind::Process => {
                std::env::var_os(key).map(|value| value.to_string_lossy().into_owned())
            }
            TargetEnvKind::Memory(map) => map.get(key).cloned(),
        }
    }

    fn set_var(&mut self, key: &str, value: &str) {
        match &mut self.kind {
            // SAFETY: `TargetEnv::process` is unsafe and its caller promised
            // exclusive access to the process environment.
            TargetEnvKind::Process => unsafe { std::env::set_var(key, value) },
            TargetEnvKind::Memory(map) => {
                map.insert(key.to_owned(), value.to_owned());
            }
        }
    }
}

/// Whether a pair can be stored in a process environment without panicking.
pub fn is_settable(key: &str, value: &str) -> bool {
    !key.is_empty() && !key.contains(['=', '\0']) && !value.contains('\0')
}

/// Write every parsed entry into `target`.
///
/// This is the only place variables are written. Keys that already exist are
/// left alone unless `override_existing` is set. For a process target the
/// whole result is checked with [`is_settable`] before anything is written.
pub fn apply(
    result: &ParseResult,
    target: &mut TargetEnv,
    override_existing: bool,
) -> Result<LoadReport, Error> {
    if target.is_process()
        && let Some(entry) = result
            .iter()
            .find(|entry| !is_settable(&entry.key, &entry.value))
    {
        return Err(Error::UnsettableVariable {
            key: entry.key.clone(),
        });
    }

    let mut report = LoadReport::default();
    for entry in result {
        if !override_existing && target.contains_key(&entry.key) {
            report.skipped_existing += 1;
            tracing::warn!(key = %entry.key, "key is already defined, skipping");
            continue;
        }

        target.set_var(&entry.key, &entry.value);
        report.loaded += 1;
    }

    Ok(report)
}
