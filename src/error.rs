use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors returned by the parser and loader.
///
/// Messages carry positions and key names only, never the contents of the
/// offending line.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("invalid UTF-8 input: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),
    #[error("required keys are missing or empty: {}", .keys.join(", "))]
    MissingKeys { keys: Vec<String> },
    #[error("`{key}` cannot be set in the process environment")]
    UnsettableVariable { key: String },
    #[error("config file {} does not exist", .path.display())]
    ConfigNotFound { path: PathBuf },
    #[error("invalid config{}: {source}", config_location(.path))]
    InvalidConfig {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
    #[error("environment `{environment}` is not defined in config{}", config_location(.path))]
    UnknownEnvironment {
        environment: String,
        path: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at {}line {line}, column {column}: {kind}", location_prefix(.path))]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub kind: ParseErrorKind,
    pub path: Option<PathBuf>,
}

impl ParseError {
    pub(crate) fn new(line: u32, column: u32, kind: ParseErrorKind) -> Self {
        Self {
            line,
            column,
            kind,
            path: None,
        }
    }

    pub(crate) fn with_path(mut self, path: Option<&Path>) -> Self {
        self.path = path.map(Path::to_path_buf);
        self
    }
}

fn location_prefix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!("{}: ", path.display()),
        None => String::new(),
    }
}

fn config_location(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" {}", path.display()),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A non-blank, non-comment line is not of the form `KEY=value`.
    MalformedEntry,
    /// A quoted value reached end of input without its closing quote.
    UnterminatedQuote,
    /// The key failed [`KeyParsingMode::Strict`](crate::KeyParsingMode::Strict) validation.
    InvalidKey,
}

impl Display for ParseErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedEntry => write!(f, "malformed entry, expected `KEY=value`"),
            Self::UnterminatedQuote => write!(f, "unterminated quote"),
            Self::InvalidKey => write!(f, "invalid key"),
        }
    }
}
