//! Parse and load `.env` files.
//!
//! [`parse_str`] turns text into an ordered [`ParseResult`] and never touches
//! the process environment. [`apply`] and [`EnvLoader::load`] write parsed
//! values into a [`TargetEnv`], which is an in-memory map unless the caller
//! opts into the process environment through the `unsafe`
//! [`TargetEnv::process`] constructor or the convenience loaders.
//!
//! [`EnvConfig`] reads named environments (file lists, required keys, a
//! command) from an `env.config.json` file.

mod config;
mod env;
mod error;
mod loader;
mod model;
mod parser;

pub use config::{CONFIG_FILE_NAME, EnvConfig};
pub use env::{TargetEnv, apply, is_settable};
pub use error::{Error, ParseError, ParseErrorKind};
pub use loader::{EnvLoader, dotenv, from_path, from_paths};
pub use model::{
    Entry, KeyParsingMode, LoadReport, ParseOptions, ParseResult, SubstitutionMode, ValueStyle,
};
pub use parser::{
    parse_bytes, parse_bytes_with, parse_reader, parse_reader_with, parse_str, parse_str_with,
};
