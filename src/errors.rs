use std::path::PathBuf;
use thiserror::Error;

/// The primary error type for all operations in the `inisplice` library.
///
/// Lookups that find nothing and deletes that have nothing to remove are not
/// errors; they surface as `Ok(None)` and `Ok(false)` respectively.
#[derive(Error, Debug)]
pub enum Error {
    /// A section, key or value cannot be written as a single INI line.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The file did not decode cleanly, so rewriting it would corrupt it.
    #[error("Refusing to rewrite {path}: malformed {encoding} input")]
    LossyDecode { path: PathBuf, encoding: String },

    /// An error related to file system I/O.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error related to persisting a temporary file over the target.
    #[error("Tempfile error: {0}")]
    TempFile(#[from] tempfile::PersistError),

    /// An error that occurred while parsing a YAML options file.
    #[error("Config parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An error that occurred while parsing a JSON options file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A general configuration-related error.
    #[error("Config error: {0}")]
    Config(String),
}

/// A convenient type alias for `Result<T, inisplice::errors::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Config(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Config(s.to_string())
    }
}

/// Rejects empty or whitespace-only names before any file access.
pub(crate) fn require_name(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!(
            "{what} name must not be empty"
        )));
    }
    Ok(())
}

/// Rejects text that would spill onto a second line.
pub(crate) fn require_single_line(what: &str, value: &str) -> Result<()> {
    if value.contains(['\n', '\r']) {
        return Err(Error::InvalidArgument(format!(
            "{what} must not contain a line break"
        )));
    }
    Ok(())
}

/// A section name must fit between `[` and the first `]` of its header.
pub(crate) fn require_section(section: &str) -> Result<()> {
    require_name("section", section)?;
    require_single_line("section name", section)?;
    if section.contains(']') {
        return Err(Error::InvalidArgument(format!(
            "section name {section:?} must not contain ']'"
        )));
    }
    Ok(())
}

/// A key line must not read back as a header, and its name ends at the first `=`.
pub(crate) fn require_key(key: &str) -> Result<()> {
    require_name("key", key)?;
    require_single_line("key name", key)?;
    if key.trim_start().starts_with('[') {
        return Err(Error::InvalidArgument(format!(
            "key name {key:?} must not start with '['"
        )));
    }
    if key.contains('=') {
        return Err(Error::InvalidArgument(format!(
            "key name {key:?} must not contain '='"
        )));
    }
    Ok(())
}
