use crate::encoding::{self, TextEncoding};
use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Per-handle configuration of an [`IniFile`](crate::IniFile).
///
/// Every field has a default, so an options file only needs the fields it
/// changes:
///
/// ```yaml
/// comment_char: ";"
/// encoding: utf-16le
/// create_backup: true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IniOptions {
    /// The marker that starts an inline comment.
    pub comment_char: char,
    /// An explicit encoding label. `None` detects the encoding at open time.
    pub encoding: Option<String>,
    /// The label of the legacy encoding used when the file is not UTF-8.
    pub fallback_encoding: String,
    /// Number of leading bytes inspected by the encoding detector.
    pub sample_size: usize,
    /// If `true`, a `.bak` copy of the file is made before every rewrite.
    pub create_backup: bool,
    /// If `true`, an advisory lock on `<file>.lock` serializes access across processes.
    pub cross_process_lock: bool,
}

impl Default for IniOptions {
    fn default() -> Self {
        Self {
            comment_char: '#',
            encoding: None,
            fallback_encoding: encoding::default_fallback().name().to_string(),
            sample_size: encoding::DEFAULT_SAMPLE_SIZE,
            create_backup: false,
            cross_process_lock: false,
        }
    }
}

impl IniOptions {
    /// Replaces the inline comment marker.
    pub fn with_comment_char(mut self, comment_char: char) -> Self {
        self.comment_char = comment_char;
        self
    }

    /// Fixes the encoding instead of detecting it at open time.
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = Some(encoding.label().to_string());
        self
    }

    /// Checks that the options describe a usable configuration.
    ///
    /// The comment marker may not be whitespace or one of `[`, `]` and `=`,
    /// since those characters already carry meaning on every line.
    pub fn validate(&self) -> Result<()> {
        if self.comment_char.is_whitespace() || matches!(self.comment_char, '[' | ']' | '=') {
            return Err(Error::Config(format!(
                "comment marker {:?} is not allowed",
                self.comment_char
            )));
        }
        if self.sample_size == 0 {
            return Err("sample_size must be greater than zero".into());
        }
        self.explicit_encoding()?;
        self.fallback()?;
        Ok(())
    }

    /// The encoding named by `encoding`, if any.
    pub fn explicit_encoding(&self) -> Result<Option<TextEncoding>> {
        self.encoding
            .as_deref()
            .map(TextEncoding::from_label)
            .transpose()
    }

    /// The legacy fallback encoding named by `fallback_encoding`.
    ///
    /// Only single- or multi-byte encodings qualify; a UTF label is rejected.
    pub fn fallback(&self) -> Result<&'static encoding_rs::Encoding> {
        match TextEncoding::from_label(&self.fallback_encoding)? {
            TextEncoding::Legacy(encoding) => Ok(encoding),
            other => Err(Error::Config(format!(
                "fallback encoding must be a legacy encoding, got {other}"
            ))),
        }
    }
}

/// A utility for loading [`IniOptions`] from disk.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `IniOptions` from a YAML or JSON file, chosen by extension.
    ///
    /// Files ending in `.json` are read as JSON; everything else as YAML.
    /// The loaded options are validated before they are returned.
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the options file.
    pub fn load_options(path: &Path) -> Result<IniOptions> {
        let file = File::open(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let options: IniOptions = if is_json {
            serde_json::from_reader(file)?
        } else {
            serde_yaml::from_reader(file)?
        };
        options.validate()?;
        Ok(options)
    }
}
