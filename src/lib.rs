//! `inisplice` is a library for reading and editing INI files in place.
//!
//! Edits are line splices: a lookup finds the section header and key line it
//! needs, one line is inserted, replaced or removed, and the file is written
//! back atomically. Everything else in the file, comments and blank lines
//! included, stays as it was. The main components are:
//!
//! - `IniFile`: the public handle with get/set/delete and listing operations.
//! - `locator`: finds section headers and key lines in a sequence of lines.
//! - `mutator`: applies a single insert, replace or delete to those lines.
//! - `line_store`: reads and atomically rewrites a file under a per-path lock.
//! - `encoding`: detects the file's text encoding from its byte-order-mark or
//!   a UTF-8 scan, and converts between bytes and text.
//! - `config`: per-handle options, optionally loaded from YAML or JSON.
//!
//! ```no_run
//! use inisplice::IniFile;
//!
//! let ini = IniFile::open("settings.ini")?;
//! ini.set_value("Net", "Port", "8080")?;
//! assert_eq!(ini.get_value("Net", "Port", None)?.as_deref(), Some("8080"));
//! # Ok::<(), inisplice::Error>(())
//! ```

pub mod config;
pub mod encoding;
pub mod errors;
pub mod ini_file;
pub mod line_store;
pub mod locator;
pub mod mutator;

// Re-export main types for easier access by library users.
pub use config::{ConfigLoader, IniOptions};
pub use encoding::{DetectionSource, EncodingDetection, TextEncoding};
pub use errors::{Error, Result};
pub use ini_file::IniFile;
