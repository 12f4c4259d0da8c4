use crate::config::IniOptions;
use crate::encoding::{EncodingDetection, TextEncoding, detect_encoding_from_file};
use crate::errors::{Result, require_key, require_section, require_single_line};
use crate::line_store::LineStore;
use crate::locator::{entry_name, find_section_and_key, header_name, is_header};
use crate::mutator::{self, Edit};
use std::path::Path;
use tracing::debug;

/// A handle on one INI file, edited in place.
///
/// The handle holds no parsed state. Every call reads the whole file, finds
/// the section and key it needs, applies at most one edit and writes the file
/// back, so edits made by other programs between calls are always seen.
///
/// Sections and keys are matched case-insensitively and the first section with
/// a given name always wins; duplicates further down the file are left alone.
#[derive(Debug, Clone)]
pub struct IniFile {
    store: LineStore,
    detection: EncodingDetection,
    options: IniOptions,
}

impl IniFile {
    /// Opens `path`, creating it if absent, and detects its encoding.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, IniOptions::default())
    }

    /// Opens `path` with a custom inline comment marker.
    pub fn open_with_comment(path: impl AsRef<Path>, comment_char: char) -> Result<Self> {
        Self::open_with_options(path, IniOptions::default().with_comment_char(comment_char))
    }

    /// Opens `path` with an explicit encoding instead of detecting one.
    pub fn open_with_encoding(path: impl AsRef<Path>, encoding: TextEncoding) -> Result<Self> {
        Self::open_with_options(path, IniOptions::default().with_encoding(encoding))
    }

    /// Opens `path` with both a custom comment marker and an explicit encoding.
    pub fn open_with_comment_and_encoding(
        path: impl AsRef<Path>,
        comment_char: char,
        encoding: TextEncoding,
    ) -> Result<Self> {
        Self::open_with_options(
            path,
            IniOptions::default()
                .with_comment_char(comment_char)
                .with_encoding(encoding),
        )
    }

    /// Opens `path` with the given options.
    ///
    /// The file is created empty if it does not exist and the path is resolved
    /// to an absolute one. Without an explicit encoding, the first
    /// `sample_size` bytes decide it; a failed detection falls back to the
    /// configured legacy encoding and is reported by
    /// [`encoding_detection`](Self::encoding_detection), not as an error.
    pub fn open_with_options(path: impl AsRef<Path>, options: IniOptions) -> Result<Self> {
        options.validate()?;
        let path = LineStore::create(path.as_ref())?;

        let detection = match options.explicit_encoding()? {
            Some(encoding) => EncodingDetection::explicit(encoding),
            None => detect_encoding_from_file(&path, options.sample_size, options.fallback()?),
        };

        debug!(
            path = %path.display(),
            encoding = %detection.encoding,
            source = ?detection.source,
            "opened ini file"
        );

        let store = LineStore::new(path, detection.encoding)
            .with_backup(options.create_backup)
            .with_cross_process_lock(options.cross_process_lock);

        Ok(Self {
            store,
            detection,
            options,
        })
    }

    /// The absolute path of the file.
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// The encoding every read and write of the file uses.
    pub fn encoding(&self) -> TextEncoding {
        self.detection.encoding
    }

    /// How the encoding was chosen at open time.
    pub fn encoding_detection(&self) -> EncodingDetection {
        self.detection
    }

    pub fn comment_char(&self) -> char {
        self.options.comment_char
    }

    /// The options this handle was opened with.
    pub fn options(&self) -> &IniOptions {
        &self.options
    }

    /// Reads the value of `key` in `section`.
    ///
    /// The value is the text after `=` up to the comment marker. When the key
    /// is missing and `default` is given, `key=default` is written to the file
    /// (into the existing section, or a new section appended at the end) and
    /// the default is returned. Without a default a missing key yields `None`.
    pub fn get_value(
        &self,
        section: &str,
        key: &str,
        default: Option<&str>,
    ) -> Result<Option<String>> {
        require_section(section)?;
        require_key(key)?;
        if let Some(default) = default {
            require_single_line("default value", default)?;
        }
        let (section, key) = (section.trim(), key.trim());
        let comment_char = self.comment_char();

        match default {
            None => {
                let lines = self.store.read()?;
                Ok(mutator::read_value(&lines, section, key, comment_char))
            }
            Some(_) => self.store.modify(|lines| {
                let lookup = mutator::read_or_insert(lines, section, key, default, comment_char);
                (lookup.value, lookup.inserted)
            }),
        }
    }

    /// Writes `key=value` into `section`, creating either as needed.
    ///
    /// An existing entry keeps its indentation, spelling of the key and inline
    /// comment; only the value changes. Returns whether the file was written.
    ///
    /// A section containing `]`, a key starting with `[` or containing `=`, and
    /// any line break are rejected with `InvalidArgument`.
    pub fn set_value(&self, section: &str, key: &str, value: &str) -> Result<bool> {
        require_section(section)?;
        require_key(key)?;
        require_single_line("value", value)?;
        self.edit(
            section.trim(),
            Edit::Set {
                key: key.trim(),
                value,
            },
        )
    }

    /// Removes `key` from `section`.
    ///
    /// If that leaves the header directly in front of another header (or at
    /// the end of the file), the header goes too. Returns `false` if there was
    /// nothing to remove.
    pub fn delete_key(&self, section: &str, key: &str) -> Result<bool> {
        require_section(section)?;
        require_key(key)?;
        self.edit(section.trim(), Edit::RemoveKey { key: key.trim() })
    }

    /// Removes the first `section` with its header and entries.
    ///
    /// Returns `false` if no such section exists.
    pub fn delete_section(&self, section: &str) -> Result<bool> {
        require_section(section)?;
        self.edit(section.trim(), Edit::RemoveSection)
    }

    /// Deletes every section, one rewrite per section.
    ///
    /// This is not atomic as a batch: a failure part way leaves the sections
    /// deleted so far gone. Returns `true` if every individual delete did.
    pub fn delete_all_sections(&self) -> Result<bool> {
        let mut all_deleted = true;
        for section in self.list_sections()? {
            all_deleted &= self.delete_section(&section)?;
        }
        Ok(all_deleted)
    }

    /// Lists the names of all section headers in file order, duplicates included.
    pub fn list_sections(&self) -> Result<Vec<String>> {
        let lines = self.store.read()?;
        Ok(lines
            .iter()
            .filter_map(|line| header_name(line))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Lists the key names of the first `section`, in file order.
    ///
    /// A missing section yields an empty list.
    pub fn list_keys(&self, section: &str) -> Result<Vec<String>> {
        require_section(section)?;
        let lines = self.store.read()?;
        let Some(section_index) = find_section_and_key(section.trim(), None, &lines).section
        else {
            return Ok(Vec::new());
        };

        Ok(lines[section_index + 1..]
            .iter()
            .take_while(|line| !is_header(line))
            .filter_map(|line| entry_name(line))
            .map(str::to_string)
            .collect())
    }

    /// Removes every line that has none of `[`, `]`, `=` or the comment marker.
    ///
    /// Returns the number of removed lines; the file is only rewritten when
    /// that is non-zero.
    pub fn delete_invalid_lines(&self) -> Result<usize> {
        let comment_char = self.comment_char();
        self.store.modify(|lines| {
            let before = lines.len();
            lines.retain(|line| line.contains(['[', ']', '=']) || line.contains(comment_char));
            let removed = before - lines.len();
            (removed, removed > 0)
        })
    }

    fn edit(&self, section: &str, edit: Edit<'_>) -> Result<bool> {
        let comment_char = self.comment_char();
        self.store.modify(|lines| {
            let changed = mutator::apply(lines, section, edit, comment_char);
            (changed, changed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::DetectionSource;
    use crate::errors::Error;
    use std::fs;
    use tempfile::TempDir;

    fn open_with(temp_dir: &TempDir, content: &str) -> IniFile {
        let path = temp_dir.path().join("test.ini");
        fs::write(&path, content).unwrap();
        IniFile::open(&path).unwrap()
    }

    fn contents(ini: &IniFile) -> String {
        fs::read_to_string(ini.path()).unwrap()
    }

    #[test]
    fn test_network_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let ini = IniFile::open(temp_dir.path().join("net.ini")).unwrap();

        assert!(ini.set_value("Net", "Port", "8080").unwrap());
        assert_eq!(contents(&ini), "[Net]\nPort=8080\n");

        assert!(ini.set_value("Net", "Port", "9090").unwrap());
        assert_eq!(ini.get_value("Net", "Port", None).unwrap().as_deref(), Some("9090"));

        assert!(ini.delete_section("Net").unwrap());
        assert!(ini.list_sections().unwrap().is_empty());
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(&temp_dir, "[Other]\na=1\n");

        for value in ["plain", "", "  padded", "with = equals", "x;y", "\u{e9}t\u{e9}"] {
            ini.set_value("Section", "Key", value).unwrap();
            assert_eq!(ini.get_value("Section", "Key", None).unwrap().as_deref(), Some(value));
        }
        assert_eq!(ini.list_keys("Section").unwrap(), vec!["Key"]);
    }

    #[test]
    fn test_fresh_section_has_one_header_and_key() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(&temp_dir, "");

        ini.set_value("S", "K", "V").unwrap();
        assert_eq!(ini.list_sections().unwrap(), vec!["S"]);
        assert_eq!(ini.list_keys("S").unwrap(), vec!["K"]);
    }

    #[test]
    fn test_delete_only_key_removes_section() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(&temp_dir, "[A]\nx=1\n[B]\ny=2\n");

        assert!(ini.delete_key("A", "x").unwrap());
        assert_eq!(ini.list_sections().unwrap(), vec!["B"]);
        assert!(!ini.delete_key("A", "x").unwrap());
    }

    #[test]
    fn test_default_is_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(&temp_dir, "[A]\nx=1\n");

        assert_eq!(ini.get_value("A", "y", Some("D")).unwrap().as_deref(), Some("D"));
        assert_eq!(ini.get_value("A", "y", None).unwrap().as_deref(), Some("D"));
        assert_eq!(ini.get_value("New", "z", Some("7")).unwrap().as_deref(), Some("7"));
        assert_eq!(contents(&ini), "[A]\ny=D\nx=1\n\n[New]\nz=7\n");
        assert_eq!(ini.get_value("A", "missing", None).unwrap(), None);
    }

    #[test]
    fn test_comment_preserved_on_replace() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(&temp_dir, "[S]\nx=1 #keep\n");

        ini.set_value("S", "x", "2").unwrap();
        assert_eq!(contents(&ini), "[S]\nx=2 #keep\n");
        assert_eq!(ini.get_value("S", "x", None).unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_custom_comment_marker() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("semi.ini");
        fs::write(&path, "[S]\nurl=http://h/#frag ; note\n").unwrap();
        let ini = IniFile::open_with_comment(&path, ';').unwrap();

        assert_eq!(
            ini.get_value("S", "url", None).unwrap().as_deref(),
            Some("http://h/#frag")
        );
        assert_eq!(ini.comment_char(), ';');
    }

    #[test]
    fn test_invalid_arguments() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(&temp_dir, "[A]\nx=1\n");

        assert!(matches!(ini.get_value(" ", "x", None), Err(Error::InvalidArgument(_))));
        assert!(matches!(ini.get_value("A", "", None), Err(Error::InvalidArgument(_))));
        assert!(matches!(ini.set_value("A", "\t", "v"), Err(Error::InvalidArgument(_))));
        assert!(matches!(ini.delete_section(""), Err(Error::InvalidArgument(_))));
        assert_eq!(contents(&ini), "[A]\nx=1\n");
    }

    #[test]
    fn test_unwritable_names_and_values_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(&temp_dir, "[A]\nx=1\n");

        assert!(matches!(ini.set_value("A]B", "k", "v"), Err(Error::InvalidArgument(_))));
        assert!(matches!(ini.set_value("A", "[k", "v"), Err(Error::InvalidArgument(_))));
        assert!(matches!(ini.set_value("A", "k=j", "v"), Err(Error::InvalidArgument(_))));
        assert!(matches!(ini.set_value("A", "x", "1\n[B]"), Err(Error::InvalidArgument(_))));
        assert!(matches!(ini.set_value("A", "x", "1\r"), Err(Error::InvalidArgument(_))));
        assert!(matches!(ini.set_value("A\nB", "k", "v"), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            ini.get_value("A", "y", Some("d\ny=2")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(ini.delete_key("A", "[x"), Err(Error::InvalidArgument(_))));
        assert!(matches!(ini.list_keys("A]"), Err(Error::InvalidArgument(_))));
        assert_eq!(contents(&ini), "[A]\nx=1\n");
    }

    #[test]
    fn test_lossy_decode_is_never_written_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("late.ini");
        let mut original = b"[A]\nx=1\n".to_vec();
        original.extend(std::iter::repeat_n(b';', 4100));
        original.extend_from_slice(b"\nname=Jos\xE9\n");
        fs::write(&path, &original).unwrap();

        // The invalid byte lies past the detection sample
        let ini = IniFile::open(&path).unwrap();
        assert_eq!(ini.encoding(), TextEncoding::Utf8);
        assert_eq!(ini.get_value("A", "x", None).unwrap().as_deref(), Some("1"));

        assert!(matches!(ini.set_value("A", "x", "2"), Err(Error::LossyDecode { .. })));
        assert!(matches!(ini.get_value("A", "y", Some("d")), Err(Error::LossyDecode { .. })));
        assert!(ini.delete_invalid_lines().is_err());
        assert_eq!(fs::read(&path).unwrap(), original);
    }

    #[test]
    fn test_list_sections_and_keys() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(
            &temp_dir,
            "; header comment\n[A]\nx=1\n y = 2\nnoise\n[]\n[B]\n[a]\nz=3\n",
        );

        assert_eq!(ini.list_sections().unwrap(), vec!["A", "B", "a"]);
        assert_eq!(ini.list_keys("a").unwrap(), vec!["x", "y"]);
        assert!(ini.list_keys("B").unwrap().is_empty());
        assert!(ini.list_keys("Missing").unwrap().is_empty());
    }

    #[test]
    fn test_delete_all_sections() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(&temp_dir, "[A]\nx=1\n\n[B]\ny=2\n[A]\nz=3\n");

        assert!(ini.delete_all_sections().unwrap());
        assert!(ini.list_sections().unwrap().is_empty());
        assert!(ini.delete_all_sections().unwrap());
    }

    #[test]
    fn test_delete_invalid_lines() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(&temp_dir, "garbage\n[A]\n\nx=1\n# note\nstray text\n");

        assert_eq!(ini.delete_invalid_lines().unwrap(), 3);
        assert_eq!(contents(&ini), "[A]\nx=1\n# note\n");
        assert_eq!(ini.delete_invalid_lines().unwrap(), 0);
    }

    #[test]
    fn test_external_edits_are_seen() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(&temp_dir, "[A]\nx=1\n");

        fs::write(ini.path(), "[A]\nx=changed\n").unwrap();
        assert_eq!(ini.get_value("A", "x", None).unwrap().as_deref(), Some("changed"));
    }

    #[test]
    fn test_bom_file_stays_signed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bom.ini");
        fs::write(&path, b"\xEF\xBB\xBF[A]\r\nx=1\r\n").unwrap();

        let ini = IniFile::open(&path).unwrap();
        assert_eq!(ini.encoding(), TextEncoding::Utf8Bom);
        assert_eq!(ini.encoding_detection().source, DetectionSource::ByteOrderMark);
        assert_eq!(ini.list_sections().unwrap(), vec!["A"]);

        ini.set_value("A", "x", "2").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"\xEF\xBB\xBF[A]\r\nx=2\r\n");
    }

    #[test]
    fn test_ascii_file_is_utf8() {
        let temp_dir = TempDir::new().unwrap();
        let ini = open_with(&temp_dir, "[A]\nx=1\n");
        assert_eq!(ini.encoding(), TextEncoding::Utf8);
        assert!(!ini.encoding_detection().used_fallback());
    }

    #[test]
    fn test_legacy_fallback_is_observable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("latin.ini");
        fs::write(&path, b"[A]\nname=Jos\xE9\n").unwrap();

        let ini = IniFile::open(&path).unwrap();
        assert!(ini.encoding_detection().used_fallback());
        assert_eq!(ini.get_value("A", "name", None).unwrap().as_deref(), Some("Jos\u{e9}"));

        ini.set_value("A", "name", "Ren\u{e9}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"[A]\nname=Ren\xE9\n");
    }

    #[test]
    fn test_explicit_encoding() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wide.ini");
        let ini = IniFile::open_with_comment_and_encoding(&path, ';', TextEncoding::Utf16Be).unwrap();

        assert_eq!(ini.encoding_detection().source, DetectionSource::Explicit);
        ini.set_value("A", "k", "v").unwrap();

        let reopened = IniFile::open(&path).unwrap();
        assert_eq!(reopened.encoding(), TextEncoding::Utf16Be);
        assert_eq!(reopened.get_value("a", "K", None).unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_handles_share_lock_per_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shared.ini");
        let first = IniFile::open(&path).unwrap();
        let second = IniFile::open(&path).unwrap();

        let handles: Vec<_> = [first, second]
            .into_iter()
            .enumerate()
            .map(|(i, ini)| {
                std::thread::spawn(move || {
                    for j in 0..20 {
                        ini.set_value("S", &format!("k{i}_{j}"), "v").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let ini = IniFile::open(&path).unwrap();
        assert_eq!(ini.list_keys("S").unwrap().len(), 40);
        assert_eq!(ini.list_sections().unwrap(), vec!["S"]);
    }
}
