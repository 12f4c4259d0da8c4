//! Single-action edits on the line sequence of an INI file.
//!
//! Every function here works on lines already read into memory and reports
//! whether it changed them. Persisting the result is left to the caller.

use crate::locator::{
    entry_comment, entry_value, find_section_and_key, is_header, key_separator, next_header,
};

/// One write-path action against a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit<'a> {
    /// Insert or replace `key=value`.
    Set { key: &'a str, value: &'a str },
    /// Remove the entry for `key`, and its header if the section becomes empty.
    RemoveKey { key: &'a str },
    /// Remove the header and every line belonging to the section.
    RemoveSection,
}

impl<'a> Edit<'a> {
    fn key(&self) -> Option<&'a str> {
        match *self {
            Edit::Set { key, .. } | Edit::RemoveKey { key } => Some(key),
            Edit::RemoveSection => None,
        }
    }
}

/// The outcome of a read that may have persisted a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub value: Option<String>,
    /// `true` when the default was written into the lines.
    pub inserted: bool,
}

/// Formats a fresh entry line.
pub fn entry_line(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

/// Reads the value of `key` in the first `section`.
pub fn read_value(
    lines: &[String],
    section: &str,
    key: &str,
    comment_char: char,
) -> Option<String> {
    let location = find_section_and_key(section, Some(key), lines);
    let line = &lines[location.key?];
    let separator = key_separator(line, key)?;
    Some(entry_value(line, separator, comment_char).to_string())
}

/// Reads the value of `key`, writing `default` into the lines when it is missing.
///
/// A missing key in an existing section is inserted right after the header;
/// a missing section is appended at the end with the key as its only entry.
pub fn read_or_insert(
    lines: &mut Vec<String>,
    section: &str,
    key: &str,
    default: Option<&str>,
    comment_char: char,
) -> Lookup {
    if let Some(value) = read_value(lines, section, key, comment_char) {
        return Lookup {
            value: Some(value),
            inserted: false,
        };
    }

    let Some(default) = default else {
        return Lookup {
            value: None,
            inserted: false,
        };
    };

    match find_section_and_key(section, None, lines).section {
        Some(section_index) => lines.insert(section_index + 1, entry_line(key, default)),
        None => append_section(lines, section, key, default),
    }

    Lookup {
        value: Some(default.to_string()),
        inserted: true,
    }
}

/// Applies one edit to the first `section`, returning whether lines changed.
///
/// Removing something that is not there is a no-op and returns `false`.
pub fn apply(lines: &mut Vec<String>, section: &str, edit: Edit<'_>, comment_char: char) -> bool {
    let location = find_section_and_key(section, edit.key(), lines);

    let Some(section_index) = location.section else {
        return match edit {
            Edit::Set { key, value } => {
                append_section(lines, section, key, value);
                true
            }
            Edit::RemoveKey { .. } | Edit::RemoveSection => false,
        };
    };

    match (edit, location.key) {
        (Edit::RemoveSection, _) => {
            let end = section_end(lines, section_index);
            lines.drain(section_index..end);
            true
        }
        (Edit::RemoveKey { .. }, None) => false,
        (Edit::Set { key, value }, None) => {
            lines.insert(section_index + 1, entry_line(key, value));
            true
        }
        (Edit::RemoveKey { .. }, Some(key_index)) => {
            lines.remove(key_index);
            let emptied = lines
                .get(section_index + 1)
                .is_none_or(|next| is_header(next));
            if emptied {
                lines.remove(section_index);
            }
            true
        }
        (Edit::Set { key, value }, Some(key_index)) => {
            lines[key_index] = replace_value(&lines[key_index], key, value, comment_char);
            true
        }
    }
}

/// Appends `[section]` and `key=value`, separated from earlier content by one blank line.
fn append_section(lines: &mut Vec<String>, section: &str, key: &str, value: &str) {
    if lines.last().is_some_and(|last| !last.trim().is_empty()) {
        lines.push(String::new());
    }
    lines.push(format!("[{section}]"));
    lines.push(entry_line(key, value));
}

/// Exclusive end of the section starting at `section_index`.
///
/// The next header bounds the section. The last section ends after its last
/// line containing `=`, so trailing comments and blanks at end of file stay.
fn section_end(lines: &[String], section_index: usize) -> usize {
    next_header(lines, section_index).unwrap_or_else(|| {
        lines[section_index + 1..]
            .iter()
            .rposition(|line| line.contains('='))
            .map_or(section_index + 1, |pos| section_index + 1 + pos + 1)
    })
}

/// Rewrites an entry line with a new value, keeping everything up to the `=`
/// and any inline comment.
fn replace_value(line: &str, key: &str, value: &str, comment_char: char) -> String {
    let Some(separator) = key_separator(line, key) else {
        return entry_line(key, value);
    };
    let mut updated = format!("{}{value}", &line[..=separator]);
    if let Some(comment) = entry_comment(line, separator, comment_char) {
        updated.push(' ');
        updated.push_str(comment);
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_set_appends_to_empty_file() {
        let mut lines = Vec::new();
        assert!(apply(&mut lines, "Net", Edit::Set { key: "Port", value: "8080" }, '#'));
        assert_eq!(lines, vec!["[Net]", "Port=8080"]);
    }

    #[test]
    fn test_set_appends_section_after_blank_separator() {
        let mut lines = lines("[A]\nx=1");
        apply(&mut lines, "B", Edit::Set { key: "y", value: "2" }, '#');
        assert_eq!(lines, vec!["[A]", "x=1", "", "[B]", "y=2"]);
    }

    #[test]
    fn test_set_inserts_after_header() {
        let mut lines = lines("[A]\nx=1\n[B]");
        apply(&mut lines, "a", Edit::Set { key: "y", value: "2" }, '#');
        assert_eq!(lines, vec!["[A]", "y=2", "x=1", "[B]"]);
    }

    #[test]
    fn test_set_keeps_comment_and_prefix() {
        let mut lines = lines("[S]\nx=1 #keep\n  Y = old ; note");
        apply(&mut lines, "S", Edit::Set { key: "x", value: "2" }, '#');
        apply(&mut lines, "S", Edit::Set { key: "y", value: "new" }, ';');
        assert_eq!(lines, vec!["[S]", "x=2 #keep", "  Y =new ; note"]);
    }

    #[test]
    fn test_remove_last_key_drops_header_before_next_header() {
        let mut lines = lines("[A]\nx=1\n[B]\ny=2");
        assert!(apply(&mut lines, "A", Edit::RemoveKey { key: "x" }, '#'));
        assert_eq!(lines, vec!["[B]", "y=2"]);
    }

    #[test]
    fn test_remove_last_key_drops_header_at_end_of_file() {
        let mut lines = lines("[A]\nx=1");
        assert!(apply(&mut lines, "A", Edit::RemoveKey { key: "x" }, '#'));
        assert!(lines.is_empty());
    }

    #[test]
    fn test_remove_last_key_keeps_header_before_blank() {
        let mut lines = lines("[A]\nx=1\n\n[B]");
        apply(&mut lines, "A", Edit::RemoveKey { key: "x" }, '#');
        assert_eq!(lines, vec!["[A]", "", "[B]"]);
    }

    #[test]
    fn test_remove_key_keeps_siblings() {
        let mut lines = lines("[A]\nx=1\ny=2");
        apply(&mut lines, "A", Edit::RemoveKey { key: "x" }, '#');
        assert_eq!(lines, vec!["[A]", "y=2"]);
    }

    #[test]
    fn test_removals_of_missing_targets_are_noops() {
        let mut lines = lines("[A]\nx=1");
        assert!(!apply(&mut lines, "A", Edit::RemoveKey { key: "zz" }, '#'));
        assert!(!apply(&mut lines, "Q", Edit::RemoveKey { key: "x" }, '#'));
        assert!(!apply(&mut lines, "Q", Edit::RemoveSection, '#'));
        assert_eq!(lines, vec!["[A]", "x=1"]);
    }

    #[test]
    fn test_remove_section_up_to_next_header() {
        let mut lines = lines("[A]\nx=1\n; c\n\n[B]\ny=2");
        assert!(apply(&mut lines, "A", Edit::RemoveSection, '#'));
        assert_eq!(lines, vec!["[B]", "y=2"]);
    }

    #[test]
    fn test_remove_last_section_keeps_trailing_text() {
        let mut tail = lines("[A]\nx=1\n[B]\ny=2\n# tail\n");
        apply(&mut tail, "B", Edit::RemoveSection, '#');
        assert_eq!(tail, vec!["[A]", "x=1", "# tail"]);
    }

    #[test]
    fn test_remove_comment_only_section() {
        let mut comment_only = lines("[A]\n# only a comment");
        assert!(apply(&mut comment_only, "A", Edit::RemoveSection, '#'));
        assert_eq!(comment_only, vec!["# only a comment"]);
    }

    #[test]
    fn test_read_or_insert_persists_default() {
        let mut lines = lines("[A]\nx=1");
        let lookup = read_or_insert(&mut lines, "A", "y", Some("5"), '#');
        assert_eq!(lookup, Lookup { value: Some("5".into()), inserted: true });
        assert_eq!(lines, vec!["[A]", "y=5", "x=1"]);

        let lookup = read_or_insert(&mut lines, "C", "z", Some("9"), '#');
        assert!(lookup.inserted);
        assert_eq!(lines[3..], ["".to_string(), "[C]".into(), "z=9".into()]);

        let lookup = read_or_insert(&mut lines, "A", "missing", None, '#');
        assert_eq!(lookup, Lookup { value: None, inserted: false });
    }

    #[test]
    fn test_read_value_strips_comment() {
        let lines = lines("[S]\nx=1 #keep\nempty=");
        assert_eq!(read_value(&lines, "s", "X", '#'), Some("1".into()));
        assert_eq!(read_value(&lines, "S", "empty", '#'), Some(String::new()));
        assert_eq!(read_value(&lines, "S", "nope", '#'), None);
    }
}
