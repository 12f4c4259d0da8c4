use tracing::trace;

/// Line positions of a section header and of a key inside that section.
///
/// `key` is only ever `Some` when `section` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub section: Option<usize>,
    pub key: Option<usize>,
}

/// Returns the trimmed name of a section header line.
///
/// A header is any line that, after leading whitespace, starts with `[` and
/// contains a `]`. Text after the first `]` is ignored.
pub fn header_name(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('[')?;
    let end = rest.find(']')?;
    Some(rest[..end].trim())
}

/// Whether `line` is a section header as recognized by [`header_name`].
pub fn is_header(line: &str) -> bool {
    header_name(line).is_some()
}

/// Case-insensitive name comparison used for both sections and keys.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.chars().count() == b.chars().count()
        && a.chars().zip(b.chars()).all(|(x, y)| chars_equal(x, y))
}

fn chars_equal(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

/// Byte length of the part of `text` matched by a case-insensitive `prefix`.
fn prefix_len_ignore_case(text: &str, prefix: &str) -> Option<usize> {
    let mut chars = text.char_indices();
    for expected in prefix.chars() {
        let (_, actual) = chars.next()?;
        if !chars_equal(expected, actual) {
            return None;
        }
    }
    Some(chars.next().map_or(text.len(), |(idx, _)| idx))
}

/// Byte offset of the `=` that belongs to `key` when `line` is an entry for it.
///
/// Only whitespace may sit between the key text and the `=`, so `key2=` is
/// not an entry for `key`.
pub fn key_separator(line: &str, key: &str) -> Option<usize> {
    let indent = line.len() - line.trim_start().len();
    let key_end = indent + prefix_len_ignore_case(&line[indent..], key)?;
    let separator = key_end + line[key_end..].find('=')?;
    line[key_end..separator]
        .trim()
        .is_empty()
        .then_some(separator)
}

/// The value of an entry line: the text after `separator`, cut at the comment marker.
///
/// Whitespace directly in front of the marker is not part of the value.
pub fn entry_value(line: &str, separator: usize, comment_char: char) -> &str {
    let rest = &line[separator + 1..];
    match rest.find(comment_char) {
        Some(pos) => rest[..pos].trim_end(),
        None => rest,
    }
}

/// The inline comment of an entry line, from the marker to end of line.
pub fn entry_comment(line: &str, separator: usize, comment_char: char) -> Option<&str> {
    let rest = &line[separator + 1..];
    rest.find(comment_char).map(|pos| &rest[pos..])
}

/// The trimmed key name of any line carrying an `=` after its first byte.
pub fn entry_name(line: &str) -> Option<&str> {
    line.find('=')
        .filter(|&pos| pos > 0)
        .map(|pos| line[..pos].trim())
}

/// Finds the first header named `section` and, within its contiguous run of
/// lines, the entry for `key`.
///
/// Scanning stops at the first header after the match, so a later header with
/// the same name and everything under it is never visible. With `key` set to
/// `None` the scan stops as soon as the header is found.
pub fn find_section_and_key(section: &str, key: Option<&str>, lines: &[String]) -> Location {
    let mut location = Location::default();

    for (idx, line) in lines.iter().enumerate() {
        if location.section.is_none() {
            if header_name(line).is_some_and(|name| names_equal(name, section)) {
                location.section = Some(idx);
                if key.is_none() {
                    break;
                }
            }
            continue;
        }

        if is_header(line) {
            break;
        }
        if let Some(key) = key {
            if key_separator(line, key).is_some() {
                location.key = Some(idx);
                break;
            }
        }
    }

    trace!(section, ?key, ?location, "located");
    location
}

/// Index of the first header after `section_index`, if any.
pub fn next_header(lines: &[String], section_index: usize) -> Option<usize> {
    lines
        .iter()
        .enumerate()
        .skip(section_index + 1)
        .find(|(_, line)| is_header(line))
        .map(|(idx, _)| idx)
}
