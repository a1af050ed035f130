//! Submission key parsing.
//!
//! Result objects are named `<study>-<date>-<id>-<name>.json` with a paired
//! `.jpeg` image under the same stem. The date segment is a fixed 8-digit
//! `YYYYMMDD`; the trailing name segment may itself contain dashes, so parsing
//! anchors on the first three dash-separated segments and joins the remainder.

use serde::Serialize;

/// Structured fields recovered from a submission object key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedKey {
    /// Study identifier the submission was captured under.
    pub study: String,
    /// Capture date as `YYYYMMDD`.
    pub date: String,
    /// Participant or device identifier.
    pub id: String,
    /// Free-form capture name (may contain dashes).
    pub name: String,
}

/// Outcome of parsing an object key.
///
/// Keys that do not match the expected shape are `Unparseable` rather than
/// partially filled with defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParse {
    Parsed(ParsedKey),
    Unparseable,
}

impl KeyParse {
    /// Parsed fields, if the key matched.
    pub fn parsed(self) -> Option<ParsedKey> {
        match self {
            KeyParse::Parsed(parsed) => Some(parsed),
            KeyParse::Unparseable => None,
        }
    }
}

/// Parse a submission object key (`.json` or `.jpeg`).
pub fn parse_key(key: &str) -> KeyParse {
    let stem = match key
        .strip_suffix(".json")
        .or_else(|| key.strip_suffix(".jpeg"))
    {
        Some(stem) => stem,
        None => return KeyParse::Unparseable,
    };

    let mut segments = stem.splitn(4, '-');
    let (study, date, id, name) = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(study), Some(date), Some(id), Some(name)) => (study, date, id, name),
        _ => return KeyParse::Unparseable,
    };

    if study.is_empty() || id.is_empty() || name.is_empty() {
        return KeyParse::Unparseable;
    }
    if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return KeyParse::Unparseable;
    }

    KeyParse::Parsed(ParsedKey {
        study: study.to_string(),
        date: date.to_string(),
        id: id.to_string(),
        name: name.to_string(),
    })
}
