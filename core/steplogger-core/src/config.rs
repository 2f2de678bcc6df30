//! Flat key/value configuration store backed by a `config.ini` file.
//!
//! The file format is a small subset of Java-style properties:
//!
//! ```text
//! # comment
//! ! also a comment
//! counter=Start:a:b:c,Mid:d:e:f,End:g:h:i
//! ```
//!
//! The key ends at the first unescaped `=`, `:` or whitespace. Whitespace
//! before the value is skipped; trailing whitespace belongs to the value. A
//! line ending in an odd number of backslashes continues on the next line,
//! and `\\`, `\t`, `\n`, `\r`, `\f` and `\uXXXX` escapes are decoded.

use chrono::Local;
use fs_err as fs;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Key holding the comma-separated waypoint script.
pub const SCRIPT_KEY: &str = "counter";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the backing file and merges its entries into the in-memory map.
    ///
    /// On failure the map is left exactly as it was before the call.
    pub fn load(&mut self) -> Result<()> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CoreError::ConfigNotFound(self.path.clone()))
            }
            Err(err) => {
                return Err(CoreError::ConfigReadFailed {
                    path: self.path.clone(),
                    source: err,
                })
            }
        };

        let parsed = parse_properties(&contents);
        tracing::debug!(
            path = %self.path.display(),
            entries = parsed.len(),
            "Configuration loaded"
        );
        self.entries.extend(parsed);
        Ok(())
    }

    /// Writes every entry back to the backing file in key order.
    pub fn store(&self) -> Result<()> {
        let write_failed = |source: std::io::Error| CoreError::ConfigWriteFailed {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        let mut payload = format!("#{}\n", Local::now().format("%a %b %d %H:%M:%S %Z %Y"));
        for (key, value) in &self.entries {
            payload.push_str(&escape(key, true));
            payload.push('=');
            payload.push_str(&escape(value, false));
            payload.push('\n');
        }

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload).map_err(write_failed)?;
        fs::rename(&tmp_path, &self.path).map_err(write_failed)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_properties(contents: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    let mut lines = contents.lines();
    while let Some(raw) = lines.next() {
        let line = raw.trim_start();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let mut logical = line.to_string();
        while continues(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start()),
                None => break,
            }
        }

        let (key, value) = split_entry(&logical);
        entries.insert(unescape(key), unescape(value));
    }
    entries
}

fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|ch| *ch == '\\').count() % 2 == 1
}

fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    for (index, ch) in line.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '=' || ch == ':' || ch.is_whitespace() {
            key_end = index;
            break;
        }
    }

    let mut value = line[key_end..].trim_start();
    if let Some(rest) = value.strip_prefix(['=', ':']) {
        value = rest.trim_start();
    }
    (&line[..key_end], value)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{0c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Keys escape every character that would end them early or turn the line
/// into a comment. Values only need a leading space and control characters
/// escaped; separators inside a value are literal.
fn escape(raw: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for (index, ch) in raw.chars().enumerate() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{0c}' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' if is_key => {
                out.push('\\');
                out.push(ch);
            }
            ' ' if is_key || index == 0 => out.push_str("\\ "),
            _ => out.push(ch),
        }
    }
    out
}
