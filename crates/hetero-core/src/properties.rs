//! Hierarchical key/value configuration
//!
//! `Properties` carries mode descriptors, kernel build options
//! (`defines/NAME`, `compiler_flags`, `okl/enabled`) and memory options
//! (`host`, `async`). Keys are kept sorted, so the serialized form is
//! deterministic and doubles as part of the kernel cache key.
//!
//! Text input accepts a relaxed JSON:
//!
//! ```text
//! {mode: 'OpenCL', platform_id: 0, device_id: 0}
//! {"defines": {"TILE": 16}, compiler_flags: '-O3',}
//! ```
//!
//! Keys and string values may be unquoted words, strings may use single
//! quotes, and trailing commas are ignored.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Sorted tree of configuration values addressed by `/`-separated paths
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(Map<String, Value>);

impl Properties {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Parse relaxed JSON object text. Blank text is an empty set.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let strict = relaxed_to_json(text)?;
        let value: Value = serde_json::from_str(&strict).map_err(|e| Error::Properties(format!("{e} in `{text}`")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::Properties(format!("expected an object, found `{other}`"))),
        }
    }

    /// Builder form of [`Properties::set`].
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set(path, value);
        self
    }

    /// Shorthand for `with("defines/NAME", value)`.
    pub fn define(self, name: &str, value: impl Into<Value>) -> Self {
        self.with(&format!("defines/{name}"), value)
    }

    /// Set the value at `path`, creating intermediate objects.
    ///
    /// A non-object found along the path is replaced by an object.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut map = &mut self.0;
        for segment in parents {
            let entry = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            map = next;
        }
        map.insert(last.to_string(), value.into());
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (last, parents) = segments.split_last()?;
        let mut map = &mut self.0;
        for segment in parents {
            map = map.get_mut(*segment)?.as_object_mut()?;
        }
        map.remove(*last)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path)?.as_bool()
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path)?.as_u64()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Deep merge: objects merge recursively, everything else in `other` wins.
    pub fn merge(&mut self, other: &Properties) {
        merge_maps(&mut self.0, &other.0);
    }

    // ============================================================================================
    // Build options
    // ============================================================================================

    /// Compile-time macro definitions, sorted by name.
    ///
    /// Strings are used verbatim, booleans become `1`/`0`.
    pub fn defines(&self) -> Vec<(String, String)> {
        let Some(Value::Object(defines)) = self.get("defines") else {
            return Vec::new();
        };
        defines
            .iter()
            .map(|(name, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
                    other => other.to_string(),
                };
                (name.clone(), text)
            })
            .collect()
    }

    /// Backend compiler flags, whitespace-normalized.
    pub fn compiler_flags(&self) -> String {
        match self.get("compiler_flags") {
            Some(Value::String(flags)) => flags.split_whitespace().collect::<Vec<_>>().join(" "),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .flat_map(str::split_whitespace)
                .collect::<Vec<_>>()
                .join(" "),
            _ => String::new(),
        }
    }

    /// Append to `compiler_flags` the way repeated `+=` on a flag string does.
    pub fn append_compiler_flags(&mut self, flags: &str) {
        let mut current = self.compiler_flags();
        for flag in flags.split_whitespace() {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(flag);
        }
        self.set("compiler_flags", current);
    }

    /// Whether the source is portable kernel language (default) rather than
    /// backend-native code.
    pub fn okl_enabled(&self) -> bool {
        self.get_bool("okl/enabled").unwrap_or(true)
    }

    // ============================================================================================
    // Memory options
    // ============================================================================================

    /// `host: true` requests host-pinned memory.
    pub fn host(&self) -> bool {
        self.get_bool("host").unwrap_or(false)
    }

    /// `async: true` requests an enqueued rather than blocking copy.
    pub fn is_async(&self) -> bool {
        self.get_bool("async").unwrap_or(false)
    }

    /// Deterministic serialization with sorted keys.
    pub fn to_canonical_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

impl FromStr for Properties {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Properties {
    /// Collect `(path, value)` pairs; paths may be nested like `defines/N`.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Properties::new();
        for (path, value) in iter {
            let path: String = path.into();
            properties.set(&path, value);
        }
        properties
    }
}

fn merge_maps(into: &mut Map<String, Value>, from: &Map<String, Value>) {
    for (key, value) in from {
        match (into.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge_maps(existing, incoming),
            _ => {
                into.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Rewrite relaxed JSON into strict JSON text.
fn relaxed_to_json(text: &str) -> Result<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                let start = i;
                out.push('"');
                i += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(unterminated(text, start));
                    };
                    out.push(ch);
                    i += 1;
                    match ch {
                        '\\' => {
                            if let Some(&escaped) = chars.get(i) {
                                out.push(escaped);
                                i += 1;
                            }
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            '\'' => {
                let start = i;
                let mut value = String::new();
                i += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(unterminated(text, start));
                    };
                    i += 1;
                    match ch {
                        '\'' => break,
                        '\\' => match chars.get(i) {
                            Some('\'') => {
                                value.push('\'');
                                i += 1;
                            }
                            Some('n') => {
                                value.push('\n');
                                i += 1;
                            }
                            Some('t') => {
                                value.push('\t');
                                i += 1;
                            }
                            Some(&other) => {
                                value.push(other);
                                i += 1;
                            }
                            None => value.push('\\'),
                        },
                        other => value.push(other),
                    }
                }
                out.push_str(&Value::String(value).to_string());
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E' | '+' | '-')) {
                    i += 1;
                }
                out.extend(&chars[start..i]);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '/' | '.' | '-')) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" | "false" | "null" => out.push_str(&word),
                    _ => out.push_str(&Value::String(word).to_string()),
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn unterminated(text: &str, at: usize) -> Error {
    Error::Properties(format!("unterminated string starting at character {at} in `{text}`"))
}
