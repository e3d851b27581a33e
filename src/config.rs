//! Reader for the section-based model configuration format.
//!
//! Lexical rules:
//! - `[name]` starts a section; section names are matched case-insensitively
//! - `key = value` records an entry under the current section
//! - lines starting with `#` or `;` are comments
//! - a trailing `\` joins the next physical line with a single space
//!
//! Entries written before any section header land in the default section.
//! Lookup uses `section::key`; an unqualified key resolves in the default
//! section.

use std::collections::HashMap;
use std::path::Path;

use crate::errors::{PortcullisError, Result};

pub const DEFAULT_SECTION: &str = "default";

/// Parsed configuration: section -> key -> value.
#[derive(Debug, Clone, Default)]
pub struct Config {
    data: HashMap<String, HashMap<String, String>>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PortcullisError::ConfigParse(format!("cannot read `{}`: {e}", path.display()))
        })?;
        Self::from_text(&text)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        let mut cfg = Config::default();
        let mut section = DEFAULT_SECTION.to_string();
        let mut buffer = String::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_suffix('\\') {
                if !buffer.is_empty() {
                    buffer.push(' ');
                }
                buffer.push_str(rest.trim_end());
                continue;
            }

            let logical = if buffer.is_empty() {
                line.to_string()
            } else {
                let mut joined = std::mem::take(&mut buffer);
                joined.push(' ');
                joined.push_str(line);
                joined
            };

            if logical.starts_with('[') && logical.ends_with(']') {
                let name = logical[1..logical.len() - 1].trim();
                if name.is_empty() {
                    return Err(PortcullisError::ConfigParse(format!(
                        "empty section name on line {}",
                        lineno + 1
                    )));
                }
                section = name.to_ascii_lowercase();
                continue;
            }

            let Some((key, value)) = logical.split_once('=') else {
                return Err(PortcullisError::ConfigParse(format!(
                    "line {} is not a `key = value` entry: `{logical}`",
                    lineno + 1
                )));
            };
            cfg.data
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }

        if !buffer.is_empty() {
            return Err(PortcullisError::ConfigParse(
                "dangling line continuation at end of input".into(),
            ));
        }

        Ok(cfg)
    }

    /// Raw lookup. The key is either `section::key` or a bare key resolved
    /// in the default section.
    pub fn get(&self, key: &str) -> Option<&str> {
        let (section, key) = match key.split_once("::") {
            Some((s, k)) => (s.to_ascii_lowercase(), k),
            None => (DEFAULT_SECTION.to_string(), key),
        };
        self.data
            .get(&section)
            .and_then(|entries| entries.get(key))
            .map(|s| s.as_str())
    }

    pub fn string(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_string()
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Comma-split list with per-item trimming. Missing key yields an empty list.
    pub fn strings(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(v) if !v.is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
# a comment
; another comment
top = level

[request_definition]
r = sub, obj, act

[Matchers]
m = r.sub == p.sub && \
    r.obj == p.obj

[numbers]
enabled = true
count = 42
ratio = 0.5
";

    #[test]
    fn test_sections_and_keys() {
        let cfg = Config::from_text(SAMPLE).unwrap();
        assert_eq!(cfg.get("request_definition::r"), Some("sub, obj, act"));
        assert_eq!(cfg.get("top"), Some("level"));
        assert_eq!(cfg.get("missing"), None);
    }

    #[test]
    fn test_section_lookup_is_case_insensitive() {
        let cfg = Config::from_text(SAMPLE).unwrap();
        assert_eq!(
            cfg.get("matchers::m"),
            Some("r.sub == p.sub && r.obj == p.obj")
        );
        assert_eq!(
            cfg.get("MATCHERS::m"),
            Some("r.sub == p.sub && r.obj == p.obj")
        );
    }

    #[test]
    fn test_line_continuation_joins_with_space() {
        let cfg = Config::from_text("[s]\na = one \\\n    two \\\n    three\n").unwrap();
        assert_eq!(cfg.get("s::a"), Some("one two three"));
    }

    #[test]
    fn test_typed_accessors() {
        let cfg = Config::from_text(SAMPLE).unwrap();
        assert_eq!(cfg.bool("numbers::enabled"), Some(true));
        assert_eq!(cfg.int("numbers::count"), Some(42));
        assert_eq!(cfg.float("numbers::ratio"), Some(0.5));
        assert_eq!(
            cfg.strings("request_definition::r"),
            vec!["sub", "obj", "act"]
        );
        assert!(cfg.strings("missing").is_empty());
    }

    #[test]
    fn test_line_without_equals_is_an_error() {
        let err = Config::from_text("[s]\nnot an entry\n").unwrap_err();
        assert!(matches!(err, PortcullisError::ConfigParse(_)));
    }

    #[test]
    fn test_dangling_continuation_is_an_error() {
        let err = Config::from_text("[s]\na = b \\").unwrap_err();
        assert!(matches!(err, PortcullisError::ConfigParse(_)));
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file("/nonexistent/model.conf").unwrap_err();
        assert!(matches!(err, PortcullisError::ConfigParse(_)));
    }
}
