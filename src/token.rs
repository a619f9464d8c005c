//! Token resolution interface.
//!
//! Tokens are organisation-specific values (brand colours, font names)
//! supplied from outside the engine. Operation values and fragment text refer
//! to them as `{{token.name}}`; the engine treats resolved values as opaque
//! strings.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Supplies concrete strings for token names.
pub trait TokenResolver {
    fn resolve(&self, token: &str) -> Option<String>;
}

impl TokenResolver for HashMap<String, String> {
    fn resolve(&self, token: &str) -> Option<String> {
        self.get(token).cloned()
    }
}

impl TokenResolver for BTreeMap<String, String> {
    fn resolve(&self, token: &str) -> Option<String> {
        self.get(token).cloned()
    }
}

/// Adapts a closure into a [`TokenResolver`].
#[derive(Debug, Clone, Copy)]
pub struct FnTokens<F>(pub F);

impl<F> TokenResolver for FnTokens<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve(&self, token: &str) -> Option<String> {
        (self.0)(token)
    }
}

/// Resolver with no tokens at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTokens;

impl TokenResolver for NoTokens {
    fn resolve(&self, _token: &str) -> Option<String> {
        None
    }
}

/// One piece of a value that may contain `{{token}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece<'a> {
    Literal(&'a str),
    Token(&'a str),
}

/// Split `input` into literal text and token placeholders. An unterminated
/// `{{` is kept as literal text.
pub fn pieces(input: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut rest = input;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        if open > 0 {
            out.push(Piece::Literal(&rest[..open]));
        }
        out.push(Piece::Token(rest[open + 2..open + 2 + close].trim()));
        rest = &rest[open + 2 + close + 2..];
    }
    if !rest.is_empty() {
        out.push(Piece::Literal(rest));
    }
    out
}

pub fn is_token_shaped(input: &str) -> bool {
    pieces(input)
        .iter()
        .any(|piece| matches!(piece, Piece::Token(_)))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unresolved token '{token}'")]
pub struct UnresolvedToken {
    pub token: String,
}

/// Replace every `{{token}}` in `input` with its resolved value.
pub fn substitute(input: &str, tokens: &dyn TokenResolver) -> Result<String, UnresolvedToken> {
    let mut out = String::with_capacity(input.len());
    for piece in pieces(input) {
        match piece {
            Piece::Literal(text) => out.push_str(text),
            Piece::Token(name) => {
                let value = tokens.resolve(name).ok_or_else(|| UnresolvedToken {
                    token: name.to_string(),
                })?;
                out.push_str(&value);
            }
        }
    }
    Ok(out)
}

#[derive(Debug)]
pub enum TokenFileError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    Toml {
        path: PathBuf,
        source: toml_edit::de::Error,
    },
}

impl fmt::Display for TokenFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenFileError::Io { path, source } => {
                write!(f, "failed to read tokens from {}: {}", path.display(), source)
            }
            TokenFileError::Json { path, source } => {
                write!(f, "failed to parse token JSON ({}): {}", path.display(), source)
            }
            TokenFileError::Toml { path, source } => {
                write!(f, "failed to parse token TOML ({}): {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for TokenFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TokenFileError::Io { source, .. } => Some(source),
            TokenFileError::Json { source, .. } => Some(source),
            TokenFileError::Toml { source, .. } => Some(source),
        }
    }
}

/// Flat token table; nested tables are addressed with dotted names
/// (`brand.accent1`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    values: BTreeMap<String, String>,
}

impl TokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn from_value(value: &Value) -> Self {
        let mut set = Self::new();
        flatten("", value, &mut set.values);
        set
    }

    /// Load a `.json` or `.toml` token file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TokenFileError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| TokenFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            serde_json::from_str(&contents).map_err(|source| TokenFileError::Json {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            toml_edit::de::from_str(&contents).map_err(|source| TokenFileError::Toml {
                path: path.to_path_buf(),
                source,
            })?
        };
        Ok(Self::from_value(&value))
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    let key = |name: &str| {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        }
    };
    match value {
        Value::Object(map) => {
            for (name, nested) in map {
                flatten(&key(name), nested, out);
            }
        }
        Value::Null => {}
        Value::String(text) => {
            out.insert(prefix.to_string(), text.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

impl TokenResolver for TokenSet {
    fn resolve(&self, token: &str) -> Option<String> {
        self.values.get(token).cloned()
    }
}
