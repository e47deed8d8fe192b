//! Typed options passed through to a recipe's conversion.
//!
//! Each recipe declares its options up front as a list of [`OptionSpec`]s.
//! Strings coming from a command line or settings file are coerced to the
//! declared kind at the boundary, so conversions only ever see typed values.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Type of a recipe option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    Float,
    Integer,
    Bool,
    Text,
}

impl OptionKind {
    /// Coerce a raw string into a value of this kind.
    pub fn coerce(&self, key: &str, raw: &str) -> Result<OptionValue> {
        let raw = raw.trim();
        let invalid = || Error::invalid_option(format!("'{}' expects {}, got '{}'", key, self, raw));
        match self {
            OptionKind::Float => raw.parse().map(OptionValue::Float).map_err(|_| invalid()),
            OptionKind::Integer => raw.parse().map(OptionValue::Integer).map_err(|_| invalid()),
            OptionKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(OptionValue::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(OptionValue::Bool(false)),
                _ => Err(invalid()),
            },
            OptionKind::Text => Ok(OptionValue::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptionKind::Float => "a float",
            OptionKind::Integer => "an integer",
            OptionKind::Bool => "a boolean",
            OptionKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// A coerced option value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Float(f64),
    Integer(i64),
    Bool(bool),
    Text(String),
}

/// Declaration of one option a recipe accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    /// Default in string form, coerced like user input.
    pub default: Option<&'static str>,
    pub help: &'static str,
}

impl OptionSpec {
    /// An option without a default.
    pub const fn new(name: &'static str, kind: OptionKind, help: &'static str) -> Self {
        Self {
            name,
            kind,
            default: None,
            help,
        }
    }

    /// Same option with a default value.
    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }
}

/// Option values for one cast, validated against a recipe's schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecipeOptions {
    values: BTreeMap<String, OptionValue>,
}

impl RecipeOptions {
    /// No options at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a comma-separated `key=value` list, e.g.
    /// `wavelength=984e-9,pixel_size=1.2e-6`.
    pub fn parse(schema: &[OptionSpec], input: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for entry in input.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| Error::invalid_option(format!("invalid option string '{}'", entry)))?;
            pairs.push((key.trim(), value.trim()));
        }
        Self::from_pairs(schema, pairs)
    }

    /// Build options from key/value pairs, applying declared defaults.
    pub fn from_pairs<K, V>(schema: &[OptionSpec], pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut values = BTreeMap::new();

        for (key, raw) in pairs {
            let key = key.as_ref();
            let spec = find(schema, key)?;
            let value = spec.kind.coerce(key, raw.as_ref())?;
            if values.insert(key.to_string(), value).is_some() {
                return Err(Error::invalid_option(format!("'{}' given more than once", key)));
            }
        }

        for spec in schema {
            if let Some(default) = spec.default
                && !values.contains_key(spec.name)
            {
                values.insert(spec.name.to_string(), spec.kind.coerce(spec.name, default)?);
            }
        }

        Ok(Self { values })
    }

    /// Fail if any value is not declared by `schema`.
    pub fn check_against(&self, schema: &[OptionSpec]) -> Result<()> {
        for key in self.values.keys() {
            find(schema, key)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    /// Float value; integers are widened.
    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            OptionValue::Float(v) => Some(*v),
            OptionValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name)? {
            OptionValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.values.get(name)? {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name)? {
            OptionValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn find<'a>(schema: &'a [OptionSpec], key: &str) -> Result<&'a OptionSpec> {
    schema.iter().find(|spec| spec.name == key).ok_or_else(|| {
        Error::unknown_option(key, schema.iter().map(|s| s.name.to_string()).collect())
    })
}
