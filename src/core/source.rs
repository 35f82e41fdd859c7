//! Reading role and task definitions from YAML or TOML.
//!
//! Definitions may be written as a list of entries carrying a `name` field,
//! or as a map keyed by name (the layout of crew-style `agents.yaml` /
//! `tasks.yaml` files). Both layouts keep document order.

use serde::de::{DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use crate::error::ConfigError;
use crate::Result;

/// Serialization format of a configuration source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> std::result::Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Parse a configuration document.
pub fn parse<T: DeserializeOwned>(
    text: &str,
    format: ConfigFormat,
    origin: &str,
) -> std::result::Result<T, ConfigError> {
    let parsed = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| ConfigError::Parse {
        origin: origin.to_string(),
        message,
    })
}

/// Read and parse a configuration file, choosing the format by extension.
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
    Ok(Document::read(path)?.parse()?)
}

/// A configuration file's text, read but not yet parsed.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub format: ConfigFormat,
    pub origin: String,
}

impl Document {
    pub fn read(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path)?;
        tracing::debug!(path = %path.display(), ?format, "reading configuration");
        Ok(Self {
            text: std::fs::read_to_string(path)?,
            format,
            origin: path.display().to_string(),
        })
    }

    pub fn parse<T: DeserializeOwned>(&self) -> std::result::Result<T, ConfigError> {
        parse(&self.text, self.format, &self.origin)
    }

    /// Whether the document is a mapping with `key` at the top level.
    pub fn has_key(&self, key: &str) -> bool {
        match self.format {
            ConfigFormat::Yaml => serde_yaml::from_str::<serde_yaml::Value>(&self.text)
                .ok()
                .and_then(|value| value.as_mapping().map(|map| map.contains_key(key)))
                .unwrap_or(false),
            ConfigFormat::Toml => {
                toml::from_str::<toml::Table>(&self.text).is_ok_and(|table| table.contains_key(key))
            }
        }
    }
}

/// A definition that can take its name from a map key.
pub trait Named {
    fn set_name(&mut self, name: String);
}

/// Definitions in document order, from either a list or a keyed map.
#[derive(Debug, Clone, PartialEq)]
pub struct Entries<T>(pub Vec<T>);

impl<T> Default for Entries<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Entries<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<'de, T> Deserialize<'de> for Entries<T>
where
    T: Deserialize<'de> + Named,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for EntriesVisitor<T>
        where
            T: Deserialize<'de> + Named,
        {
            type Value = Entries<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a list of definitions or a map of definitions keyed by name")
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some(entry) = seq.next_element::<T>()? {
                    entries.push(entry);
                }
                Ok(Entries(entries))
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((name, mut entry)) = map.next_entry::<String, T>()? {
                    entry.set_name(name);
                    entries.push(entry);
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_any(EntriesVisitor(PhantomData))
    }
}

/// Treat blank strings as missing.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
