// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Key/value storage over property list files.
//!
//! Most tweaks are a handful of keys flipped inside a property list that lives
//! in the device workspace. The [`KeyValueStore`] trait hides how those files
//! are read and written.

use plist::{Dictionary, Value};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Storage of top-level keys in configuration files.
pub trait KeyValueStore {
    /// Set listing of top-level keys in file, creating file if missing.
    fn set_values(&self, path: &Path, values: BTreeMap<String, Value>) -> Result<()>;

    /// Fetch value of top-level key in file.
    fn value(&self, path: &Path, key: &str) -> Result<Option<Value>>;
}

/// Property list files on disk.
///
/// Reads binary or XML property lists. Always writes XML.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlistFiles;

impl PlistFiles {
    /// Construct new property list store.
    pub fn new() -> Self {
        Self
    }

    fn read_dictionary(&self, path: &Path) -> Result<Dictionary> {
        if !path.exists() {
            return Ok(Dictionary::new());
        }

        Value::from_file(path)
            .map_err(|err| PlistStoreError::Read {
                source: err,
                path: path.to_path_buf(),
            })?
            .into_dictionary()
            .ok_or_else(|| PlistStoreError::NotDictionary {
                path: path.to_path_buf(),
            })
    }
}

impl KeyValueStore for PlistFiles {
    #[instrument(skip(self, values), level = "debug")]
    fn set_values(&self, path: &Path, values: BTreeMap<String, Value>) -> Result<()> {
        let mut dictionary = self.read_dictionary(path)?;
        for (key, value) in values {
            debug!("set {key} = {value:?}");
            dictionary.insert(key, value);
        }

        if let Some(parent) = path.parent() {
            mkdirp::mkdirp(parent).map_err(|err| PlistStoreError::CreateDir {
                source: err,
                path: parent.to_path_buf(),
            })?;
        }

        Value::Dictionary(dictionary)
            .to_file_xml(path)
            .map_err(|err| PlistStoreError::Write {
                source: err,
                path: path.to_path_buf(),
            })
    }

    fn value(&self, path: &Path, key: &str) -> Result<Option<Value>> {
        Ok(self.read_dictionary(path)?.get(key).cloned())
    }
}

/// Interpret command-line text as a property list value.
///
/// Recognizes booleans, integers, and reals. Anything else is a string.
pub fn parse_value(text: &str) -> Value {
    match text {
        "true" | "yes" => Value::Boolean(true),
        "false" | "no" => Value::Boolean(false),
        _ => {
            if let Ok(integer) = text.parse::<i64>() {
                Value::Integer(integer.into())
            } else if let Ok(real) = text.parse::<f64>() {
                Value::Real(real)
            } else {
                Value::String(text.into())
            }
        }
    }
}

/// Property list storage error types.
#[derive(Debug, thiserror::Error)]
pub enum PlistStoreError {
    /// Property list cannot be read or parsed.
    #[error("failed to read property list {:?}", path.display())]
    Read {
        #[source]
        source: plist::Error,
        path: PathBuf,
    },

    /// Property list cannot be written.
    #[error("failed to write property list {:?}", path.display())]
    Write {
        #[source]
        source: plist::Error,
        path: PathBuf,
    },

    /// Parent directory of property list cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Property list root is not a dictionary.
    #[error("property list {:?} does not hold a dictionary", path.display())]
    NotDictionary { path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = PlistStoreError> = std::result::Result<T, E>;
