// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the settings file that tweakdock reads on start up.
//! Every field is optional. Missing fields fall back to defaults, and a missing
//! settings file is the same as an empty one.
//!
//! # General Layout
//!
//! ```toml
//! [releases]
//! index_url = "https://api.github.com/repos/<owner>/<repo>/releases"
//! download_url = "https://github.com/<owner>/<repo>/releases/download"
//!
//! [paths]
//! documents = "$HOME/.local/share/tweakdock"
//! template = "/usr/share/tweakdock/Files"
//! tools = "/opt/libimobiledevice/bin"
//! ```

use crate::path::Layout;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Default release index listing available developer disk images.
pub const DEFAULT_INDEX_URL: &str =
    "https://api.github.com/repos/mspvirajpatel/Xcode_Developer_Disk_Images/releases";

/// Default base URL that release archives are downloaded from.
pub const DEFAULT_DOWNLOAD_URL: &str =
    "https://github.com/mspvirajpatel/Xcode_Developer_Disk_Images/releases/download";

/// Settings file layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Where developer disk images come from.
    pub releases: ReleaseSettings,

    /// Where tweakdock keeps and finds its files.
    pub paths: PathSettings,
}

impl Settings {
    /// Load settings from file.
    ///
    /// Missing file yields default settings.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if settings file exists but cannot be
    ///   read.
    /// - Return [`ConfigError::Deserialize`] if settings file is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no settings at {:?}, using defaults", path.display());
            return Ok(Self::default());
        }

        read_to_string(path)
            .map_err(|err| ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            })?
            .parse()
    }

    /// Layout of documents root, with given override taking precedence.
    pub fn layout(&self, documents: Option<PathBuf>, fallback: PathBuf) -> Layout {
        Layout::new(
            documents
                .or_else(|| self.paths.documents.clone())
                .unwrap_or(fallback),
        )
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        let paths = &mut settings.paths;
        for path in [
            &mut paths.documents,
            &mut paths.template,
            &mut paths.tools,
            &mut paths.libraries,
        ]
        .into_iter()
        .flatten()
        {
            *path = PathBuf::from(shellexpand::full(path.to_string_lossy().as_ref())?.into_owned());
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Release index settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReleaseSettings {
    /// URL of JSON array listing releases by `tag_name`.
    pub index_url: String,

    /// Base URL of release archives, i.e., `{download_url}/{tag}/{tag}.zip`.
    pub download_url: String,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            index_url: DEFAULT_INDEX_URL.into(),
            download_url: DEFAULT_DOWNLOAD_URL.into(),
        }
    }
}

/// Path settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathSettings {
    /// Documents root holding workspaces, caches, and staging areas.
    pub documents: Option<PathBuf>,

    /// Template tree used to seed new workspaces.
    pub template: Option<PathBuf>,

    /// Directory holding external device tool executables.
    pub tools: Option<PathBuf>,

    /// Directory of shared libraries the device tools link against.
    pub libraries: Option<PathBuf>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read settings file.
    #[error("failed to read settings at {:?}", path.display())]
    Read {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
