// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where tweakdock keeps its files, and how the documents root is
//! laid out.
//!
//! # Documents Root Layout
//!
//! ```text
//! <documents>/
//! ├── DevDisks/{version}/DeveloperDiskImage.dmg
//! ├── Workspace/{device_id}/{tweak}/...
//! ├── EnabledTweaks/{device_id}/...
//! ├── Backup/{device_id}/...
//! ├── Extract/...
//! ├── Template/...
//! └── Tools/...
//! ```
//!
//! Staging and backup directories are keyed per device, and every archive is
//! unpacked into its own scratch directory under `Extract`, so operations on
//! different devices never share them.

use crate::version::Version;

use std::path::{Path, PathBuf};

/// File name of a developer disk image inside an image cache entry.
pub const IMAGE_FILE: &str = "DeveloperDiskImage.dmg";

/// Determine default absolute path to documents root.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/tweakdock` as the default.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if data directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_documents_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("tweakdock"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to settings file.
///
/// Uses `$XDG_CONFIG_HOME/tweakdock/settings.toml`. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory path cannot be
///   determined.
pub fn default_settings_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("tweakdock").join("settings.toml"))
        .ok_or(NoWayHome)
}

/// Layout of the documents root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Construct new layout rooted at documents directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Documents root itself.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Developer disk image cache.
    pub fn dev_disks_dir(&self) -> PathBuf {
        self.root.join("DevDisks")
    }

    /// Cache entry holding image for target version.
    pub fn image_dir(&self, target: &Version) -> PathBuf {
        self.dev_disks_dir().join(target.to_string())
    }

    /// Developer disk image file for target version.
    pub fn image_path(&self, target: &Version) -> PathBuf {
        self.image_dir(target).join(IMAGE_FILE)
    }

    /// Parent of all device workspaces.
    pub fn workspace_root(&self) -> PathBuf {
        self.root.join("Workspace")
    }

    /// Workspace of one device.
    pub fn workspace_dir(&self, device_id: &str) -> PathBuf {
        self.workspace_root().join(device_id)
    }

    /// Staging area where enabled tweaks are merged for one device.
    pub fn staging_dir(&self, device_id: &str) -> PathBuf {
        self.root.join("EnabledTweaks").join(device_id)
    }

    /// Parent of all backup directories.
    pub fn backup_root(&self) -> PathBuf {
        self.root.join("Backup")
    }

    /// Backup directory generated for one device.
    pub fn backup_dir(&self, device_id: &str) -> PathBuf {
        self.backup_root().join(device_id)
    }

    /// Parent of scratch directories that release archives are unpacked into.
    pub fn extract_root(&self) -> PathBuf {
        self.root.join("Extract")
    }

    /// Default template tree used to seed new workspaces.
    pub fn template_dir(&self) -> PathBuf {
        self.root.join("Template")
    }

    /// Default directory holding external device tools.
    pub fn tools_dir(&self) -> PathBuf {
        self.root.join("Tools")
    }
}

/// No way to determine user's base directories.
///
/// # See Also
///
/// - [`dirs::data_dir`](https://docs.rs/dirs/latest/dirs/fn.data_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's data or configuration directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
