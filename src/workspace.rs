// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Per-device workspaces.
//!
//! A workspace is a directory under `Workspace/` named after a device
//! identifier. It holds one folder per tweak, seeded from a template tree the
//! first time the device is used. Seeding goes through [`crate::sync::merge`],
//! so files the user already touched in a workspace are never replaced by
//! older template content.

use crate::{
    path::Layout,
    sync::{self, SyncError},
    tweak::Tweak,
};

use std::{
    io,
    path::{Component, Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// Workspace directory of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    device_id: String,
    path: PathBuf,
}

impl Workspace {
    /// Device that owns the workspace.
    pub fn device_id(&self) -> &str {
        self.device_id.as_str()
    }

    /// Absolute path to workspace.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Folder holding files of tweak.
    pub fn tweak_dir(&self, tweak: Tweak) -> PathBuf {
        self.path.join(tweak.folder_name())
    }

    /// File inside folder of tweak.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::InvalidTweakFile`] if `relative` is empty,
    ///   absolute, or steps out of the tweak folder.
    pub fn tweak_file(&self, tweak: Tweak, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = relative.as_ref();

        // INVARIANT: Only normal components, so result stays inside tweak folder.
        let valid = relative.components().next().is_some()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !valid {
            return Err(WorkspaceError::InvalidTweakFile {
                path: relative.to_path_buf(),
            });
        }

        Ok(self.tweak_dir(tweak).join(relative))
    }
}

/// Create and seed device workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    layout: Layout,
    template: PathBuf,
}

impl WorkspaceManager {
    /// Construct new workspace manager seeding from template tree.
    pub fn new(layout: Layout, template: impl Into<PathBuf>) -> Self {
        Self {
            layout,
            template: template.into(),
        }
    }

    /// Layout of documents root.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Template tree new workspaces are seeded from.
    pub fn template(&self) -> &Path {
        self.template.as_path()
    }

    /// Make sure workspace of device exists and is seeded.
    ///
    /// Missing template only produces a warning, leaving workspace as is.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError::InvalidDeviceId`] if identifier cannot name
    ///   a directory.
    /// - Return [`WorkspaceError::CreateDir`] if workspace cannot be created.
    /// - Return [`WorkspaceError::Seed`] if template cannot be merged in.
    #[instrument(skip(self), level = "debug")]
    pub fn ensure_workspace(&self, device_id: &str) -> Result<Workspace> {
        validate_device_id(device_id)?;

        let root = self.layout.workspace_root();
        let path = self.layout.workspace_dir(device_id);
        for dir in [&root, &path] {
            mkdirp::mkdirp(dir).map_err(|err| WorkspaceError::CreateDir {
                source: err,
                path: dir.to_path_buf(),
            })?;
        }

        if self.template.is_dir() {
            let report = sync::merge(&self.template, &path)?;
            info!(
                "seeded workspace of {device_id}: {} copied, {} up to date",
                report.copied, report.skipped
            );
        } else {
            warn!(
                "template {:?} does not exist, workspace of {device_id} left unseeded",
                self.template.display()
            );
        }

        Ok(Workspace {
            device_id: device_id.into(),
            path,
        })
    }
}

fn validate_device_id(device_id: &str) -> Result<()> {
    // INVARIANT: Device identifier must be a single normal path component.
    let valid = !device_id.is_empty()
        && device_id != "."
        && device_id != ".."
        && !device_id.contains(['/', '\\']);

    if !valid {
        return Err(WorkspaceError::InvalidDeviceId {
            device_id: device_id.into(),
        });
    }

    Ok(())
}

/// Workspace error types.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Device identifier cannot be used as directory name.
    #[error("invalid device identifier {device_id:?}")]
    InvalidDeviceId { device_id: String },

    /// Tweak file path leaves its tweak folder.
    #[error("tweak file {:?} must be relative to its tweak folder", path.display())]
    InvalidTweakFile { path: PathBuf },

    /// Workspace directory cannot be created.
    #[error("failed to create workspace directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Template cannot be merged into workspace.
    #[error(transparent)]
    Seed(#[from] SyncError),
}

/// Friendly result alias :3
pub type Result<T, E = WorkspaceError> = std::result::Result<T, E>;
