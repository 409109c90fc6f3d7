// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Tweak application pipeline.
//!
//! Applying tweaks walks through a fixed sequence of stages:
//!
//! ```text
//! Idle -> ClearingStaging -> StagingTweaks -> ClearingBackup
//!      -> GeneratingBackup -> Restoring -> Done
//! ```
//!
//! Every enabled tweak folder of the current workspace is merged into a fresh
//! staging directory, a backup is generated from the staging directory, and
//! that backup is restored onto the device. The first failing stage stops the
//! pipeline. Nothing is retried or rolled back, so directories are left in the
//! state the failing stage reached.

use crate::{
    device::{DeviceToolGateway, GatewayError},
    lease::{Busy, DeviceLeases},
    path::Layout,
    session::Session,
    sync::{self, SyncError},
    tweak::Tweak,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Stage of an apply operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    ClearingStaging,
    StagingTweaks,
    ClearingBackup,
    GeneratingBackup,
    Restoring,
    Done,
}

impl Display for Stage {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let text = match self {
            Self::Idle => "idle",
            Self::ClearingStaging => "clearing staging area",
            Self::StagingTweaks => "staging tweaks",
            Self::ClearingBackup => "clearing backup area",
            Self::GeneratingBackup => "generating backup",
            Self::Restoring => "restoring backup",
            Self::Done => "done",
        };

        fmt.write_str(text)
    }
}

/// Apply enabled tweaks to devices.
#[derive(Debug, Clone)]
pub struct TweakPipeline<G> {
    gateway: G,
    layout: Layout,
    leases: DeviceLeases,
}

impl<G> TweakPipeline<G>
where
    G: DeviceToolGateway,
{
    /// Construct new pipeline over device gateway.
    pub fn new(gateway: G, layout: Layout) -> Self {
        Self {
            gateway,
            layout,
            leases: DeviceLeases::new("apply"),
        }
    }

    /// Share apply lease registry with other pipelines.
    pub fn with_leases(mut self, leases: DeviceLeases) -> Self {
        self.leases = leases;
        self
    }

    /// Device gateway of pipeline.
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Apply enabled tweaks of session to its current device.
    ///
    /// # Errors
    ///
    /// - Return [`PipelineError`] tagged with failing [`Stage`].
    pub fn apply(&self, session: &Session) -> Result<()> {
        self.apply_with(session, |_| {})
    }

    /// Apply enabled tweaks, reporting each stage entered to `observe`.
    ///
    /// # Errors
    ///
    /// - Return [`PipelineError::NoDevice`] if session has no current device.
    /// - Return [`PipelineError::Unsupported`] if current device has no
    ///   workspace.
    /// - Return [`PipelineError::Busy`] if an apply for device is already in
    ///   flight.
    /// - Return [`PipelineError`] tagged with failing [`Stage`] otherwise.
    #[instrument(skip_all, level = "debug")]
    pub fn apply_with(&self, session: &Session, mut observe: impl FnMut(Stage)) -> Result<()> {
        let device = session.current_device().ok_or(PipelineError::NoDevice)?;
        let workspace = session
            .current_workspace()
            .ok_or_else(|| PipelineError::Unsupported {
                device_id: device.id.clone(),
            })?;
        let _lease = self.leases.acquire(device.id.as_str())?;

        let staging = self.layout.staging_dir(&device.id);
        let backup = self.layout.backup_dir(&device.id);
        let mut enter = |stage: Stage| {
            debug!("apply to {}: {stage}", device.id);
            observe(stage);
        };

        enter(Stage::ClearingStaging);
        recreate_dir(&staging, Stage::ClearingStaging)?;

        enter(Stage::StagingTweaks);
        for tweak in session.enabled_tweaks() {
            let source = workspace.tweak_dir(tweak);
            if !source.is_dir() {
                return Err(PipelineError::MissingTweakSource {
                    tweak,
                    path: source,
                });
            }

            let report = sync::merge(&source, &staging)
                .map_err(|err| PipelineError::Merge { source: err, tweak })?;
            debug!("staged {tweak}: {} files", report.copied);
        }

        enter(Stage::ClearingBackup);
        recreate_dir(&backup, Stage::ClearingBackup)?;

        enter(Stage::GeneratingBackup);
        self.gateway
            .generate_backup(&staging, &backup)
            .map_err(|err| PipelineError::Gateway {
                source: err,
                stage: Stage::GeneratingBackup,
            })?;

        enter(Stage::Restoring);
        self.gateway
            .restore_backup(&device.id, &backup)
            .map_err(|err| PipelineError::Gateway {
                source: err,
                stage: Stage::Restoring,
            })?;

        enter(Stage::Done);
        info!("applied tweaks to {} ({})", device.name, device.id);

        Ok(())
    }
}

fn recreate_dir(path: &Path, stage: Stage) -> Result<()> {
    let clear = |err| PipelineError::ClearDir {
        source: err,
        stage,
        path: path.to_path_buf(),
    };

    if path.exists() {
        fs::remove_dir_all(path).map_err(clear)?;
    }
    mkdirp::mkdirp(path).map_err(clear)?;

    Ok(())
}

/// Tweak pipeline error types.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// No device selected.
    #[error("no current device")]
    NoDevice,

    /// Device cannot have tweaks applied.
    #[error("device {device_id} has no workspace to apply")]
    Unsupported { device_id: String },

    /// Another apply for device is in flight.
    #[error(transparent)]
    Busy(#[from] Busy),

    /// Staging or backup directory cannot be recreated.
    #[error("{stage}: failed to recreate {:?}", path.display())]
    ClearDir {
        #[source]
        source: io::Error,
        stage: Stage,
        path: PathBuf,
    },

    /// Enabled tweak has no folder in workspace.
    #[error("staging tweaks: {tweak} has no files at {:?}", path.display())]
    MissingTweakSource { tweak: Tweak, path: PathBuf },

    /// Tweak folder cannot be merged into staging area.
    #[error("staging tweaks: failed to stage {tweak}")]
    Merge {
        #[source]
        source: SyncError,
        tweak: Tweak,
    },

    /// External tool failed.
    #[error("{stage}: device tool failed")]
    Gateway {
        #[source]
        source: GatewayError,
        stage: Stage,
    },
}

impl PipelineError {
    /// Stage that failed.
    ///
    /// Failures to start report [`Stage::Idle`].
    pub fn stage(&self) -> Stage {
        match self {
            Self::NoDevice | Self::Unsupported { .. } | Self::Busy(_) => Stage::Idle,
            Self::ClearDir { stage, .. } | Self::Gateway { stage, .. } => *stage,
            Self::MissingTweakSource { .. } | Self::Merge { .. } => Stage::StagingTweaks,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
