// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Session context.
//!
//! A [`Session`] tracks which device is current, the workspace seeded for it,
//! the tweaks enabled for it, and the status of its developer disk image.
//! Everything that depends on the current device takes a session explicitly.
//! Switching devices resets all in-memory state, but never touches workspace
//! content on disk.

use crate::{
    device::Device,
    release::{AcquireState, MountState},
    tweak::Tweak,
    version::Version,
    workspace::{Workspace, WorkspaceManager, WorkspaceError},
};

use std::collections::BTreeSet;
use tokio::sync::watch;
use tracing::{info, warn};

/// Oldest major OS version that tweaks can be applied to.
pub const MIN_SUPPORTED_MAJOR: u32 = 15;

/// Explicit context of the device being worked on.
#[derive(Debug)]
pub struct Session {
    workspaces: WorkspaceManager,
    device: Option<Device>,
    workspace: Option<Workspace>,
    enabled: BTreeSet<Tweak>,
    image: watch::Sender<AcquireState>,
    mount: MountState,
}

impl Session {
    /// Construct new session with no current device.
    pub fn new(workspaces: WorkspaceManager) -> Self {
        Self {
            workspaces,
            device: None,
            workspace: None,
            enabled: BTreeSet::new(),
            image: watch::Sender::new(AcquireState::Pending),
            mount: MountState::Idle,
        }
    }

    /// Make device current, seeding its workspace.
    ///
    /// Devices older than [`MIN_SUPPORTED_MAJOR`] become current, but get no
    /// workspace.
    ///
    /// # Errors
    ///
    /// - Return [`WorkspaceError`] if workspace cannot be seeded. Device is
    ///   still current in that case.
    pub fn set_current_device(&mut self, device: Device) -> Result<(), WorkspaceError> {
        self.reset_current_device();
        info!("current device is {} ({})", device.name, device.id);

        let supported = is_supported(&device);
        let id = device.id.clone();
        self.device = Some(device);

        if !supported {
            warn!("device {id} runs an unsupported OS version, skip workspace");
            return Ok(());
        }

        self.workspace = Some(self.workspaces.ensure_workspace(&id)?);
        Ok(())
    }

    /// Forget current device along with all state tied to it.
    pub fn reset_current_device(&mut self) {
        self.device = None;
        self.workspace = None;
        self.enabled.clear();
        self.image.send_replace(AcquireState::Pending);
        self.mount = MountState::Idle;
    }

    /// Current device, if any.
    pub fn current_device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// Workspace of current device, if any.
    pub fn current_workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// Check if current device can have tweaks applied.
    pub fn is_device_supported(&self) -> bool {
        self.device.as_ref().is_some_and(is_supported)
    }

    /// Workspace manager of session.
    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn set_enabled(&mut self, tweak: Tweak, enabled: bool) {
        if enabled {
            self.enabled.insert(tweak);
        } else {
            self.enabled.remove(&tweak);
        }
    }

    pub fn is_enabled(&self, tweak: Tweak) -> bool {
        self.enabled.contains(&tweak)
    }

    /// Enabled tweaks in stable order.
    pub fn enabled_tweaks(&self) -> impl Iterator<Item = Tweak> + '_ {
        self.enabled.iter().copied()
    }

    /// Sender that image acquisition publishes its state through.
    pub fn image_sink(&self) -> &watch::Sender<AcquireState> {
        &self.image
    }

    /// Subscribe to image acquisition state.
    pub fn watch_image(&self) -> watch::Receiver<AcquireState> {
        self.image.subscribe()
    }

    /// Latest image acquisition state.
    pub fn image_state(&self) -> AcquireState {
        self.image.borrow().clone()
    }

    pub fn mount_state(&self) -> MountState {
        self.mount
    }

    pub fn set_mount_state(&mut self, state: MountState) {
        self.mount = state;
    }
}

fn is_supported(device: &Device) -> bool {
    match device.version.parse::<Version>() {
        Ok(version) => version.major >= MIN_SUPPORTED_MAJOR,
        Err(error) => {
            warn!("{error}");
            false
        }
    }
}
