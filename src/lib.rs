// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Per-device tweak workspaces for mobile devices.
//!
//! A __tweak__ is a folder of configuration overlays that gets pushed onto a
//! device through its backup/restore mechanism. Tweakdock keeps one
//! __workspace__ of tweak folders per device, seeded from a template tree,
//! and applies the enabled ones by merging them into a staging area, turning
//! that into a backup, and restoring the backup onto the device.
//!
//! Tweakdock also makes sure a developer disk image matching the device's OS
//! version is available and mounted, picking the closest release available
//! when no exact match exists.
//!
//! # Documents Root
//!
//! Everything tweakdock writes lives under a single documents root. See
//! [`path::Layout`] for the layout of that directory.
//!
//! # Device Tools
//!
//! Tweakdock never talks to a device directly. All device access goes
//! through [`device::DeviceToolGateway`], implemented on top of a directory of
//! external command-line tools by [`device::ToolchainGateway`].

pub mod config;
pub mod device;
pub mod lease;
pub mod path;
pub mod pipeline;
pub mod plist_store;
pub mod release;
pub mod session;
pub mod sync;
pub mod tweak;
pub mod version;
pub mod workspace;
