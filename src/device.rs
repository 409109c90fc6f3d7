// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Device tool gateway.
//!
//! Everything that talks to an actual device goes through an external toolkit
//! of small command-line programs. The [`DeviceToolGateway`] trait captures
//! the handful of operations we need from that toolkit, so the rest of the
//! crate never spawns a process directly and tests can swap in canned
//! responses.
//!
//! [`ToolchainGateway`] implements the trait by running libimobiledevice style
//! executables out of a tools directory.

use std::{
    collections::BTreeMap,
    ffi::OsStr,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument, warn};

/// Connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Opaque unique identifier of device.
    pub id: String,

    /// User facing name of device.
    pub name: String,

    /// Installed OS version as reported by device.
    pub version: String,
}

impl Display for Device {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} ({}, {})", self.name, self.id, self.version)
    }
}

/// Result of asking device to mount a disk image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// Image is mounted.
    Mounted,

    /// Device explicitly refused to mount image.
    ImageMountFailed,
}

/// Operations offered by the external device toolkit.
pub trait DeviceToolGateway {
    /// List identifiers of connected devices.
    fn device_ids(&self) -> Result<Vec<String>>;

    /// Query display name of device.
    fn device_name(&self, device_id: &str) -> Result<String>;

    /// Query installed OS version of device.
    fn device_version(&self, device_id: &str) -> Result<String>;

    /// Mount disk image at path on device.
    fn mount_image(&self, device_id: &str, image: &Path) -> Result<MountOutcome>;

    /// Check if device still needs a developer disk image mounted.
    fn needs_mounting(&self, device_id: &str) -> Result<bool>;

    /// Generate backup in backup directory out of staged files.
    fn generate_backup(&self, staging_dir: &Path, backup_dir: &Path) -> Result<()>;

    /// Restore backup directory onto device, touching system data only.
    fn restore_backup(&self, device_id: &str, backup_dir: &Path) -> Result<()>;

    /// Simulate device location.
    fn set_location(&self, device_id: &str, latitude: f64, longitude: f64) -> Result<()>;

    /// Stop simulating device location.
    fn reset_location(&self, device_id: &str) -> Result<()>;

    /// List home screen apps as bundle identifier to display name.
    fn home_screen_apps(&self, device_id: &str) -> Result<BTreeMap<String, String>>;

    /// Count home screen pages.
    fn home_screen_pages(&self, device_id: &str) -> Result<u32>;

    /// Enumerate connected devices along with their names and versions.
    fn list_devices(&self) -> Result<Vec<Device>> {
        self.device_ids()?
            .into_iter()
            .map(|id| -> Result<Device> {
                Ok(Device {
                    name: self.device_name(&id)?,
                    version: self.device_version(&id)?,
                    id,
                })
            })
            .collect()
    }
}

/// Device gateway backed by external executables.
///
/// Every tool is looked up by name inside the tools directory, and run with
/// the documents root as its working directory.
#[derive(Debug, Clone)]
pub struct ToolchainGateway {
    tools_dir: PathBuf,
    working_dir: PathBuf,
    library_dir: Option<PathBuf>,
}

impl ToolchainGateway {
    /// Construct new toolchain gateway.
    pub fn new(tools_dir: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: tools_dir.into(),
            working_dir: working_dir.into(),
            library_dir: None,
        }
    }

    /// Point dynamic loader of every tool at shared library directory.
    pub fn with_library_dir(mut self, library_dir: impl Into<PathBuf>) -> Self {
        self.library_dir = Some(library_dir.into());
        self
    }

    fn tool(&self, name: &'static str) -> Result<PathBuf> {
        let path = self.tools_dir.join(name);
        if !path.is_file() {
            return Err(GatewayError::NotFound { tool: name, path });
        }

        Ok(path)
    }

    fn run(
        &self,
        name: &'static str,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Result<ToolOutput> {
        let mut command = Command::new(self.tool(name)?);
        command.args(args).current_dir(&self.working_dir);
        if let Some(library_dir) = &self.library_dir {
            command.env("DYLD_LIBRARY_PATH", library_dir);
            command.env("LD_LIBRARY_PATH", library_dir);
        }

        syscall_non_interactive(name, command)
    }

    fn run_checked(
        &self,
        name: &'static str,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Result<String> {
        let output = self.run(name, args)?;
        if !output.success {
            return Err(GatewayError::ToolFailed {
                tool: name,
                output: output.text,
            });
        }

        Ok(output.text)
    }

    fn run_location(&self, args: &[&str]) -> Result<()> {
        let output = self.run("locsimUtils", args)?;
        if !output.success || output.text.contains("ERROR") || output.text.contains("Usage") {
            return Err(GatewayError::ToolFailed {
                tool: "locsimUtils",
                output: output.text,
            });
        }

        Ok(())
    }
}

impl DeviceToolGateway for ToolchainGateway {
    #[instrument(skip(self), level = "debug")]
    fn device_ids(&self) -> Result<Vec<String>> {
        let output = self.run("idevice_id", ["-l"])?;
        if output.text.contains("ERROR") {
            debug!("no devices: {}", output.text);
            return Ok(Vec::new());
        }

        if !output.success {
            return Err(GatewayError::ToolFailed {
                tool: "idevice_id",
                output: output.text,
            });
        }

        Ok(output
            .text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    fn device_name(&self, device_id: &str) -> Result<String> {
        Ok(self
            .run_checked("idevicename", ["-u", device_id])?
            .replace('\n', ""))
    }

    fn device_version(&self, device_id: &str) -> Result<String> {
        Ok(self
            .run_checked("ideviceinfo", ["-u", device_id, "-k", "ProductVersion"])?
            .replace('\n', ""))
    }

    #[instrument(skip(self), level = "debug")]
    fn mount_image(&self, device_id: &str, image: &Path) -> Result<MountOutcome> {
        let output = self.run(
            "ideviceimagemounter",
            [OsStr::new("-u"), OsStr::new(device_id), image.as_os_str()],
        )?;

        if output.text.contains("ImageMountFailed") {
            warn!("device {device_id} refused to mount {:?}", image.display());
            return Ok(MountOutcome::ImageMountFailed);
        }

        if !output.success {
            return Err(GatewayError::ToolFailed {
                tool: "ideviceimagemounter",
                output: output.text,
            });
        }

        Ok(MountOutcome::Mounted)
    }

    fn needs_mounting(&self, device_id: &str) -> Result<bool> {
        let output = self.run("locsimUtils", ["-u", device_id, "-m"])?;
        Ok(output
            .text
            .contains("Make sure a developer disk image is mounted!"))
    }

    #[instrument(skip(self), level = "debug")]
    fn generate_backup(&self, staging_dir: &Path, backup_dir: &Path) -> Result<()> {
        self.run_checked(
            "createBackup",
            [staging_dir.as_os_str(), backup_dir.as_os_str()],
        )?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn restore_backup(&self, device_id: &str, backup_dir: &Path) -> Result<()> {
        // INVARIANT: Backup tool wants the parent directory plus the name of
        //   the backup folder inside it as its source.
        let (Some(root), Some(source)) = (backup_dir.parent(), backup_dir.file_name()) else {
            return Err(GatewayError::InvalidBackupDir {
                path: backup_dir.to_path_buf(),
            });
        };

        let output = self.run_checked(
            "idevicebackup2",
            [
                OsStr::new("-u"),
                OsStr::new(device_id),
                OsStr::new("-s"),
                source,
                OsStr::new("restore"),
                OsStr::new("--system"),
                OsStr::new("--skip-apps"),
                root.as_os_str(),
            ],
        )?;
        debug!("{output}");

        Ok(())
    }

    fn set_location(&self, device_id: &str, latitude: f64, longitude: f64) -> Result<()> {
        let (latitude, longitude) = (latitude.to_string(), longitude.to_string());
        self.run_location(&["-u", device_id, "-l", &latitude, "-s", &longitude])
    }

    fn reset_location(&self, device_id: &str) -> Result<()> {
        self.run_location(&["-u", device_id, "-r", "reset"])
    }

    fn home_screen_apps(&self, device_id: &str) -> Result<BTreeMap<String, String>> {
        let output = self.run_checked("homeScreenApps", ["-u", device_id])?;
        Ok(parse_app_listing(&output))
    }

    fn home_screen_pages(&self, device_id: &str) -> Result<u32> {
        let output = self.run_checked("homeScreenApps", ["-u", device_id, "-n"])?;
        Ok(output.trim().parse().unwrap_or(1))
    }
}

/// Combined output of an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ToolOutput {
    success: bool,
    text: String,
}

fn syscall_non_interactive(name: &'static str, mut command: Command) -> Result<ToolOutput> {
    let output = command.output().map_err(|err| GatewayError::Syscall {
        source: err,
        tool: name,
    })?;
    let mut text = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    text.push_str(String::from_utf8_lossy(output.stderr.as_slice()).as_ref());

    // INVARIANT: Chomp trailing newlines.
    let text = text
        .strip_suffix("\r\n")
        .or(text.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(text);

    debug!("{name} exited with {}", output.status);
    Ok(ToolOutput {
        success: output.status.success(),
        text,
    })
}

fn parse_app_listing(listing: &str) -> BTreeMap<String, String> {
    let mut apps = BTreeMap::new();
    for line in listing.lines().filter(|line| !line.trim().is_empty()) {
        match line.split_once(',') {
            Some((bundle, name)) => {
                apps.insert(bundle.trim().to_string(), name.trim().to_string());
            }
            None => warn!("skip malformed app entry {line:?}"),
        }
    }

    apps
}

/// Device gateway error types.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Tool executable is missing.
    #[error("cannot find {tool} at {:?}", path.display())]
    NotFound { tool: &'static str, path: PathBuf },

    /// Tool could not be spawned.
    #[error("failed to run {tool}")]
    Syscall {
        #[source]
        source: std::io::Error,
        tool: &'static str,
    },

    /// Tool ran, but reported failure.
    #[error("{tool} failed:\n{output}")]
    ToolFailed { tool: &'static str, output: String },

    /// Backup directory has no parent or name.
    #[error("invalid backup directory {:?}", path.display())]
    InvalidBackupDir { path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_home_screen_listing() {
        let listing = indoc! {"
            com.apple.mobilesafari,Safari
            com.apple.Preferences, Settings

            broken line
        "};

        let result = parse_app_listing(listing);
        let expect = BTreeMap::from([
            ("com.apple.Preferences".to_string(), "Settings".to_string()),
            ("com.apple.mobilesafari".to_string(), "Safari".to_string()),
        ]);

        assert_eq!(result, expect);
    }

    #[test]
    fn missing_tool_is_not_found() {
        let gateway = ToolchainGateway::new("/nonexistent/tools", "/nonexistent");
        let result = gateway.device_ids();

        assert!(matches!(
            result,
            Err(GatewayError::NotFound {
                tool: "idevice_id",
                ..
            })
        ));
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use pretty_assertions::assert_eq;
        use std::{fs, os::unix::fs::PermissionsExt};
        use tempfile::TempDir;

        fn install_tool(dir: &Path, name: &str, script: &str) -> anyhow::Result<()> {
            let path = dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{script}\n"))?;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
            Ok(())
        }

        #[test]
        fn list_devices_queries_each_device() -> anyhow::Result<()> {
            let tools = TempDir::new()?;
            install_tool(tools.path(), "idevice_id", "printf 'AAA\\nBBB\\n'")?;
            install_tool(tools.path(), "idevicename", "echo \"phone-$2\"")?;
            install_tool(tools.path(), "ideviceinfo", "echo 16.4.1")?;
            let gateway = ToolchainGateway::new(tools.path(), tools.path());

            let result = gateway.list_devices()?;
            let expect = vec![
                Device {
                    id: "AAA".into(),
                    name: "phone-AAA".into(),
                    version: "16.4.1".into(),
                },
                Device {
                    id: "BBB".into(),
                    name: "phone-BBB".into(),
                    version: "16.4.1".into(),
                },
            ];

            assert_eq!(result, expect);
            Ok(())
        }

        #[test]
        fn device_listing_error_means_no_devices() -> anyhow::Result<()> {
            let tools = TempDir::new()?;
            install_tool(tools.path(), "idevice_id", "echo 'ERROR: Unable to retrieve device list!'")?;
            let gateway = ToolchainGateway::new(tools.path(), tools.path());

            assert_eq!(gateway.device_ids()?, Vec::<String>::new());
            Ok(())
        }

        #[test]
        fn explicit_mount_refusal_is_distinguished() -> anyhow::Result<()> {
            let tools = TempDir::new()?;
            install_tool(tools.path(), "ideviceimagemounter", "echo 'Error: ImageMountFailed'; exit 1")?;
            let gateway = ToolchainGateway::new(tools.path(), tools.path());

            let result = gateway.mount_image("AAA", Path::new("/tmp/image.dmg"))?;
            assert_eq!(result, MountOutcome::ImageMountFailed);
            Ok(())
        }

        #[test]
        fn location_usage_output_is_failure() -> anyhow::Result<()> {
            let tools = TempDir::new()?;
            install_tool(tools.path(), "locsimUtils", "echo 'Usage: locsimUtils -u UDID'")?;
            let gateway = ToolchainGateway::new(tools.path(), tools.path());

            let result = gateway.set_location("AAA", 51.5, -0.12);
            assert!(matches!(result, Err(GatewayError::ToolFailed { .. })));
            Ok(())
        }

        #[test]
        fn restore_passes_backup_root_and_source() -> anyhow::Result<()> {
            let tools = TempDir::new()?;
            install_tool(tools.path(), "idevicebackup2", "echo \"$@\" > args.txt")?;
            let gateway = ToolchainGateway::new(tools.path(), tools.path());

            let backup_dir = tools.path().join("Backup").join("AAA");
            gateway.restore_backup("AAA", &backup_dir)?;

            let args = fs::read_to_string(tools.path().join("args.txt"))?;
            assert_eq!(
                args.trim(),
                format!(
                    "-u AAA -s AAA restore --system --skip-apps {}",
                    tools.path().join("Backup").display()
                )
            );
            Ok(())
        }
    }
}
