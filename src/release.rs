// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Developer disk image acquisition and mounting.
//!
//! Devices need a developer disk image matching their OS version mounted
//! before location simulation works. Images are published as zip archives on
//! a remote release index. [`ReleaseAcquirer`] picks the best release for a
//! target version, downloads it, and installs it into the [`ImageCache`].
//!
//! # Image Cache
//!
//! The cache is keyed by the _target_ version, even when the payload came
//! from a different resolved release. Thus one cache slot always holds the
//! best image available for that target:
//!
//! ```text
//! DevDisks/
//! └── 16.2/
//!     └── DeveloperDiskImage.dmg    # payload of release 16.1
//! ```
//!
//! # Acquisition State
//!
//! Progress is published through a [`tokio::sync::watch`] channel holding an
//! [`AcquireState`]. Every acquisition that starts ends in exactly one
//! [`AcquireState::Resolved`].
//!
//! # Concurrency
//!
//! Acquisitions are leased twice: once per device, and once per target
//! version because devices on the same OS version share a cache slot. A
//! second acquisition holding either key is rejected with
//! [`AcquireError::Busy`].

use crate::{
    config::ReleaseSettings,
    device::{Device, DeviceToolGateway, GatewayError, MountOutcome},
    lease::{Busy, DeviceLeases},
    path::{Layout, IMAGE_FILE},
    version::{resolve_best, ReleaseDescriptor, Version, VersionError},
};

use futures::StreamExt;
use indicatif::ProgressBar;
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use zip::{result::ZipError, ZipArchive};

/// Result of ensuring an image is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStatus {
    /// Image for target was already cached. No network access happened.
    AlreadyPresent,

    /// Image was downloaded from the given resolved release.
    Downloaded(Version),

    /// Acquisition failed for the given reason.
    Failed(String),
}

/// Observable state of an image acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AcquireState {
    /// Nothing started yet.
    #[default]
    Pending,

    /// Archive download is in flight.
    InFlight,

    /// Acquisition finished, successfully or with a reason for failure.
    Resolved(Result<(), String>),
}

impl AcquireState {
    /// Archive download is in flight.
    pub fn is_downloading(&self) -> bool {
        matches!(self, Self::InFlight)
    }

    /// Acquisition has finished.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Acquisition has finished successfully.
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Resolved(Ok(())))
    }
}

/// Mount status of the developer disk image on the current device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MountState {
    #[default]
    Idle,
    Mounting,
    Mounted,
    Failed,
}

/// Cache of developer disk images keyed by target version.
#[derive(Debug, Clone)]
pub struct ImageCache {
    layout: Layout,
}

impl ImageCache {
    /// Construct new image cache inside documents root.
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Directory holding cached images.
    pub fn dir(&self) -> PathBuf {
        self.layout.dev_disks_dir()
    }

    /// Cache entry of target version.
    pub fn entry_dir(&self, target: &Version) -> PathBuf {
        self.layout.image_dir(target)
    }

    /// Image file of target version.
    pub fn image_path(&self, target: &Version) -> PathBuf {
        self.layout.image_path(target)
    }

    /// Check if target version has an entry that holds an image file.
    pub fn contains(&self, target: &Version) -> bool {
        self.image_path(target).is_file()
    }

    /// Move directory into cache as entry of target version.
    ///
    /// Any stale entry for the target is deleted first.
    ///
    /// # Errors
    ///
    /// - Return [`AcquireError::Io`] if stale entry cannot be removed, or new
    ///   entry cannot be moved into place.
    pub fn install(&self, staged: &Path, target: &Version) -> Result<PathBuf> {
        let entry = self.entry_dir(target);
        if entry.exists() {
            debug!("remove stale image entry {:?}", entry.display());
            fs::remove_dir_all(&entry).map_err(|err| AcquireError::Io {
                source: err,
                path: entry.clone(),
            })?;
        }

        fs::rename(staged, &entry).map_err(|err| AcquireError::Io {
            source: err,
            path: entry.clone(),
        })?;

        Ok(entry)
    }
}

/// Fetch developer disk images from a remote release index.
#[derive(Debug, Clone)]
pub struct ReleaseAcquirer {
    client: reqwest::Client,
    index_url: String,
    download_url: String,
    extract_root: PathBuf,
    cache: ImageCache,
    devices: DeviceLeases,
    targets: DeviceLeases,
    progress: Option<ProgressBar>,
}

impl ReleaseAcquirer {
    /// Construct new release acquirer.
    ///
    /// # Errors
    ///
    /// - Return [`AcquireError::Client`] if HTTP client cannot be built.
    pub fn new(settings: &ReleaseSettings, layout: &Layout) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(AcquireError::Client)?;

        Ok(Self {
            client,
            index_url: settings.index_url.clone(),
            download_url: settings.download_url.trim_end_matches('/').to_string(),
            extract_root: layout.extract_root(),
            cache: ImageCache::new(layout.clone()),
            devices: DeviceLeases::new("image acquisition"),
            targets: DeviceLeases::new("image installation"),
            progress: None,
        })
    }

    /// Report download progress through progress bar.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Share lease registries with other acquirers.
    ///
    /// `devices` is keyed by device identifier, `targets` by target version.
    pub fn with_leases(mut self, devices: DeviceLeases, targets: DeviceLeases) -> Self {
        self.devices = devices;
        self.targets = targets;
        self
    }

    /// Image cache that acquired images are installed into.
    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    /// Make sure image for target version is cached.
    ///
    /// Failures after acquisition started are logged, published through
    /// `state`, and returned as [`ImageStatus::Failed`].
    ///
    /// # Errors
    ///
    /// - Return [`AcquireError::Busy`] if an acquisition for device or for
    ///   target version is already in flight.
    /// - Return [`AcquireError::Io`] if image cache cannot be created.
    #[instrument(skip(self, state), level = "debug")]
    pub async fn ensure_image(
        &self,
        device_id: &str,
        target: Version,
        state: &watch::Sender<AcquireState>,
    ) -> Result<ImageStatus> {
        let _device = self.devices.acquire(device_id)?;

        // INVARIANT: Cache slot of target is only checked and replaced while
        //   its lease is held.
        let _target = self.targets.acquire(target.to_string())?;

        if self.cache.contains(&target) {
            info!("image for {target} already cached");
            state.send_replace(AcquireState::Resolved(Ok(())));
            return Ok(ImageStatus::AlreadyPresent);
        }

        let cache_dir = self.cache.dir();
        mkdirp::mkdirp(&cache_dir).map_err(|err| AcquireError::Io {
            source: err,
            path: cache_dir,
        })?;

        match self.acquire(target, state).await {
            Ok(resolved) => {
                info!("installed image {resolved} for target {target}");
                state.send_replace(AcquireState::Resolved(Ok(())));
                Ok(ImageStatus::Downloaded(resolved))
            }
            Err(error) => {
                warn!("failed to acquire image for {target}: {error}");
                let reason = error.to_string();
                state.send_replace(AcquireState::Resolved(Err(reason.clone())));
                Ok(ImageStatus::Failed(reason))
            }
        }
    }

    async fn acquire(&self, target: Version, state: &watch::Sender<AcquireState>) -> Result<Version> {
        let releases = self.fetch_index().await?;
        let resolved =
            resolve_best(target, releases.iter()).ok_or(AcquireError::Resolution { target })?;
        debug!("resolved {target} to release {resolved}");

        state.send_replace(AcquireState::InFlight);
        let url = format!("{}/{resolved}/{resolved}.zip", self.download_url);
        let archive = self.download(&url).await?;

        let extract_root = self.extract_root.clone();
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || {
            install_archive(archive.path(), &extract_root, resolved, target, &cache)
        })
        .await??;

        Ok(resolved)
    }

    #[instrument(skip(self), level = "debug")]
    async fn fetch_index(&self) -> Result<Vec<ReleaseDescriptor>> {
        let response = self.get(&self.index_url).await?;
        let body = response.text().await.map_err(|err| AcquireError::Network {
            source: err,
            url: self.index_url.clone(),
        })?;

        serde_json::from_str(&body).map_err(AcquireError::Decode)
    }

    #[instrument(skip(self), level = "debug")]
    async fn download(&self, url: &str) -> Result<NamedTempFile> {
        let response = self.get(url).await?;
        if let Some(progress) = &self.progress {
            progress.set_position(0);
            match response.content_length() {
                Some(length) => progress.set_length(length),
                None => progress.unset_length(),
            }
        }

        let mut archive = NamedTempFile::new().map_err(|err| AcquireError::Io {
            source: err,
            path: std::env::temp_dir(),
        })?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| AcquireError::Network {
                source: err,
                url: url.into(),
            })?;
            archive.write_all(&chunk).map_err(|err| AcquireError::Io {
                source: err,
                path: archive.path().to_path_buf(),
            })?;

            if let Some(progress) = &self.progress {
                progress.inc(chunk.len() as u64);
            }
        }

        archive.flush().map_err(|err| AcquireError::Io {
            source: err,
            path: archive.path().to_path_buf(),
        })?;

        if let Some(progress) = &self.progress {
            progress.finish();
        }

        Ok(archive)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| AcquireError::Network {
                source: err,
                url: url.into(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::Status {
                status,
                url: url.into(),
            });
        }

        Ok(response)
    }
}

fn install_archive(
    archive: &Path,
    extract_root: &Path,
    resolved: Version,
    target: Version,
    cache: &ImageCache,
) -> Result<()> {
    mkdirp::mkdirp(extract_root).map_err(|err| AcquireError::Io {
        source: err,
        path: extract_root.to_path_buf(),
    })?;

    // INVARIANT: Extraction is never incremental, always unpack into a
    //   brand new scratch directory.
    let scratch = tempfile::Builder::new()
        .prefix(&format!("{target}-"))
        .tempdir_in(extract_root)
        .map_err(|err| AcquireError::Io {
            source: err,
            path: extract_root.to_path_buf(),
        })?;

    let file = File::open(archive).map_err(|err| AcquireError::Io {
        source: err,
        path: archive.to_path_buf(),
    })?;
    ZipArchive::new(file)?.extract(scratch.path())?;

    let staged = scratch.path().join(resolved.to_string());
    if !staged.is_dir() {
        return Err(AcquireError::MissingVersionFolder { version: resolved });
    }

    if !staged.join(IMAGE_FILE).is_file() {
        return Err(AcquireError::MissingImage { path: staged });
    }

    let entry = cache.install(&staged, &target)?;
    debug!("image cached at {:?}", entry.display());

    if let Err(error) = scratch.close() {
        warn!("failed to clean up extracted archive: {error}");
    }

    Ok(())
}

/// Check if device still needs a developer disk image mounted.
///
/// Failure to ask the device counts as needing a mount.
pub fn needs_mounting<G>(gateway: &G, device_id: &str) -> bool
where
    G: DeviceToolGateway + ?Sized,
{
    gateway.needs_mounting(device_id).unwrap_or_else(|error| {
        warn!("cannot tell if {device_id} needs mounting: {error}");
        true
    })
}

/// Mount cached image matching device's version onto device.
///
/// Returns [`MountState::Failed`] if device explicitly refused the image.
///
/// # Errors
///
/// - Return [`MountError::Version`] if device reports a bad version.
/// - Return [`MountError::MissingImage`] if no image is cached for version.
/// - Return [`MountError::Gateway`] if mounting tool fails.
#[instrument(skip(gateway, cache), level = "debug")]
pub fn mount_image<G>(gateway: &G, cache: &ImageCache, device: &Device) -> Result<MountState, MountError>
where
    G: DeviceToolGateway + ?Sized,
{
    let target: Version = device.version.parse()?;
    let image = cache.image_path(&target);
    if !image.is_file() {
        return Err(MountError::MissingImage { path: image });
    }

    match gateway.mount_image(&device.id, &image)? {
        MountOutcome::Mounted => {
            info!("mounted developer disk image on {}", device.name);
            Ok(MountState::Mounted)
        }
        MountOutcome::ImageMountFailed => {
            warn!("{} refused developer disk image {target}", device.name);
            Ok(MountState::Failed)
        }
    }
}

/// Image acquisition error types.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// HTTP client cannot be constructed.
    #[error("failed to construct HTTP client")]
    Client(#[source] reqwest::Error),

    /// Request failed in transit.
    #[error("failed to fetch {url:?}")]
    Network {
        #[source]
        source: reqwest::Error,
        url: String,
    },

    /// Server answered with non-success status.
    #[error("fetching {url:?} returned {status}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    /// Release index is malformed.
    #[error("failed to decode release index")]
    Decode(#[source] serde_json::Error),

    /// No release is compatible with target.
    #[error("no release compatible with {target}")]
    Resolution { target: Version },

    /// Filesystem operation failed.
    #[error("filesystem operation failed at {:?}", path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Archive is unreadable.
    #[error(transparent)]
    Archive(#[from] ZipError),

    /// Archive lacks top-level folder named after resolved release.
    #[error("archive has no {version} folder")]
    MissingVersionFolder { version: Version },

    /// Release folder lacks image file.
    #[error("no {IMAGE_FILE} in {:?}", path.display())]
    MissingImage { path: PathBuf },

    /// Another acquisition for device is in flight.
    #[error(transparent)]
    Busy(#[from] Busy),

    /// Blocking installation task died.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// Image mounting error types.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    /// Device reports a version that cannot be parsed.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// No image cached for device version.
    #[error("no developer disk image at {:?}", path.display())]
    MissingImage { path: PathBuf },

    /// Mounting tool failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Friendly result alias :3
pub type Result<T, E = AcquireError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::{
        cell::RefCell,
        collections::BTreeMap,
        io::Cursor,
        sync::{Arc, Mutex},
    };
    use tempfile::TempDir;
    use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

    fn release_archive(folder: &str, with_image: bool) -> anyhow::Result<Vec<u8>> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.add_directory(format!("{folder}/"), options)?;
        if with_image {
            writer.start_file(format!("{folder}/{IMAGE_FILE}"), options)?;
            writer.write_all(b"disk image payload")?;
        }

        Ok(writer.finish()?.into_inner())
    }

    fn acquirer(server_url: &str, layout: &Layout) -> anyhow::Result<ReleaseAcquirer> {
        let settings = ReleaseSettings {
            index_url: format!("{server_url}/releases"),
            download_url: format!("{server_url}/download"),
        };

        Ok(ReleaseAcquirer::new(&settings, layout)?)
    }

    #[tokio::test]
    async fn cached_image_skips_network() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        let index = server
            .mock("GET", "/releases")
            .expect(0)
            .create_async()
            .await;

        let docs = TempDir::new()?;
        let layout = Layout::new(docs.path());
        let target = Version::new(16, 2, 0);
        fs::create_dir_all(layout.image_dir(&target))?;
        fs::write(layout.image_path(&target), "cached")?;

        let acquirer = acquirer(&server.url(), &layout)?;
        let (state, watch) = watch::channel(AcquireState::Pending);
        let status = acquirer.ensure_image("AAA", target, &state).await?;

        assert_eq!(status, ImageStatus::AlreadyPresent);
        assert!(watch.borrow().succeeded());
        index.assert_async().await;

        Ok(())
    }

    #[tokio::test]
    async fn download_installs_closest_release_under_target() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        let index = server
            .mock("GET", "/releases")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    {"tag_name": "15.0"},
                    {"tag_name": "16.0"},
                    {"tag_name": "16.1"},
                    {"tag_name": "16.3"},
                    {"tag_name": "17.0"}
                ])
                .to_string(),
            )
            .create_async()
            .await;
        let (state, watch) = watch::channel(AcquireState::Pending);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let payload = release_archive("16.1", true)?;
        let archive = {
            let watch = watch.clone();
            let seen = Arc::clone(&seen);
            server
                .mock("GET", "/download/16.1/16.1.zip")
                .with_status(200)
                .with_body_from_request(move |_| {
                    seen.lock().unwrap().push(watch.borrow().clone());
                    payload.clone()
                })
                .create_async()
                .await
        };

        let docs = TempDir::new()?;
        let layout = Layout::new(docs.path());
        let target = Version::new(16, 2, 0);

        let acquirer = acquirer(&server.url(), &layout)?;
        let status = acquirer.ensure_image("AAA", target, &state).await?;

        assert_eq!(status, ImageStatus::Downloaded(Version::new(16, 1, 0)));
        assert_eq!(*seen.lock().unwrap(), vec![AcquireState::InFlight]);
        assert_eq!(*watch.borrow(), AcquireState::Resolved(Ok(())));
        assert_eq!(
            fs::read_to_string(layout.image_path(&target))?,
            "disk image payload"
        );
        assert_eq!(fs::read_dir(layout.extract_root())?.count(), 0);
        index.assert_async().await;
        archive.assert_async().await;

        Ok(())
    }

    #[tokio::test]
    async fn stale_entry_is_replaced() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/releases")
            .with_status(200)
            .with_body(json!([{"tag_name": "16.2"}]).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/download/16.2/16.2.zip")
            .with_status(200)
            .with_body(release_archive("16.2", true)?)
            .create_async()
            .await;

        let docs = TempDir::new()?;
        let layout = Layout::new(docs.path());
        let target = Version::new(16, 2, 0);
        fs::create_dir_all(layout.image_dir(&target))?;
        fs::write(layout.image_dir(&target).join("leftover"), "junk")?;

        let acquirer = acquirer(&server.url(), &layout)?;
        let (state, _watch) = watch::channel(AcquireState::Pending);
        let status = acquirer.ensure_image("AAA", target, &state).await?;

        assert_eq!(status, ImageStatus::Downloaded(target));
        assert!(!layout.image_dir(&target).join("leftover").exists());
        assert!(layout.image_path(&target).is_file());

        Ok(())
    }

    #[tokio::test]
    async fn index_error_status_fails() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/releases")
            .with_status(403)
            .with_body(json!({"message": "API rate limit exceeded"}).to_string())
            .create_async()
            .await;

        let docs = TempDir::new()?;
        let layout = Layout::new(docs.path());
        let acquirer = acquirer(&server.url(), &layout)?;
        let (state, watch) = watch::channel(AcquireState::Pending);
        let status = acquirer
            .ensure_image("AAA", Version::new(16, 2, 0), &state)
            .await?;

        assert!(matches!(status, ImageStatus::Failed(_)));
        assert!(watch.borrow().is_loaded());
        assert!(!watch.borrow().succeeded());

        Ok(())
    }

    #[tokio::test]
    async fn malformed_index_fails() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/releases")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let docs = TempDir::new()?;
        let layout = Layout::new(docs.path());
        let acquirer = acquirer(&server.url(), &layout)?;
        let (state, _watch) = watch::channel(AcquireState::Pending);
        let status = acquirer
            .ensure_image("AAA", Version::new(16, 2, 0), &state)
            .await?;

        assert!(matches!(status, ImageStatus::Failed(_)));

        Ok(())
    }

    #[tokio::test]
    async fn no_compatible_release_fails_without_download() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/releases")
            .with_status(200)
            .with_body(json!([{"tag_name": "15.4"}, {"tag_name": "17.0"}]).to_string())
            .create_async()
            .await;
        let download = server
            .mock("GET", Matcher::Regex("^/download".into()))
            .expect(0)
            .create_async()
            .await;

        let docs = TempDir::new()?;
        let layout = Layout::new(docs.path());
        let acquirer = acquirer(&server.url(), &layout)?;
        let (state, _watch) = watch::channel(AcquireState::Pending);
        let status = acquirer
            .ensure_image("AAA", Version::new(16, 2, 0), &state)
            .await?;

        assert_eq!(
            status,
            ImageStatus::Failed(
                AcquireError::Resolution {
                    target: Version::new(16, 2, 0)
                }
                .to_string()
            )
        );
        download.assert_async().await;

        Ok(())
    }

    #[tokio::test]
    async fn archive_without_version_folder_fails() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/releases")
            .with_status(200)
            .with_body(json!([{"tag_name": "16.2"}]).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/download/16.2/16.2.zip")
            .with_status(200)
            .with_body(release_archive("Something", true)?)
            .create_async()
            .await;

        let docs = TempDir::new()?;
        let layout = Layout::new(docs.path());
        let target = Version::new(16, 2, 0);
        let acquirer = acquirer(&server.url(), &layout)?;
        let (state, watch) = watch::channel(AcquireState::Pending);
        let status = acquirer.ensure_image("AAA", target, &state).await?;

        assert!(matches!(status, ImageStatus::Failed(_)));
        assert!(!watch.borrow().succeeded());
        assert!(!layout.image_dir(&target).exists());

        Ok(())
    }

    #[tokio::test]
    async fn busy_device_is_rejected() -> anyhow::Result<()> {
        let docs = TempDir::new()?;
        let layout = Layout::new(docs.path());
        let acquirer = acquirer("http://127.0.0.1:9", &layout)?;
        let _lease = acquirer.devices.acquire("AAA")?;

        let (state, watch) = watch::channel(AcquireState::Pending);
        let result = acquirer
            .ensure_image("AAA", Version::new(16, 2, 0), &state)
            .await;

        assert!(matches!(result, Err(AcquireError::Busy(_))));
        assert_eq!(*watch.borrow(), AcquireState::Pending);

        Ok(())
    }

    #[tokio::test]
    async fn same_target_on_another_device_is_rejected() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        let index = server
            .mock("GET", "/releases")
            .with_status(200)
            .with_body(json!([{"tag_name": "16.2"}]).to_string())
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/download/16.2/16.2.zip")
            .with_status(200)
            .with_body(release_archive("16.2", true)?)
            .create_async()
            .await;

        let docs = TempDir::new()?;
        let layout = Layout::new(docs.path());
        let target = Version::new(16, 2, 0);
        let acquirer = acquirer(&server.url(), &layout)?;
        let (first_state, _first) = watch::channel(AcquireState::Pending);
        let (second_state, second) = watch::channel(AcquireState::Pending);

        let (first, racing) = tokio::join!(
            acquirer.ensure_image("AAA", target, &first_state),
            acquirer.ensure_image("BBB", target, &second_state),
        );

        assert_eq!(first?, ImageStatus::Downloaded(target));
        assert!(matches!(racing, Err(AcquireError::Busy(_))));
        assert_eq!(*second.borrow(), AcquireState::Pending);
        assert!(layout.image_path(&target).is_file());
        assert!(!acquirer.targets.is_held("16.2"));
        index.assert_async().await;

        Ok(())
    }

    #[tokio::test]
    async fn shared_leases_span_acquirers() -> anyhow::Result<()> {
        let docs = TempDir::new()?;
        let layout = Layout::new(docs.path());
        let first = acquirer("http://127.0.0.1:9", &layout)?;
        let second = acquirer("http://127.0.0.1:9", &layout)?
            .with_leases(first.devices.clone(), first.targets.clone());
        let _lease = first.targets.acquire("16.2")?;

        let (state, watch) = watch::channel(AcquireState::Pending);
        let result = second
            .ensure_image("BBB", Version::new(16, 2, 0), &state)
            .await;

        assert!(matches!(result, Err(AcquireError::Busy(_))));
        assert_eq!(*watch.borrow(), AcquireState::Pending);
        assert!(!first.devices.is_held("BBB"));

        Ok(())
    }

    #[tokio::test]
    async fn progress_restarts_for_download_without_length() -> anyhow::Result<()> {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/releases")
            .with_status(200)
            .with_body(json!([{"tag_name": "16.2"}]).to_string())
            .create_async()
            .await;
        let payload = release_archive("16.2", true)?;
        let size = payload.len() as u64;
        server
            .mock("GET", "/download/16.2/16.2.zip")
            .with_status(200)
            .with_chunked_body(move |writer| writer.write_all(&payload))
            .create_async()
            .await;

        let docs = TempDir::new()?;
        let layout = Layout::new(docs.path());
        let progress = ProgressBar::hidden();
        progress.set_length(10);
        progress.set_position(4_096);

        let acquirer = acquirer(&server.url(), &layout)?.with_progress(progress.clone());
        let (state, _watch) = watch::channel(AcquireState::Pending);
        let status = acquirer
            .ensure_image("AAA", Version::new(16, 2, 0), &state)
            .await?;

        assert_eq!(status, ImageStatus::Downloaded(Version::new(16, 2, 0)));
        assert_eq!(progress.length(), None);
        assert_eq!(progress.position(), size);

        Ok(())
    }

    #[test]
    fn acquire_state_flags() {
        assert!(!AcquireState::Pending.is_loaded());
        assert!(AcquireState::InFlight.is_downloading());
        assert!(AcquireState::Resolved(Ok(())).succeeded());
        assert!(!AcquireState::Resolved(Err("nope".into())).succeeded());
        assert!(AcquireState::Resolved(Err("nope".into())).is_loaded());
    }

    struct FakeMounter {
        outcome: MountOutcome,
        mounted: RefCell<Vec<PathBuf>>,
    }

    impl DeviceToolGateway for FakeMounter {
        fn device_ids(&self) -> crate::device::Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn device_name(&self, _: &str) -> crate::device::Result<String> {
            Ok(String::new())
        }

        fn device_version(&self, _: &str) -> crate::device::Result<String> {
            Ok(String::new())
        }

        fn mount_image(&self, _: &str, image: &Path) -> crate::device::Result<MountOutcome> {
            self.mounted.borrow_mut().push(image.to_path_buf());
            Ok(self.outcome)
        }

        fn needs_mounting(&self, _: &str) -> crate::device::Result<bool> {
            Err(GatewayError::ToolFailed {
                tool: "locsimUtils",
                output: "ERROR".into(),
            })
        }

        fn generate_backup(&self, _: &Path, _: &Path) -> crate::device::Result<()> {
            Ok(())
        }

        fn restore_backup(&self, _: &str, _: &Path) -> crate::device::Result<()> {
            Ok(())
        }

        fn set_location(&self, _: &str, _: f64, _: f64) -> crate::device::Result<()> {
            Ok(())
        }

        fn reset_location(&self, _: &str) -> crate::device::Result<()> {
            Ok(())
        }

        fn home_screen_apps(&self, _: &str) -> crate::device::Result<BTreeMap<String, String>> {
            Ok(BTreeMap::new())
        }

        fn home_screen_pages(&self, _: &str) -> crate::device::Result<u32> {
            Ok(1)
        }
    }

    fn device() -> Device {
        Device {
            id: "AAA".into(),
            name: "phone".into(),
            version: "16.2".into(),
        }
    }

    #[test]
    fn mount_uses_cached_image_of_device_version() -> anyhow::Result<()> {
        let docs = TempDir::new()?;
        let cache = ImageCache::new(Layout::new(docs.path()));
        let target = Version::new(16, 2, 0);
        fs::create_dir_all(cache.entry_dir(&target))?;
        fs::write(cache.image_path(&target), "image")?;

        let gateway = FakeMounter {
            outcome: MountOutcome::Mounted,
            mounted: RefCell::default(),
        };
        let state = mount_image(&gateway, &cache, &device())?;

        assert_eq!(state, MountState::Mounted);
        assert_eq!(*gateway.mounted.borrow(), vec![cache.image_path(&target)]);

        Ok(())
    }

    #[test]
    fn mount_refusal_is_failed_state() -> anyhow::Result<()> {
        let docs = TempDir::new()?;
        let cache = ImageCache::new(Layout::new(docs.path()));
        let target = Version::new(16, 2, 0);
        fs::create_dir_all(cache.entry_dir(&target))?;
        fs::write(cache.image_path(&target), "image")?;

        let gateway = FakeMounter {
            outcome: MountOutcome::ImageMountFailed,
            mounted: RefCell::default(),
        };

        assert_eq!(mount_image(&gateway, &cache, &device())?, MountState::Failed);
        assert!(needs_mounting(&gateway, "AAA"));

        Ok(())
    }

    #[test]
    fn mount_without_cached_image_errors() -> anyhow::Result<()> {
        let docs = TempDir::new()?;
        let cache = ImageCache::new(Layout::new(docs.path()));
        let gateway = FakeMounter {
            outcome: MountOutcome::Mounted,
            mounted: RefCell::default(),
        };

        let result = mount_image(&gateway, &cache, &device());

        assert!(matches!(result, Err(MountError::MissingImage { .. })));
        assert!(gateway.mounted.borrow().is_empty());

        Ok(())
    }
}
