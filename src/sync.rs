// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Timestamp-aware directory merging.
//!
//! Workspaces are seeded from a template tree, and enabled tweaks are staged
//! from a workspace into a scratch directory. Both jobs boil down to merging
//! one directory tree into another without clobbering newer content.
//!
//! # Merge Semantics
//!
//! Entries missing from the destination are copied wholesale. Directories
//! present on both sides are merged recursively, never replaced. Files present
//! on both sides are replaced only when the source file has a strictly newer
//! modification time. Copied files keep the modification time of their source,
//! which makes a merge idempotent: running it twice over unchanged inputs
//! copies nothing the second time.
//!
//! Hidden entries at merge level, i.e., names starting with ".", are ignored.
//!
//! Any failure aborts the merge. Whatever was copied before the failure stays
//! in place.

use std::{
    fs::{self, File, Metadata},
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::{debug, instrument, trace};

/// Tally of work done by a merge.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Files written to the destination.
    pub copied: usize,

    /// Files left untouched because the destination was as new or newer.
    pub skipped: usize,
}

/// Merge source directory tree into destination directory tree.
///
/// Destination is created along with any missing parents.
///
/// # Errors
///
/// - Return [`SyncError`] variant describing the first I/O failure hit.
/// - Return [`SyncError::KindMismatch`] if a file on one side is a directory
///   on the other.
#[instrument(skip_all, level = "debug")]
pub fn merge(source: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<MergeReport> {
    let (source, destination) = (source.as_ref(), destination.as_ref());
    debug!("merge {:?} into {:?}", source.display(), destination.display());

    let mut report = MergeReport::default();
    merge_into(source, destination, &mut report)?;
    debug!(
        "merge done: {} copied, {} skipped",
        report.copied, report.skipped
    );

    Ok(report)
}

fn merge_into(source: &Path, destination: &Path, report: &mut MergeReport) -> Result<()> {
    create_dir(destination)?;

    for from in visible_entries(source)? {
        // INVARIANT: Entries from a directory listing always have a file name.
        let Some(name) = from.file_name() else {
            continue;
        };
        let to = destination.join(name);
        let from_meta = metadata(&from)?;

        let Some(to_meta) = existing_metadata(&to)? else {
            copy_entry(&from, &to, &from_meta, report)?;
            continue;
        };

        match (from_meta.is_dir(), to_meta.is_dir()) {
            (true, true) => merge_into(&from, &to, report)?,
            (false, false) => {
                if modified(&to, &to_meta)? < modified(&from, &from_meta)? {
                    trace!("replace older {:?}", to.display());
                    fs::remove_file(&to).map_err(|err| SyncError::Remove {
                        source: err,
                        path: to.clone(),
                    })?;
                    copy_file(&from, &to, &from_meta)?;
                    report.copied += 1;
                } else {
                    trace!("keep {:?}", to.display());
                    report.skipped += 1;
                }
            }
            _ => return Err(SyncError::KindMismatch { path: to }),
        }
    }

    Ok(())
}

fn copy_entry(from: &Path, to: &Path, meta: &Metadata, report: &mut MergeReport) -> Result<()> {
    if !meta.is_dir() {
        copy_file(from, to, meta)?;
        report.copied += 1;
        return Ok(());
    }

    create_dir(to)?;
    let entries = fs::read_dir(from).map_err(|err| SyncError::ReadDir {
        source: err,
        path: from.to_path_buf(),
    })?;
    for entry in entries {
        let entry = entry.map_err(|err| SyncError::ReadDir {
            source: err,
            path: from.to_path_buf(),
        })?;
        let child = entry.path();
        let child_meta = metadata(&child)?;
        copy_entry(&child, &to.join(entry.file_name()), &child_meta, report)?;
    }

    Ok(())
}

fn copy_file(from: &Path, to: &Path, meta: &Metadata) -> Result<()> {
    let copy_error = |err| SyncError::Copy {
        source: err,
        from: from.to_path_buf(),
        to: to.to_path_buf(),
    };

    fs::copy(from, to).map_err(copy_error)?;

    // INVARIANT: Copied file carries source modification time.
    let mtime = modified(from, meta)?;
    File::open(to)
        .and_then(|file| file.set_modified(mtime))
        .map_err(copy_error)?;

    Ok(())
}

fn visible_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_error = |err| SyncError::ReadDir {
        source: err,
        path: dir.to_path_buf(),
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        entries.push(entry.path());
    }
    entries.sort();

    Ok(entries)
}

fn create_dir(path: &Path) -> Result<()> {
    mkdirp::mkdirp(path).map_err(|err| SyncError::CreateDir {
        source: err,
        path: path.to_path_buf(),
    })?;

    Ok(())
}

fn metadata(path: &Path) -> Result<Metadata> {
    fs::metadata(path).map_err(|err| SyncError::Metadata {
        source: err,
        path: path.to_path_buf(),
    })
}

fn existing_metadata(path: &Path) -> Result<Option<Metadata>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(SyncError::Metadata {
            source: err,
            path: path.to_path_buf(),
        }),
    }
}

fn modified(path: &Path, meta: &Metadata) -> Result<SystemTime> {
    meta.modified().map_err(|err| SyncError::Metadata {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Directory merge error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Directory cannot be listed.
    #[error("failed to read directory {:?}", path.display())]
    ReadDir {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// File metadata cannot be queried.
    #[error("failed to query metadata of {:?}", path.display())]
    Metadata {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// File cannot be copied.
    #[error("failed to copy {:?} to {:?}", from.display(), to.display())]
    Copy {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    /// Outdated destination file cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// File on one side of the merge is a directory on the other.
    #[error("cannot merge file and directory at {:?}", path.display())]
    KindMismatch { path: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
