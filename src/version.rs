// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version parsing and release resolution.
//!
//! Developer disk images are published as releases tagged by the OS version
//! they were built for. A device rarely runs a version that has an exact
//! matching release, so we need a way to pick the best available image for
//! the version a device reports.
//!
//! # Resolution Rules
//!
//! Only releases that share the target's major version are usable. Among
//! those, an exact match always wins. Failing that, the first release sharing
//! the target's minor version is taken, since images are compatible across
//! patch releases. Otherwise the closest release older than the target is
//! used as a best effort fallback.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use tracing::debug;

/// Dotted numeric version.
///
/// Ordering is lexicographic over major, minor, and patch components.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Construct new version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    /// Parse version from dotted numeric string.
    ///
    /// Accepts an optional leading "v". Missing minor and patch components
    /// default to zero, e.g., "16" parses as 16.0.0.
    ///
    /// # Errors
    ///
    /// - Return [`VersionError`] if string is empty, has more than three
    ///   components, or contains a non-numeric component.
    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let trimmed = data.trim().trim_start_matches(['v', 'V']);
        if trimmed.is_empty() {
            return Err(VersionError::new(data));
        }

        let mut components = [0u32; 3];
        for (index, part) in trimmed.split('.').enumerate() {
            if index >= components.len() {
                return Err(VersionError::new(data));
            }

            components[index] = part.parse().map_err(|_| VersionError::new(data))?;
        }

        Ok(Self::new(components[0], components[1], components[2]))
    }
}

impl Display for Version {
    /// Format version the way release tags are written.
    ///
    /// Patch component is omitted when zero, e.g., "16.2" not "16.2.0".
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.patch == 0 {
            write!(fmt, "{}.{}", self.major, self.minor)
        } else {
            write!(fmt, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

/// Available disk image release as listed by the remote release index.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ReleaseDescriptor {
    /// Tag naming the release, e.g., "16.4".
    pub tag_name: String,
}

impl ReleaseDescriptor {
    /// Construct new release descriptor.
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
        }
    }
}

impl AsRef<str> for ReleaseDescriptor {
    fn as_ref(&self) -> &str {
        self.tag_name.as_str()
    }
}

/// Select best release for target version.
///
/// Performs a single pass over candidate tags in any order. Returns `None` if
/// no candidate shares the target's major version. Candidates that fail to
/// parse are skipped.
///
/// Precedence is exact match, then first same-minor match, then the greatest
/// candidate strictly older than the target. When two older candidates are
/// equal, the first one seen is kept.
pub fn resolve_best(
    target: Version,
    candidates: impl IntoIterator<Item = impl AsRef<str>>,
) -> Option<Version> {
    let mut same_minor: Option<Version> = None;
    let mut predecessor: Option<Version> = None;

    for candidate in candidates {
        let tag = candidate.as_ref();
        let version = match tag.parse::<Version>() {
            Ok(version) => version,
            Err(error) => {
                debug!("skip release {tag:?}: {error}");
                continue;
            }
        };

        if version.major != target.major {
            continue;
        }

        if version == target {
            return Some(version);
        }

        if version.minor == target.minor {
            same_minor.get_or_insert(version);
            continue;
        }

        if version < target && predecessor.is_none_or(|best| version > best) {
            predecessor = Some(version);
        }
    }

    same_minor.or(predecessor)
}

/// Version string could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid version string {input:?}")]
pub struct VersionError {
    input: String,
}

impl VersionError {
    fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}
