// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Tweak categories.
//!
//! Every tweak owns one folder at the top-level of a device workspace. The
//! files in that folder are laid out exactly as they should appear in the
//! staging area, so applying a tweak is just a matter of merging its folder.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Tweak category that can be enabled for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tweak {
    Footnote,
    StatusBar,
    SpringboardOptions,
    SkipSetup,
    Themes,
    DynamicIsland,
    InternalOptions,
}

impl Tweak {
    /// All known tweaks.
    pub const ALL: [Tweak; 7] = [
        Tweak::Footnote,
        Tweak::StatusBar,
        Tweak::SpringboardOptions,
        Tweak::SkipSetup,
        Tweak::Themes,
        Tweak::DynamicIsland,
        Tweak::InternalOptions,
    ];

    /// Name of workspace folder holding tweak's files.
    pub fn folder_name(&self) -> &'static str {
        match self {
            Self::Footnote => "Footnote",
            Self::StatusBar => "StatusBar",
            Self::SpringboardOptions => "SpringboardOptions",
            Self::SkipSetup => "SkipSetup",
            Self::Themes => "AppliedTheme",
            Self::DynamicIsland => "DynamicIsland",
            Self::InternalOptions => "InternalOptions",
        }
    }

    /// Short command-line name of tweak.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Footnote => "footnote",
            Self::StatusBar => "status-bar",
            Self::SpringboardOptions => "springboard-options",
            Self::SkipSetup => "skip-setup",
            Self::Themes => "themes",
            Self::DynamicIsland => "dynamic-island",
            Self::InternalOptions => "internal-options",
        }
    }
}

impl Display for Tweak {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.name())
    }
}

impl FromStr for Tweak {
    type Err = UnknownTweak;

    /// Parse tweak from its command-line name or its folder name.
    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tweak| {
                tweak.name().eq_ignore_ascii_case(data)
                    || tweak.folder_name().eq_ignore_ascii_case(data)
            })
            .ok_or_else(|| UnknownTweak(data.into()))
    }
}

/// Name does not match any known tweak.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown tweak {0:?}")]
pub struct UnknownTweak(String);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("status-bar", Tweak::StatusBar; "command line name")]
    #[test_case("StatusBar", Tweak::StatusBar; "folder name")]
    #[test_case("AppliedTheme", Tweak::Themes; "renamed folder")]
    #[test_case("FOOTNOTE", Tweak::Footnote; "ignores case")]
    #[test]
    fn parse_tweak(input: &str, expect: Tweak) -> anyhow::Result<()> {
        use pretty_assertions::assert_eq;

        assert_eq!(input.parse::<Tweak>()?, expect);
        Ok(())
    }

    #[test]
    fn parse_unknown_tweak() {
        assert_eq!(
            "wallpaper".parse::<Tweak>(),
            Err(UnknownTweak("wallpaper".into()))
        );
    }

    #[test]
    fn names_round_trip() {
        for tweak in Tweak::ALL {
            assert_eq!(tweak.to_string().parse::<Tweak>(), Ok(tweak));
        }
    }
}
