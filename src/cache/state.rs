//! Cache state classification
//!
//! Each cached layer is compared against the previous image's metadata and
//! lands in exactly one state. Checks run in order, first match wins:
//!
//! | # | Condition | State |
//! |---|-----------|-------|
//! | 1 | no readable `<layer>.toml` | [`CacheState::NoCacheAvailable`] |
//! | 2 | buildpack not in previous metadata | `StaleLaunch/BuildNoMetadata` (by cached `launch`) |
//! | 3 | layer not in buildpack's metadata | `StaleLaunch/BuildNoMetadata` (by cached `launch`) |
//! | 4 | no readable `<layer>.sha` | [`CacheState::NoCacheAvailable`] |
//! | 5 | `.sha` differs from recorded sha | `OutdatedBuild/Launch` (by recorded `build`) |
//! | 6 | otherwise | [`CacheState::UpToDate`] |

use crate::cache::entry::CacheEntry;
use crate::metadata::BuildpackMetadata;
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::debug;

/// Reconciliation outcome for one cached layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheState {
    /// Nothing usable on disk; metadata may be restored
    NoCacheAvailable,
    /// Unverifiable build-only cache, kept as is
    StaleBuildNoMetadata,
    /// Unverifiable launch cache, removed
    StaleLaunchNoMetadata,
    /// Content changed and the layer is rebuilt, removed
    OutdatedBuild,
    /// Content changed, removed and metadata restored
    OutdatedLaunch,
    /// Cache matches the previous image, kept as is
    UpToDate,
}

impl CacheState {
    /// Classify `entry` against the previous image's record of its buildpack
    pub fn classify(entry: &CacheEntry, previous: Option<&BuildpackMetadata>) -> Self {
        let Some(cached) = entry.cached_metadata() else {
            return Self::NoCacheAvailable;
        };

        let stale = if cached.launch {
            Self::StaleLaunchNoMetadata
        } else {
            Self::StaleBuildNoMetadata
        };

        let Some(buildpack) = previous else {
            debug!("Buildpack {} not in previous metadata", entry.buildpack());
            return stale;
        };

        let Some(record) = buildpack.layer(entry.name()) else {
            debug!(
                "Layer {}/{} not in previous metadata",
                entry.buildpack(),
                entry.name()
            );
            return stale;
        };

        let Some(sha) = entry.recorded_sha() else {
            return Self::NoCacheAvailable;
        };

        if sha != record.sha {
            if record.build {
                Self::OutdatedBuild
            } else {
                Self::OutdatedLaunch
            }
        } else {
            Self::UpToDate
        }
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoCacheAvailable => "no-cache-available",
            Self::StaleBuildNoMetadata => "stale-build-no-metadata",
            Self::StaleLaunchNoMetadata => "stale-launch-no-metadata",
            Self::OutdatedBuild => "outdated-build",
            Self::OutdatedLaunch => "outdated-launch",
            Self::UpToDate => "cache-up-to-date",
        };
        write!(f, "{}", name)
    }
}

impl Serialize for CacheState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
