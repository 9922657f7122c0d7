//! Cache reconciliation against a previous image
//!
//! Runs before buildpacks execute. Cached layer directories that can no
//! longer be trusted are removed, and metadata for layers the previous image
//! still carries is restored so buildpacks see the declared shape.

use crate::cache::entry::{remove_buildpack_dir, CacheEntry};
use crate::cache::scan::{cached_buildpacks, layer_names};
use crate::cache::state::CacheState;
use crate::error::LifecycleResult;
use crate::image::Image;
use crate::metadata::{labels, AppImageMetadata, BuildpackGroup, BuildpackMetadata};
use serde::Serialize;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What happened to one cached layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerOutcome {
    pub buildpack: String,
    pub layer: String,
    pub state: CacheState,
    /// Directory and marker files were deleted
    pub removed: bool,
    /// `<layer>.toml` was rewritten from the previous image
    pub restored: bool,
}

/// Why an analyze run did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// No previous image, or it could not be read
    ImageNotFound,
    /// The previous image has no usable build metadata label
    MetadataUnavailable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageNotFound => write!(f, "previous image not found"),
            Self::MetadataUnavailable => write!(f, "previous image has no usable build metadata"),
        }
    }
}

/// Result of an analyze run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    /// Set when analysis did not run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    /// Buildpack folders removed because they are not in the group
    pub removed_buildpacks: Vec<String>,
    /// Per-layer outcomes, in group order then layer name order
    pub layers: Vec<LayerOutcome>,
}

impl AnalysisReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    /// Outcome for a buildpack layer
    pub fn outcome(&self, buildpack: &str, layer: &str) -> Option<&LayerOutcome> {
        self.layers
            .iter()
            .find(|o| o.buildpack == buildpack && o.layer == layer)
    }
}

/// Reconciles the launch directory's layer caches
pub struct Analyzer<'a> {
    group: &'a BuildpackGroup,
    launch_dir: PathBuf,
    app_dir: Option<PathBuf>,
}

impl<'a> Analyzer<'a> {
    pub fn new(group: &'a BuildpackGroup, launch_dir: impl Into<PathBuf>) -> Self {
        Self {
            group,
            launch_dir: launch_dir.into(),
            app_dir: None,
        }
    }

    /// Keep the application directory when it lives inside the launch
    /// directory; it is not a buildpack cache.
    pub fn with_app_dir(mut self, app_dir: impl Into<PathBuf>) -> Self {
        self.app_dir = Some(app_dir.into());
        self
    }

    pub fn launch_dir(&self) -> &Path {
        &self.launch_dir
    }

    /// Analyze against a previous image. A missing image, or one without
    /// usable metadata, skips analysis with a warning.
    pub fn analyze(&self, previous: Option<&Image>) -> LifecycleResult<AnalysisReport> {
        let Some(image) = previous else {
            warn!("Skipping analyze: previous image not found or requires authentication");
            return Ok(AnalysisReport::skipped(SkipReason::ImageNotFound));
        };

        match AppImageMetadata::from_label(image.label(labels::BUILD_METADATA)) {
            Some(metadata) => self.analyze_metadata(&metadata),
            None => {
                warn!("Skipping analyze: previous image has no usable metadata");
                Ok(AnalysisReport::skipped(SkipReason::MetadataUnavailable))
            }
        }
    }

    /// Analyze against already decoded previous metadata
    pub fn analyze_metadata(
        &self,
        metadata: &AppImageMetadata,
    ) -> LifecycleResult<AnalysisReport> {
        let mut report = AnalysisReport {
            removed_buildpacks: self.remove_buildpacks_not_in_group()?,
            ..Default::default()
        };

        for folder in self.group.folder_names() {
            let previous = metadata.buildpack(&folder);
            let bp_dir = self.launch_dir.join(&folder);

            for layer in layer_names(&bp_dir, previous)? {
                let entry = CacheEntry::new(&self.launch_dir, &folder, &layer);
                report.layers.push(self.reconcile(&entry, previous)?);
            }
        }

        info!(
            "Analyzed {} layers, removed {} buildpack caches",
            report.layers.len(),
            report.removed_buildpacks.len()
        );
        Ok(report)
    }

    fn remove_buildpacks_not_in_group(&self) -> LifecycleResult<Vec<String>> {
        let app_folder = self.app_folder();
        let mut removed = Vec::new();

        for folder in cached_buildpacks(&self.launch_dir)? {
            if self.group.contains_folder(&folder) {
                continue;
            }
            if app_folder.is_some_and(|app| app == OsStr::new(&folder)) {
                debug!("Keeping app directory {}", folder);
                continue;
            }
            remove_buildpack_dir(&self.launch_dir.join(&folder))?;
            removed.push(folder);
        }
        Ok(removed)
    }

    /// Folder name of the app directory when it is a direct child of the
    /// launch directory
    fn app_folder(&self) -> Option<&OsStr> {
        let app_dir = self.app_dir.as_deref()?;
        if app_dir.parent() == Some(self.launch_dir.as_path()) {
            app_dir.file_name()
        } else {
            None
        }
    }

    fn reconcile(
        &self,
        entry: &CacheEntry,
        previous: Option<&BuildpackMetadata>,
    ) -> LifecycleResult<LayerOutcome> {
        let state = CacheState::classify(entry, previous);
        debug!("{}/{}: {}", entry.buildpack(), entry.name(), state);

        let (removed, restored) = match state {
            CacheState::NoCacheAvailable => (false, restore(entry, previous)?),
            CacheState::StaleBuildNoMetadata => (false, false),
            CacheState::StaleLaunchNoMetadata => {
                entry.remove()?;
                (true, false)
            }
            CacheState::OutdatedBuild => {
                entry.remove()?;
                (true, false)
            }
            CacheState::OutdatedLaunch => {
                entry.remove()?;
                (true, restore(entry, previous)?)
            }
            CacheState::UpToDate => (false, false),
        };

        Ok(LayerOutcome {
            buildpack: entry.buildpack().to_string(),
            layer: entry.name().to_string(),
            state,
            removed,
            restored,
        })
    }
}

/// Write back the previous record of a launch layer. Build layers are
/// rebuilt, never restored.
fn restore(entry: &CacheEntry, previous: Option<&BuildpackMetadata>) -> LifecycleResult<bool> {
    let Some(record) = previous.and_then(|bp| bp.layer(entry.name())) else {
        return Ok(false);
    };
    if !record.is_launch_only() {
        debug!(
            "Not restoring build layer {}/{}",
            entry.buildpack(),
            entry.name()
        );
        return Ok(false);
    }
    entry.restore(record)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{LayerMetadata, StackMetadata};
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    fn record(sha: &str, build: bool) -> LayerMetadata {
        LayerMetadata {
            sha: sha.to_string(),
            build,
            launch: !build,
            data: Some(toml::Value::Table(toml::Table::from_iter([(
                "version".to_string(),
                toml::Value::String("1.0".to_string()),
            )]))),
        }
    }

    fn metadata(layers: &[(&str, &str, LayerMetadata)]) -> AppImageMetadata {
        let mut buildpacks: Vec<BuildpackMetadata> = Vec::new();
        for (bp, layer, meta) in layers {
            if !buildpacks.iter().any(|b| b.id == *bp) {
                buildpacks.push(BuildpackMetadata::new(*bp));
            }
            let entry = buildpacks.iter_mut().find(|b| b.id == *bp).unwrap();
            entry.layers.insert(layer.to_string(), meta.clone());
        }
        AppImageMetadata {
            buildpacks,
            stack: StackMetadata::default(),
        }
    }

    fn cache_layer(launch: &Path, bp: &str, layer: &str, toml: &str, sha: Option<&str>) {
        let entry = CacheEntry::new(launch, bp, layer);
        fs::create_dir_all(entry.dir()).unwrap();
        fs::write(entry.dir().join("content.txt"), layer).unwrap();
        fs::write(entry.toml_path(), toml).unwrap();
        if let Some(sha) = sha {
            fs::write(entry.sha_path(), sha).unwrap();
        }
    }

    fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(dir)
            .into_iter()
            .map(Result::unwrap)
            .map(|e| {
                let contents = if e.file_type().is_file() {
                    fs::read(e.path()).unwrap()
                } else {
                    Vec::new()
                };
                (e.path().to_path_buf(), contents)
            })
            .collect()
    }

    #[test]
    fn up_to_date_cache_is_untouched() {
        let dir = TempDir::new().unwrap();
        cache_layer(dir.path(), "bp1", "cache1", "launch = true\n", Some("abc"));
        let before = snapshot(dir.path());

        let group = BuildpackGroup::from_ids(["bp1"]);
        let report = Analyzer::new(&group, dir.path())
            .analyze_metadata(&metadata(&[("bp1", "cache1", record("abc", false))]))
            .unwrap();

        assert_eq!(
            report.outcome("bp1", "cache1").unwrap().state,
            CacheState::UpToDate
        );
        assert_eq!(snapshot(dir.path()), before);
    }

    #[test]
    fn outdated_build_layer_is_removed() {
        let dir = TempDir::new().unwrap();
        cache_layer(dir.path(), "bp1", "cache1", "build = true\n", Some("abc"));

        let group = BuildpackGroup::from_ids(["bp1"]);
        let report = Analyzer::new(&group, dir.path())
            .analyze_metadata(&metadata(&[("bp1", "cache1", record("xyz", true))]))
            .unwrap();

        let outcome = report.outcome("bp1", "cache1").unwrap();
        assert_eq!(outcome.state, CacheState::OutdatedBuild);
        assert!(outcome.removed);
        assert!(!outcome.restored);
        let bp = dir.path().join("bp1");
        assert!(!bp.join("cache1").exists());
        assert!(!bp.join("cache1.sha").exists());
        assert!(!bp.join("cache1.toml").exists());
    }

    #[test]
    fn outdated_launch_layer_restores_metadata() {
        let dir = TempDir::new().unwrap();
        cache_layer(dir.path(), "bp1", "cache1", "launch = true\n", Some("abc"));
        let previous = record("xyz", false);

        let group = BuildpackGroup::from_ids(["bp1"]);
        let report = Analyzer::new(&group, dir.path())
            .analyze_metadata(&metadata(&[("bp1", "cache1", previous.clone())]))
            .unwrap();

        let outcome = report.outcome("bp1", "cache1").unwrap();
        assert_eq!(outcome.state, CacheState::OutdatedLaunch);
        assert!(outcome.restored);
        let bp = dir.path().join("bp1");
        assert!(!bp.join("cache1").exists());
        assert!(!bp.join("cache1.sha").exists());
        assert_eq!(
            LayerMetadata::from_file(&bp.join("cache1.toml")).unwrap(),
            previous
        );
    }

    #[test]
    fn buildpacks_not_in_group_are_removed() {
        let dir = TempDir::new().unwrap();
        cache_layer(dir.path(), "bp1", "cache1", "launch = true\n", Some("abc"));
        cache_layer(dir.path(), "bp2", "cache2", "launch = true\n", Some("abc"));
        fs::create_dir_all(dir.path().join("app")).unwrap();

        let group = BuildpackGroup::from_ids(["bp1"]);
        let report = Analyzer::new(&group, dir.path())
            .with_app_dir(dir.path().join("app"))
            .analyze_metadata(&metadata(&[("bp1", "cache1", record("abc", false))]))
            .unwrap();

        assert_eq!(report.removed_buildpacks, vec!["bp2"]);
        assert!(!dir.path().join("bp2").exists());
        assert!(dir.path().join("app").exists());
        assert!(dir.path().join("bp1").join("cache1").exists());
    }

    #[test]
    fn unverifiable_launch_cache_is_removed() {
        let dir = TempDir::new().unwrap();
        cache_layer(dir.path(), "bp1", "launch1", "launch = true\n", Some("abc"));
        cache_layer(dir.path(), "bp1", "build1", "build = true\n", Some("abc"));

        let group = BuildpackGroup::from_ids(["bp1"]);
        let report = Analyzer::new(&group, dir.path())
            .analyze_metadata(&metadata(&[("bp1", "other", record("abc", false))]))
            .unwrap();

        assert_eq!(
            report.outcome("bp1", "launch1").unwrap().state,
            CacheState::StaleLaunchNoMetadata
        );
        assert_eq!(
            report.outcome("bp1", "build1").unwrap().state,
            CacheState::StaleBuildNoMetadata
        );
        assert!(!dir.path().join("bp1").join("launch1").exists());
        assert!(dir.path().join("bp1").join("build1").exists());
    }

    #[test]
    fn missing_cache_restores_previous_launch_metadata() {
        let dir = TempDir::new().unwrap();
        let previous = record("abc", false);

        let group = BuildpackGroup::from_ids(["bp1"]);
        let report = Analyzer::new(&group, dir.path())
            .analyze_metadata(&metadata(&[
                ("bp1", "launch1", previous.clone()),
                ("bp1", "build1", record("abc", true)),
            ]))
            .unwrap();

        assert!(report.outcome("bp1", "launch1").unwrap().restored);
        assert!(!report.outcome("bp1", "build1").unwrap().restored);
        let bp = dir.path().join("bp1");
        assert_eq!(
            LayerMetadata::from_file(&bp.join("launch1.toml")).unwrap(),
            previous
        );
        assert!(!bp.join("launch1").exists());
        assert!(!bp.join("build1.toml").exists());
    }

    #[test]
    fn missing_sha_restores_metadata_and_keeps_directory() {
        let dir = TempDir::new().unwrap();
        cache_layer(dir.path(), "bp1", "launch1", "launch = true\n", None);
        let layer_dir = dir.path().join("bp1").join("launch1");
        let before = snapshot(&layer_dir);
        let previous = record("abc", false);

        let group = BuildpackGroup::from_ids(["bp1"]);
        let report = Analyzer::new(&group, dir.path())
            .analyze_metadata(&metadata(&[("bp1", "launch1", previous.clone())]))
            .unwrap();

        let outcome = report.outcome("bp1", "launch1").unwrap();
        assert_eq!(outcome.state, CacheState::NoCacheAvailable);
        assert!(outcome.restored);
        assert!(!outcome.removed);
        assert_eq!(
            LayerMetadata::from_file(&dir.path().join("bp1").join("launch1.toml")).unwrap(),
            previous
        );
        assert_eq!(snapshot(&layer_dir), before);
    }

    #[test]
    fn malformed_metadata_does_not_abort() {
        let dir = TempDir::new().unwrap();
        cache_layer(dir.path(), "bp1", "broken", "launch = [", Some("abc"));
        cache_layer(dir.path(), "bp1", "cache1", "build = true\n", Some("abc"));

        let group = BuildpackGroup::from_ids(["bp1"]);
        let report = Analyzer::new(&group, dir.path())
            .analyze_metadata(&metadata(&[("bp1", "cache1", record("xyz", true))]))
            .unwrap();

        assert_eq!(
            report.outcome("bp1", "broken").unwrap().state,
            CacheState::NoCacheAvailable
        );
        assert_eq!(
            report.outcome("bp1", "cache1").unwrap().state,
            CacheState::OutdatedBuild
        );
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let dir = TempDir::new().unwrap();
        cache_layer(dir.path(), "bp1", "up", "launch = true\n", Some("abc"));
        cache_layer(dir.path(), "bp1", "build", "build = true\n", Some("old"));
        cache_layer(dir.path(), "bp1", "launch", "launch = true\n", Some("old"));
        cache_layer(dir.path(), "bp1", "stale", "launch = true\n", None);
        cache_layer(dir.path(), "bp9", "gone", "launch = true\n", None);
        let previous = metadata(&[
            ("bp1", "up", record("abc", false)),
            ("bp1", "build", record("new", true)),
            ("bp1", "launch", record("new", false)),
            ("bp1", "missing", record("new", false)),
        ]);

        let group = BuildpackGroup::from_ids(["bp1"]);
        let analyzer = Analyzer::new(&group, dir.path());
        analyzer.analyze_metadata(&previous).unwrap();
        let once = snapshot(dir.path());
        analyzer.analyze_metadata(&previous).unwrap();

        assert_eq!(snapshot(dir.path()), once);
    }

    #[test]
    fn missing_previous_image_skips() {
        let dir = TempDir::new().unwrap();
        cache_layer(dir.path(), "bp2", "cache2", "launch = true\n", Some("abc"));

        let group = BuildpackGroup::from_ids(["bp1"]);
        let report = Analyzer::new(&group, dir.path()).analyze(None).unwrap();

        assert_eq!(report.skipped, Some(SkipReason::ImageNotFound));
        assert!(dir.path().join("bp2").exists());
    }

    #[test]
    fn image_without_metadata_skips() {
        let dir = TempDir::new().unwrap();
        let group = BuildpackGroup::from_ids(["bp1"]);
        let image = Image::scratch().with_label(labels::BUILD_METADATA, "{oops");

        let report = Analyzer::new(&group, dir.path())
            .analyze(Some(&image))
            .unwrap();
        assert_eq!(report.skipped, Some(SkipReason::MetadataUnavailable));
        assert_eq!(
            serde_json::to_value(&report).unwrap()["skipped"],
            "metadata-unavailable"
        );
    }

    #[test]
    fn reads_metadata_from_image_label() {
        let dir = TempDir::new().unwrap();
        cache_layer(dir.path(), "bp1", "cache1", "build = true\n", Some("abc"));
        let label = metadata(&[("bp1", "cache1", record("xyz", true))])
            .to_label()
            .unwrap();
        let image = Image::scratch().with_label(labels::BUILD_METADATA, label);

        let group = BuildpackGroup::from_ids(["bp1"]);
        let report = Analyzer::new(&group, dir.path())
            .analyze(Some(&image))
            .unwrap();

        assert!(report.skipped.is_none());
        assert!(!dir.path().join("bp1").join("cache1").exists());
    }
}
