//! Buildpack group parsing
//!
//! The group is the ordered list of buildpacks selected for the current
//! build (`group.toml`). It scopes which cache directories survive analysis
//! and the order in which layers are exported.

use crate::error::{LifecycleError, LifecycleResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A buildpack selected for the build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buildpack {
    /// Buildpack id (may contain `/`)
    pub id: String,

    /// Buildpack version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl Buildpack {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: String::new(),
        }
    }

    /// Folder name of this buildpack inside the launch directory
    pub fn escaped_id(&self) -> String {
        self.id.replace('/', "_")
    }
}

/// Ordered buildpack group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackGroup {
    #[serde(default)]
    pub buildpacks: Vec<Buildpack>,
}

impl BuildpackGroup {
    /// Build a group from ids, in order
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            buildpacks: ids.into_iter().map(Buildpack::new).collect(),
        }
    }

    /// Parse and validate group TOML
    pub fn parse(content: &str) -> LifecycleResult<Self> {
        let group: Self = toml::from_str(content)?;
        for bp in &group.buildpacks {
            validate_folder_name(&bp.escaped_id())?;
        }
        Ok(group)
    }

    /// Read `group.toml`
    pub fn from_file(path: &Path) -> LifecycleResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| LifecycleError::GroupRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| LifecycleError::GroupRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Launch-directory folder names, in group order
    pub fn folder_names(&self) -> Vec<String> {
        self.buildpacks.iter().map(Buildpack::escaped_id).collect()
    }

    /// Whether a launch-directory folder belongs to a buildpack in this group
    pub fn contains_folder(&self, name: &str) -> bool {
        self.buildpacks.iter().any(|bp| bp.escaped_id() == name)
    }
}

/// A buildpack folder name must stay inside the launch directory.
fn validate_folder_name(name: &str) -> LifecycleResult<()> {
    if name.is_empty() {
        return Err(LifecycleError::User(
            "Buildpack id cannot be empty".to_string(),
        ));
    }
    if name == "." || name == ".." || name.contains('\\') || name.contains('\0') {
        return Err(LifecycleError::User(format!(
            "Invalid buildpack id '{}': must not be a relative path component",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_group_keeps_order() {
        let group = BuildpackGroup::parse(
            r#"
            [[buildpacks]]
            id = "io.buildpacks/node"
            version = "1.0"

            [[buildpacks]]
            id = "bp.go"
            "#,
        )
        .unwrap();

        assert_eq!(group.folder_names(), vec!["io.buildpacks_node", "bp.go"]);
        assert_eq!(group.buildpacks[0].version, "1.0");
        assert!(group.contains_folder("bp.go"));
        assert!(!group.contains_folder("io.buildpacks/node"));
    }

    #[test]
    fn rejects_traversal_ids() {
        assert!(BuildpackGroup::parse("[[buildpacks]]\nid = \"..\"\n").is_err());
        assert!(BuildpackGroup::parse("[[buildpacks]]\nid = \"\"\n").is_err());
    }

    #[test]
    fn empty_group() {
        let group = BuildpackGroup::parse("").unwrap();
        assert!(group.buildpacks.is_empty());
    }

    #[test]
    fn missing_file_is_group_error() {
        let dir = TempDir::new().unwrap();
        let err = BuildpackGroup::from_file(&dir.path().join("group.toml")).unwrap_err();
        assert!(matches!(err, LifecycleError::GroupRead { .. }));
    }

    #[test]
    fn from_ids() {
        let group = BuildpackGroup::from_ids(["bp1", "bp2"]);
        assert_eq!(group.folder_names(), vec!["bp1", "bp2"]);
    }
}
