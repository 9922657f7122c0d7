//! Application process list
//!
//! Buildpacks declare the processes an app can run as a TOML list of
//! `{ type, command }` entries. The exporter starts the image with the
//! `web` process.

use crate::error::{LifecycleError, LifecycleResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Process type used as the image start command
pub const WEB_PROCESS: &str = "web";

/// A declared process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    #[serde(rename = "type")]
    pub kind: String,
    pub command: String,
}

/// Parsed process list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchMetadata {
    #[serde(default)]
    pub processes: Vec<Process>,
}

impl LaunchMetadata {
    pub fn parse(content: &str) -> LifecycleResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> LifecycleResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| LifecycleError::io(format!("reading {}", path.display()), e))?;
        Self::parse(&content)
    }

    /// Command registered for the `web` process type
    pub fn web_command(&self) -> Option<&str> {
        let mut web = self.processes.iter().filter(|p| p.kind == WEB_PROCESS);
        let first = web.next()?;
        if web.next().is_some() {
            warn!("Multiple web processes declared, using '{}'", first.command);
        }
        Some(first.command.as_str())
    }
}

/// Read a process list and return its `web` command.
///
/// A missing `web` entry is fatal: the image would have no start command.
pub fn web_command(path: &Path) -> LifecycleResult<String> {
    let launch = LaunchMetadata::from_file(path)?;
    launch
        .web_command()
        .map(str::to_string)
        .ok_or_else(|| LifecycleError::MissingWebProcess(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn finds_web_process() {
        let launch = LaunchMetadata::parse(
            r#"
            [[processes]]
            type = "worker"
            command = "worker.sh"

            [[processes]]
            type = "web"
            command = "start.sh"
            "#,
        )
        .unwrap();

        assert_eq!(launch.web_command(), Some("start.sh"));
    }

    #[test]
    fn missing_web_process_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.toml");
        fs::write(&path, "[[processes]]\ntype = \"worker\"\ncommand = \"w\"\n").unwrap();

        let err = web_command(&path).unwrap_err();
        assert!(matches!(err, LifecycleError::MissingWebProcess(_)));
    }

    #[test]
    fn first_web_process_wins() {
        let launch = LaunchMetadata {
            processes: vec![
                Process {
                    kind: "web".to_string(),
                    command: "a".to_string(),
                },
                Process {
                    kind: "web".to_string(),
                    command: "b".to_string(),
                },
            ],
        };
        assert_eq!(launch.web_command(), Some("a"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = web_command(&dir.path().join("metadata.toml")).unwrap_err();
        assert!(matches!(err, LifecycleError::Io { .. }));
    }
}
