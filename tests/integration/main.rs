//! Integration tests for the lifecycle CLI

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn lifecycle() -> Command {
        cargo_bin_cmd!("lifecycle")
    }

    #[test]
    fn help_displays() {
        lifecycle()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("analyze"))
            .stdout(predicate::str::contains("export"));
    }

    #[test]
    fn version_displays() {
        lifecycle()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("lifecycle"));
    }

    #[test]
    fn export_requires_stack() {
        lifecycle()
            .args(["export", "/tmp/image"])
            .env_remove("LIFECYCLE_STACK")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--stack"));
    }
}

mod workflow_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use lifecycle::image::{Image, ImageStore, OciLayoutStore};
    use lifecycle::metadata::AppImageMetadata;
    use predicates::prelude::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            let ws = Self {
                dir: TempDir::new().unwrap(),
            };
            fs::write(ws.path("config.toml"), "").unwrap();
            fs::write(
                ws.path("group.toml"),
                "[[buildpacks]]\nid = \"io.buildpacks/node\"\nversion = \"1.0\"\n",
            )
            .unwrap();
            fs::create_dir_all(ws.launch().join("app")).unwrap();
            fs::write(ws.launch().join("app/server.js"), "listen(8080)").unwrap();
            fs::write(
                ws.launch().join("app/metadata.toml"),
                "[[processes]]\ntype = \"web\"\ncommand = \"node server.js\"\n",
            )
            .unwrap();
            OciLayoutStore::new(ws.path("stack"), "latest")
                .write(&Image::scratch())
                .unwrap();
            ws
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn launch(&self) -> PathBuf {
            self.path("launch")
        }

        fn layer(&self, name: &str) -> PathBuf {
            self.launch().join("io.buildpacks_node").join(name)
        }

        fn write_layer(&self, name: &str, toml: &str) {
            fs::create_dir_all(self.layer(name)).unwrap();
            fs::write(self.layer(name).join("bin"), name).unwrap();
            fs::write(sibling(&self.layer(name), "toml"), toml).unwrap();
        }

        fn cmd(&self, args: &[&str]) -> Command {
            let mut cmd = cargo_bin_cmd!("lifecycle");
            cmd.env_remove("RUST_LOG")
                .arg("--config")
                .arg(self.path("config.toml"))
                .args(args)
                .arg("--group")
                .arg(self.path("group.toml"))
                .arg("--launch")
                .arg(self.launch())
                .arg("--app")
                .arg(self.launch().join("app"));
            cmd
        }

        fn image(&self, name: &str) -> String {
            self.path(name).display().to_string()
        }

        fn stack_flag(&self) -> String {
            self.image("stack")
        }
    }

    fn sibling(layer: &Path, ext: &str) -> PathBuf {
        layer.with_file_name(format!(
            "{}.{}",
            layer.file_name().unwrap().to_string_lossy(),
            ext
        ))
    }

    #[test]
    fn export_writes_image_with_metadata() {
        let ws = Workspace::new();
        ws.write_layer("node", "launch = true\n");

        ws.cmd(&["export", &ws.image("app"), "--stack", &ws.stack_flag()])
            .assert()
            .success()
            .stdout(predicate::str::contains("[OK]"));

        let image = OciLayoutStore::new(ws.path("app"), "latest")
            .image()
            .unwrap()
            .unwrap();
        assert_eq!(image.layers().len(), 2);
        assert!(image.label("io.buildpacks_node.node.diffid").is_some());
        assert_eq!(
            image.config().config.cmd,
            Some(vec!["node server.js".to_string()])
        );
        let metadata =
            AppImageMetadata::from_label(image.label("sh.packs.build")).unwrap();
        assert!(metadata.buildpack("io.buildpacks_node").is_some());
    }

    #[test]
    fn analyze_without_previous_image_warns() {
        let ws = Workspace::new();
        ws.write_layer("node", "launch = true\n");

        ws.cmd(&["analyze", &ws.image("missing")])
            .assert()
            .success()
            .stdout(predicate::str::contains("nothing to analyze"))
            .stderr(predicate::str::contains("Skipping analyze"));

        assert!(ws.layer("node").exists());
    }

    #[test]
    fn analyze_image_without_metadata_says_so() {
        let ws = Workspace::new();
        ws.write_layer("node", "launch = true\n");
        OciLayoutStore::new(ws.path("bare"), "latest")
            .write(&Image::scratch())
            .unwrap();

        ws.cmd(&["analyze", &ws.image("bare")])
            .assert()
            .success()
            .stdout(predicate::str::contains("no usable build metadata"))
            .stdout(predicate::str::contains("not found").not());

        assert!(ws.layer("node").exists());
    }

    #[test]
    fn rebuild_cycle_reuses_layers() {
        let ws = Workspace::new();
        ws.write_layer("node", "launch = true\n");
        ws.write_layer("cache", "build = true\n");

        ws.cmd(&["export", &format!("{}:v1", ws.image("app")), "--stack", &ws.stack_flag()])
            .assert()
            .success();

        // mark the launch layer current and the build layer stale
        let previous = OciLayoutStore::new(ws.path("app"), "v1")
            .image()
            .unwrap()
            .unwrap();
        let node_sha = previous.label("io.buildpacks_node.node.diffid").unwrap();
        fs::write(sibling(&ws.layer("node"), "sha"), node_sha).unwrap();
        fs::write(sibling(&ws.layer("cache"), "sha"), "sha256:stale").unwrap();

        ws.cmd(&["analyze", &format!("{}:v1", ws.image("app")), "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cache-up-to-date"))
            .stdout(predicate::str::contains("outdated-build"));

        assert!(ws.layer("node").exists());
        assert!(!ws.layer("cache").exists());

        fs::remove_dir_all(ws.layer("node")).unwrap();
        ws.cmd(&[
            "export",
            &format!("{}:v2", ws.image("app")),
            &format!("{}:v1", ws.image("app")),
            "--stack",
            &ws.stack_flag(),
        ])
        .assert()
        .success();

        let next = OciLayoutStore::new(ws.path("app"), "v2")
            .image()
            .unwrap()
            .unwrap();
        assert_eq!(
            next.label("io.buildpacks_node.node.diffid"),
            Some(node_sha)
        );
        assert_eq!(
            next.layers().last().unwrap().digest(),
            previous.layers()[2].digest()
        );
    }

    #[test]
    fn analyze_reads_metadata_file() {
        let ws = Workspace::new();
        ws.write_layer("node", "launch = true\n");
        fs::write(sibling(&ws.layer("node"), "sha"), "sha256:old").unwrap();
        fs::write(
            ws.path("metadata.json"),
            r#"{"buildpacks":[{"key":"io.buildpacks_node","layers":{"node":{"sha":"sha256:new","launch":true}}}]}"#,
        )
        .unwrap();

        ws.cmd(&[
            "analyze",
            &ws.image("unused"),
            "--metadata",
            &ws.path("metadata.json").display().to_string(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("outdated-launch"));

        assert!(!ws.layer("node").exists());
        let restored = fs::read_to_string(sibling(&ws.layer("node"), "toml")).unwrap();
        assert!(restored.contains("sha256:new"));
    }

    #[test]
    fn malformed_metadata_file_fails() {
        let ws = Workspace::new();
        fs::write(ws.path("metadata.json"), "{not json").unwrap();

        ws.cmd(&[
            "analyze",
            &ws.image("unused"),
            "--metadata",
            &ws.path("metadata.json").display().to_string(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn metadata_only_layer_without_previous_fails() {
        let ws = Workspace::new();
        fs::create_dir_all(ws.launch().join("io.buildpacks_node")).unwrap();
        fs::write(sibling(&ws.layer("node"), "toml"), "launch = true\n").unwrap();

        ws.cmd(&["export", &ws.image("app"), "--stack", &ws.stack_flag()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn missing_stack_fails() {
        let ws = Workspace::new();

        ws.cmd(&["export", &ws.image("app"), "--stack", &ws.image("nostack")])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Stack image not found"));
    }
}
