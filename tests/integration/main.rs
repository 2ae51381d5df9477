//! Integration tests for Kiln

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Command isolated from the user's global and local config
    fn kiln(home: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("kiln");
        cmd.env("KILN_CONFIG", home.join("config.toml"))
            .env("CI", "1")
            .arg("--no-local");
        cmd
    }

    fn write_project(dir: &Path) {
        fs::write(
            dir.join("Cargo.toml"),
            "[package]\nname = \"hello\"\nversion = \"0.1.0\"\n\n[dependencies]\nserde = \"1\"\n",
        )
        .unwrap();
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("src/main.rs"), "fn main() {}\n").unwrap();
    }

    /// Point the cache at a temp dir so tests never touch the real one
    fn write_config(home: &Path) {
        let cache = home.join("cache");
        fs::write(
            home.join("config.toml"),
            format!("[cache]\ndir = {:?}\n", cache.to_string_lossy()),
        )
        .unwrap();
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        kiln(home.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("layered build pipeline"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        kiln(home.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn config_path() {
        let home = TempDir::new().unwrap();
        kiln(home.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let home = TempDir::new().unwrap();
        kiln(home.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[runtime]"))
            .stdout(predicate::str::contains("debian:bookworm-slim"));
    }

    #[test]
    fn config_init_then_show_reflects_file() {
        let home = TempDir::new().unwrap();
        kiln(home.path()).args(["config", "init"]).assert().success();
        assert!(home.path().join("config.toml").exists());

        fs::write(home.path().join("config.toml"), "[build]\nprofile = \"dev\"\n").unwrap();
        kiln(home.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("profile = \"dev\""));
    }

    #[test]
    fn invalid_config_fails() {
        let home = TempDir::new().unwrap();
        fs::write(home.path().join("config.toml"), "[build\n").unwrap();
        kiln(home.path())
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn fingerprint_is_stable() {
        let home = TempDir::new().unwrap();
        write_config(home.path());
        let project = TempDir::new().unwrap();
        write_project(project.path());

        let first = kiln(home.path())
            .args(["fingerprint", "--quiet", "--project"])
            .arg(project.path())
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let first = String::from_utf8(first).unwrap();
        assert_eq!(first.trim().len(), 64);

        // Source edits don't change the fingerprint
        fs::write(project.path().join("src/main.rs"), "fn main() { println!(\"hi\"); }\n").unwrap();
        kiln(home.path())
            .args(["fingerprint", "--quiet", "--project"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::diff(first.clone()));

        // Manifest edits do
        fs::write(
            project.path().join("Cargo.toml"),
            "[package]\nname = \"hello\"\nversion = \"0.1.0\"\n\n\
             [dependencies]\nserde = \"1.0.200\"\n",
        )
        .unwrap();
        kiln(home.path())
            .args(["fingerprint", "--quiet", "--project"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::diff(first).not());
    }

    #[test]
    fn fingerprint_reports_cache_miss() {
        let home = TempDir::new().unwrap();
        write_config(home.path());
        let project = TempDir::new().unwrap();
        write_project(project.path());

        kiln(home.path())
            .args(["fingerprint", "--project"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("hello"))
            .stdout(predicate::str::contains("miss"));
    }

    #[test]
    fn missing_manifest_is_manifest_error() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        kiln(home.path())
            .args(["fingerprint", "--project"])
            .arg(project.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("[manifest]"))
            .stderr(predicate::str::contains("Manifest unreadable"));
    }

    #[test]
    fn dockerfile_prints_multistage_build() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        write_project(project.path());

        kiln(home.path())
            .args(["dockerfile", "--project"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("FROM rust:1 AS builder"))
            .stdout(predicate::str::contains("FROM debian:bookworm-slim"))
            .stdout(predicate::str::contains("ENTRYPOINT [\"/usr/local/bin/hello\"]"));
    }

    #[test]
    fn cache_list_empty() {
        let home = TempDir::new().unwrap();
        write_config(home.path());
        kiln(home.path())
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries found"));

        kiln(home.path())
            .args(["cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn cache_gc_dry_run() {
        let home = TempDir::new().unwrap();
        write_config(home.path());
        kiln(home.path())
            .args(["cache", "gc", "--days", "1", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Dry run"));
    }

    #[test]
    fn cache_clear_empty() {
        let home = TempDir::new().unwrap();
        write_config(home.path());
        kiln(home.path())
            .args(["cache", "clear", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries to clear"));
    }

    #[test]
    fn build_with_missing_toolchain_fails() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        write_project(project.path());
        fs::write(
            home.path().join("config.toml"),
            format!(
                "[build]\ntoolchain = \"kiln-no-such-toolchain\"\n\n[runtime]\nimages_dir = {:?}\n",
                home.path().join("images").to_string_lossy()
            ),
        )
        .unwrap();

        // The dependency pass is the first toolchain call
        kiln(home.path())
            .args(["build", "--no-cache", "--project"])
            .arg(project.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Toolchain not found"));
    }

    #[test]
    fn unknown_subcommand_fails() {
        let home = TempDir::new().unwrap();
        kiln(home.path()).arg("frobnicate").assert().failure();
    }
}
