use std::path::{Path, PathBuf};

use assert_cmd::Command;
use image::{ImageBuffer, Rgb, RgbImage};
use predicates::prelude::*;
use tempfile::TempDir;

fn imgpress() -> Command {
    let mut cmd = Command::cargo_bin("imgpress").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_png(dir: &Path, name: &str) -> PathBuf {
    let img: RgbImage = ImageBuffer::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 128]));
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}

#[test]
fn help_lists_subcommands() {
    imgpress()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("optimize"))
        .stdout(predicate::str::contains("thumbnails"))
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("batch"));
}

#[test]
fn version_flag() {
    imgpress()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn info_prints_system_information() {
    imgpress()
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("imgpress System Information"))
        .stdout(predicate::str::contains("Thumbnail presets"));
}

#[test]
fn example_config_is_written() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("imgpress.toml");

    imgpress()
        .args(["example-config", "-o"])
        .arg(&path)
        .assert()
        .success();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("[batch]"));
}

#[test]
fn optimize_writes_output_file() {
    let dir = TempDir::new().unwrap();
    let input = write_png(dir.path(), "input.png");
    let output = dir.path().join("out").join("result.png");

    imgpress()
        .arg("optimize")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    let bytes = std::fs::read(&output).unwrap();
    assert!(bytes.starts_with(b"\x89PNG"));
}

#[test]
fn analyze_json_includes_recommendations() {
    let dir = TempDir::new().unwrap();
    let input = write_png(dir.path(), "input.png");

    let assert = imgpress()
        .args(["--json", "analyze"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("recommendations"));

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["basic"]["width"], 64);
}

#[test]
fn thumbnails_and_archive_land_in_output_dir() {
    let dir = TempDir::new().unwrap();
    let input = write_png(dir.path(), "photo.png");
    let out = dir.path().join("thumbs");

    imgpress()
        .arg("thumbnails")
        .arg(&input)
        .arg("-o")
        .arg(&out)
        .args(["--presets", "small", "--archive"])
        .assert()
        .success();

    assert!(out.join("photo_small.png").exists());
    assert!(out.join("photo_thumbnails.zip").exists());
}

#[test]
fn missing_input_fails() {
    imgpress()
        .args(["optimize", "does-not-exist.png", "-o", "out.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}
