use std::fs;
use std::process::Command;

use tempfile::TempDir;

#[test]
fn help_lists_player_flags() {
    let output = Command::new(env!("CARGO_BIN_EXE_voutplay"))
        .arg("--help")
        .output()
        .expect("failed to run voutplay --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--config", "--size", "--profile", "--pattern", "--export", "--print-format"] {
        assert!(stdout.contains(flag), "missing {flag} in help output");
    }
}

#[test]
fn invalid_config_is_rejected_before_rendering() {
    let root = TempDir::new().unwrap();
    let config = root.path().join("player.toml");
    fs::write(
        &config,
        r#"
version = 1

[source]
width = 320
height = 240
crop = { x = 100, y = 0, width = 320, height = 240 }
"#,
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_voutplay"))
        .arg("--config")
        .arg(&config)
        .output()
        .expect("failed to run voutplay with invalid config");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("crop"), "unexpected stderr: {stderr}");
}

#[test]
fn unsupported_version_is_reported() {
    let root = TempDir::new().unwrap();
    let config = root.path().join("player.toml");
    fs::write(&config, "version = 7\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_voutplay"))
        .env_remove("VOUTPLAY_CONFIG")
        .arg("--config")
        .arg(&config)
        .output()
        .expect("failed to run voutplay with future config version");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("version"), "unexpected stderr: {stderr}");
}

#[test]
fn missing_config_file_fails() {
    let root = TempDir::new().unwrap();
    let status = Command::new(env!("CARGO_BIN_EXE_voutplay"))
        .arg("--config")
        .arg(root.path().join("absent.toml"))
        .status()
        .expect("failed to run voutplay with missing config");

    assert!(!status.success());
}

#[test]
fn zero_frame_override_is_rejected() {
    let status = Command::new(env!("CARGO_BIN_EXE_voutplay"))
        .env_remove("VOUTPLAY_CONFIG")
        .args(["--frames", "0"])
        .status()
        .expect("failed to run voutplay with zero frames");

    assert!(!status.success());
}
