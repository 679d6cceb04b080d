use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const ANIMATED: &str = "\
precision mediump float;
uniform float u_time;
uniform vec2 u_resolution;
void main() {
    vec2 st = gl_FragCoord.xy / u_resolution;
    gl_FragColor = vec4(st, abs(sin(u_time)), 1.0);
}
";

fn shaderpad(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shaderpad"))
        .env("SHADERPAD_CONFIG_DIR", config_dir)
        .env_remove("SHADERPAD_CONFIG")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run shaderpad")
}

fn summary(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should hold a JSON summary")
}

#[test]
fn headless_run_reports_drawn_frames() {
    let root = TempDir::new().unwrap();
    let shader = root.path().join("wave.frag");
    fs::write(&shader, ANIMATED).unwrap();

    let output = shaderpad(
        root.path(),
        &[
            "--headless",
            "--frames",
            "3",
            "--size",
            "320x200",
            shader.to_str().unwrap(),
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary = summary(&output);
    assert_eq!(summary["frames"], 3);
    assert_eq!(summary["valid"], true);
    assert_eq!(summary["size"], serde_json::json!([320, 200]));
    assert_eq!(summary["compile_errors"], serde_json::json!([]));
}

#[test]
fn broken_shader_exits_with_diagnostics() {
    let root = TempDir::new().unwrap();
    let shader = root.path().join("broken.frag");
    fs::write(&shader, "void main() {\n    gl_FragColor = vec4(1.0)\n").unwrap();

    let output = shaderpad(root.path(), &["--headless", shader.to_str().unwrap()]);
    assert!(!output.status.success());

    let summary = summary(&output);
    assert_eq!(summary["valid"], false);
    let errors = summary["compile_errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["stage"], "fragment");
}

#[test]
fn config_file_supplies_uniforms() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("config.toml"),
        "[window]\nwidth = 64\nheight = 48\n\n[uniforms]\nu_color = [1.0, 0.0, 0.0]\n",
    )
    .unwrap();

    let output = shaderpad(root.path(), &["--headless"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(summary(&output)["size"], serde_json::json!([64, 48]));
}

#[test]
fn invalid_size_is_rejected() {
    let root = TempDir::new().unwrap();
    let output = shaderpad(root.path(), &["--headless", "--size", "wide"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn help_lists_the_headless_flag() {
    let root = TempDir::new().unwrap();
    let output = shaderpad(root.path(), &["--help"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("--headless"));
}
