use assert_cmd::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn repo_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("expected crates/<name> layout")
        .to_path_buf()
}

fn agile_workspace() -> PathBuf {
    let path = repo_root().join("fixtures").join("workspaces").join("agile.yaml");
    assert!(path.exists(), "fixture missing: {}", path.display());
    path
}

const VELOCITY: &str = "\
x-labels-property: Iteration
series:
  - label: Velocity
    data: SELECT Iteration, SUM(Size) WHERE Status = Done
";

#[test]
fn cli_renders_description_json_from_a_params_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let params = tmp.path().join("velocity.yaml");
    fs::write(&params, VELOCITY).expect("write params");

    let exe = assert_cmd::cargo_bin!("cardchart-cli");
    let output = Command::new(exe)
        .args([
            "render",
            "--workspace",
            agile_workspace().to_string_lossy().as_ref(),
            "--project",
            "agile",
            "--regions",
            params.to_string_lossy().as_ref(),
        ])
        .output()
        .expect("run cli");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let description: Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(
        description["axis"]["x"]["categories"],
        serde_json::json!(["#2 Sprint 1", "#3 Sprint 2", "#4 Sprint 3", "(not set)"])
    );
    assert_eq!(
        description["data"]["columns"][0],
        serde_json::json!(["Velocity", 5, 5, 2, 0])
    );
    assert_eq!(
        description["region_mql"]["project_identifier"]["Velocity"],
        "agile"
    );
}

#[test]
fn cli_reads_params_from_stdin_and_embeds_html() {
    let exe = assert_cmd::cargo_bin!("cardchart-cli");
    let assert = assert_cmd::Command::new(exe)
        .args([
            "render",
            "--workspace",
            agile_workspace().to_string_lossy().as_ref(),
            "--project",
            "agile",
            "--html",
            "velocity chart",
            "-",
        ])
        .write_stdin(VELOCITY)
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.starts_with(r#"<div class="cardchart" id="velocity-chart""#));
    assert!(stdout.contains("&quot;Velocity&quot;"));
}

#[test]
fn cli_reports_render_errors() {
    let exe = assert_cmd::cargo_bin!("cardchart-cli");
    let assert = assert_cmd::Command::new(exe)
        .args([
            "render",
            "--workspace",
            agile_workspace().to_string_lossy().as_ref(),
            "--project",
            "agile",
        ])
        .write_stdin("title: Nothing to plot\n")
        .assert()
        .failure()
        .code(1);

    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("series"), "stderr: {stderr}");
}

#[test]
fn cli_rejects_missing_workspace_with_usage() {
    let exe = assert_cmd::cargo_bin!("cardchart-cli");
    Command::new(exe)
        .args(["render", "--project", "agile"])
        .assert()
        .failure()
        .code(2);
}
