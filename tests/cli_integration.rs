// CLI integration tests for `show`, `run`, `version`, and error exit codes.
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{Value, json};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_datablock");
    Command::new(exe)
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn parse_json_line(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().next().expect("json line");
    parse_json(line)
}

fn error_line(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text
        .lines()
        .find(|line| line.starts_with("{\"error\""))
        .expect("error json line");
    parse_json(line)
}

// Compiles a fixture under tests/fixtures into a shared library in `dir`.
fn build_plugin(dir: &Path, source: &str, stem: &str) -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    let library = dir.join(format!("lib{stem}.{}", std::env::consts::DLL_EXTENSION));
    let compiler = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let status = Command::new(compiler)
        .args(["-shared", "-fPIC", "-I"])
        .arg(manifest.join("include"))
        .arg("-o")
        .arg(&library)
        .arg(manifest.join("tests").join("fixtures").join(source))
        .status()
        .expect("spawn C compiler");
    assert!(status.success(), "failed to compile {source}");
    library
}

fn write_json(dir: &Path, name: &str, value: &Value) -> String {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).expect("create");
    file.write_all(value.to_string().as_bytes()).expect("write");
    path.to_str().expect("utf8 path").to_string()
}

#[test]
fn show_prints_block_and_mapping() {
    let temp = tempfile::tempdir().expect("tempdir");
    let data = write_json(
        temp.path(),
        "data.json",
        &json!({"cosmology": {"omega_m": 0.3, "h0": 70, "grid": [1, 2, 3]}}),
    );
    let mapping = write_json(temp.path(), "mapping.json", &json!({"params": "cosmology"}));

    let show = cmd()
        .args(["show", &data, "--mapping", &mapping])
        .output()
        .expect("show");
    assert!(show.status.success());
    let shown = parse_json(std::str::from_utf8(&show.stdout).expect("utf8"));
    assert_eq!(shown["data"]["cosmology"]["omega_m"], 0.3);
    assert_eq!(shown["data"]["cosmology"]["h0"], 70);
    assert_eq!(shown["data"]["cosmology"]["grid"]["$dtype"], "i64");
    assert_eq!(shown["data"]["cosmology"]["grid"]["shape"], json!([3]));
    assert_eq!(shown["mapping"]["params"], "cosmology");
}

#[test]
fn show_get_resolves_aliases() {
    let temp = tempfile::tempdir().expect("tempdir");
    let data = write_json(temp.path(), "data.json", &json!({"new": {"y": 5}}));
    let mapping = write_json(temp.path(), "mapping.json", &json!({"old/x": "new/y"}));

    let get = cmd()
        .args(["show", &data, "--mapping", &mapping, "--sep", "/", "--get", "old/x"])
        .output()
        .expect("get");
    assert!(get.status.success());
    assert_eq!(parse_json_line(&get.stdout), json!(5));

    let section = cmd()
        .args(["show", &data, "--section", "new"])
        .output()
        .expect("section");
    assert!(section.status.success());
    let listed = parse_json_line(&section.stdout);
    assert_eq!(listed["names"], json!(["y"]));
}

#[test]
fn show_get_section_uses_stored_name() {
    let temp = tempfile::tempdir().expect("tempdir");
    let data = write_json(temp.path(), "data.json", &json!({"new": {"y": 5}}));
    let mapping = write_json(temp.path(), "mapping.json", &json!({"old": "new"}));

    let entry = cmd()
        .args(["show", &data, "--mapping", &mapping, "--get", "old::y"])
        .output()
        .expect("entry");
    assert!(entry.status.success());
    assert_eq!(parse_json_line(&entry.stdout), json!(5));

    let aliased = cmd()
        .args(["show", &data, "--mapping", &mapping, "--get", "old"])
        .output()
        .expect("aliased section");
    assert_eq!(aliased.status.code(), Some(3));

    let stored = cmd()
        .args(["show", &data, "--mapping", &mapping, "--get", "new"])
        .output()
        .expect("stored section");
    assert!(stored.status.success());
    assert_eq!(parse_json_line(&stored.stdout), json!({"y": 5}));
}

#[test]
fn not_found_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let data = write_json(temp.path(), "data.json", &json!({"params": {"a": 1}}));

    let output = cmd()
        .args(["show", &data, "--get", "params::missing"])
        .output()
        .expect("show");
    assert_eq!(output.status.code(), Some(3));
    let err = parse_json_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "NotFound");
    assert_eq!(err["error"]["section"], "params");
    assert_eq!(err["error"]["name"], "missing");
}

#[test]
fn bad_key_and_bad_json_are_usage_or_type_errors() {
    let temp = tempfile::tempdir().expect("tempdir");
    let data = write_json(temp.path(), "data.json", &json!({"params": {"a": 1}}));

    let output = cmd()
        .args(["show", &data, "--get", "a::b::c"])
        .output()
        .expect("show");
    assert_eq!(output.status.code(), Some(4));

    let broken = temp.path().join("broken.json");
    std::fs::write(&broken, "{not json").expect("write");
    let output = cmd()
        .args(["show", broken.to_str().expect("utf8")])
        .output()
        .expect("show");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
}

#[test]
fn run_reports_missing_library() {
    let output = cmd()
        .args(["run", "/nonexistent/libplugin.so"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn usage_exit_code() {
    let output = cmd().args(["show"]).output().expect("show");
    assert_eq!(output.status.code(), Some(2));

    let output = cmd().args(["frobnicate"]).output().expect("unknown");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
}

#[test]
fn version_reports_abi() {
    let output = cmd().arg("version").output().expect("version");
    assert!(output.status.success());
    let version = parse_json_line(&output.stdout);
    assert_eq!(version["name"], "datablock");
    assert_eq!(version["abi_version"], 1);
}

#[cfg(unix)]
#[test]
fn run_hosts_plugin_through_export_table() {
    let temp = tempfile::tempdir().expect("tempdir");
    let library = build_plugin(temp.path(), "table_plugin.c", "table_plugin");
    let config = write_json(temp.path(), "config.json", &json!({"params": {"scale": 3}}));
    let data = write_json(
        temp.path(),
        "data.json",
        &json!({"input": {"label": "planck", "grid": [1, 2, 3]}}),
    );

    let output = cmd()
        .arg("run")
        .arg(&library)
        .args(["--config", &config, "--data", &data, "--iterations", "2"])
        .output()
        .expect("run");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {stderr}");
    assert!(stderr.contains("TABLE-PLUGIN-LINE"));

    let report = parse_json(std::str::from_utf8(&output.stdout).expect("utf8"));
    assert_eq!(report["name"], "table_plugin");
    assert_eq!(report["iterations"], 2);
    assert_eq!(report["data"]["state"]["scale"], 3);
    assert_eq!(report["data"]["state"]["count"], 2);
    assert_eq!(report["data"]["state"]["done"], 1);
    assert_eq!(report["data"]["out"]["scaled"], 4.5);
    assert_eq!(report["data"]["out"]["label"], "planck");
    assert_eq!(report["data"]["out"]["grid_sum"], 6);
}

#[cfg(unix)]
#[test]
fn run_surfaces_plugin_error_as_cause() {
    let temp = tempfile::tempdir().expect("tempdir");
    let library = build_plugin(temp.path(), "table_plugin.c", "table_plugin");
    let data = write_json(temp.path(), "data.json", &json!({"input": {"fail": 1}}));

    let output = cmd()
        .arg("run")
        .arg(&library)
        .args(["--data", &data])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TABLE-PLUGIN-FAILING"));
    let err = error_line(&output.stderr);
    assert_eq!(err["error"]["kind"], "Internal");
    let cause = err["error"]["causes"][0].as_str().expect("cause");
    assert!(cause.starts_with("NotFound"), "cause: {cause}");
    assert!(cause.contains("missing"));
}

#[cfg(target_os = "linux")]
#[test]
fn run_resolves_abi_symbols_from_host() {
    let temp = tempfile::tempdir().expect("tempdir");
    let library = build_plugin(temp.path(), "direct_plugin.c", "direct_plugin");
    let data = write_json(temp.path(), "data.json", &json!({"input": {"label": "x"}}));

    let output = cmd()
        .arg("run")
        .arg(&library)
        .args(["--data", &data])
        .output()
        .expect("run");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {stderr}");
    assert!(stderr.contains("DIRECT-PLUGIN-LINE"));
    assert!(stderr.contains("pending error"));
    let report = parse_json(std::str::from_utf8(&output.stdout).expect("utf8"));
    assert_eq!(report["data"]["state"]["ready"], 1);
    assert_eq!(report["data"]["state"]["done"], 1);

    let failing = write_json(temp.path(), "failing.json", &json!({"input": {"fail": 1}}));
    let output = cmd()
        .arg("run")
        .arg(&library)
        .args(["--data", &failing])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(1));
    let err = error_line(&output.stderr);
    let cause = err["error"]["causes"][0].as_str().expect("cause");
    assert!(cause.starts_with("NotFound"), "cause: {cause}");
}
