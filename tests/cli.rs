use assert_cmd::prelude::*;
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::process::Command;

fn empty_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(b"gate:\n  base_url: http://127.0.0.1:9/\n").unwrap();
    file
}

fn gatehouse(config: &Path) -> Command {
    let bin = assert_cmd::cargo::cargo_bin!("gatehouse");
    let mut cmd = Command::new(bin);
    cmd.env_remove("RUST_LOG")
        .args(["--config", config.to_str().unwrap(), "--output", "json"]);
    cmd
}

fn stdout_json(cmd: &mut Command) -> Value {
    let assert = cmd.assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 output");
    serde_json::from_str(&stdout).expect("valid json")
}

#[test]
fn fingerprint_ignores_key_order() {
    let config = empty_config();
    let first = stdout_json(gatehouse(config.path()).args([
        "fingerprint",
        "--url",
        "/user/list",
        "--params",
        r#"{"pageNum":1,"status":2}"#,
    ]));
    let second = stdout_json(gatehouse(config.path()).args([
        "fingerprint",
        "--method",
        "get",
        "--url",
        "/user/list",
        "--params",
        r#"{"status":2,"pageNum":1}"#,
    ]));
    assert_eq!(first["fingerprint"], second["fingerprint"]);
    assert_eq!(
        first["display"].as_str(),
        Some(r#"GET | /user/list | {"pageNum":1,"status":2} | ~"#)
    );
}

#[test]
fn compile_prints_routes_and_permissions() {
    let config = empty_config();
    let tree = Path::new("tests/fixtures/menu_tree.yaml");
    let views = Path::new("tests/fixtures/views.json");
    assert!(tree.exists(), "fixture missing");

    let value = stdout_json(gatehouse(config.path()).args([
        "compile",
        "--tree",
        tree.to_str().unwrap(),
        "--views",
        views.to_str().unwrap(),
    ]));

    let perms: Vec<&str> = value["perms"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(perms, vec!["dashboard:export", "user:add", "user:delete"]);

    let routes = value["routes"].as_array().unwrap();
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0]["redirect"].as_str(), Some("/system/user"));
    let users = &routes[0]["children"][0];
    assert_eq!(
        users["view"]["target"].as_str(),
        Some("src/views/system/user/index.vue")
    );
    assert_eq!(users["meta"]["keepAlive"].as_bool(), Some(true));
    let roles = &routes[0]["children"][1];
    assert_eq!(roles["view"]["fallback"].as_bool(), Some(true));
    assert_eq!(
        routes[1]["view"]["target"].as_str(),
        Some("src/views/dashboard/index.vue")
    );
}

#[test]
fn check_reports_each_key() {
    let config = empty_config();
    let value = stdout_json(gatehouse(config.path()).args([
        "check",
        "--tree",
        "tests/fixtures/menu_tree.yaml",
        "user:add",
        "user:export",
    ]));
    assert_eq!(value["user:add"], Value::Bool(true));
    assert_eq!(value["user:export"], Value::Bool(false));
}

#[test]
fn config_reflects_file_and_environment() {
    let config = empty_config();
    let value = stdout_json(
        gatehouse(config.path())
            .env("GATEHOUSE__GATE__TOKEN_HEADER", "X-Token")
            .arg("config"),
    );
    assert_eq!(value["gate"]["base_url"].as_str(), Some("http://127.0.0.1:9/"));
    assert_eq!(value["gate"]["token_header"].as_str(), Some("X-Token"));
    assert_eq!(value["gate"]["timeout"].as_str(), Some("30s"));
}

#[test]
fn missing_config_file_fails() {
    let bin = assert_cmd::cargo::cargo_bin!("gatehouse");
    Command::new(bin)
        .args(["--config", "/nonexistent/gatehouse.yaml", "config"])
        .assert()
        .failure();
}
