//! `packline build --json` against a scratch project.

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn packline(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_packline"))
        .args(args)
        .arg("--cwd")
        .arg(cwd)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run packline")
}

fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

const CONFIG: &str = r#"{
    "entry": "./src/index.js",
    "rules": [{"test": "\\.js$", "use": ["script"]}]
}"#;

#[test]
fn test_build_json_writes_output() {
    let dir = tempdir().unwrap();
    write(dir.path(), "packline.config.json", CONFIG);
    write(dir.path(), "src/index.js", "import './a.js';\n");
    write(dir.path(), "src/a.js", "export const a = 1;\n");

    let output = packline(dir.path(), &["build", "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(json["ok"], true);
    assert_eq!(json["stats"]["modules"], 2);
    assert_eq!(json["entries"][0]["name"], "main");
    assert!(json["written"].as_u64().unwrap() >= 3);

    assert!(dir.path().join("dist/main.js").is_file());
    assert!(dir.path().join("dist/main.js.map").is_file());
    assert!(dir.path().join("dist/index.html").is_file());
}

#[test]
fn test_build_json_reports_failures_with_codes() {
    let dir = tempdir().unwrap();
    write(dir.path(), "packline.config.json", CONFIG);
    write(dir.path(), "src/index.js", "import './missing.js';\n");

    let output = packline(dir.path(), &["build", "--json", "--dry-run"]);
    assert!(!output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(json["ok"], false);
    assert_eq!(json["written"], 0);
    let code = json["entries"][0]["errors"][0]["code"].as_str().unwrap();
    assert_eq!(code, "PACKLINE_RESOLVE_FAILED");
    assert!(!dir.path().join("dist").exists());
}

#[test]
fn test_missing_config_is_reported() {
    let dir = tempdir().unwrap();
    let output = packline(dir.path(), &["build"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("PACKLINE_CONFIG_INVALID"), "{stderr}");
}
