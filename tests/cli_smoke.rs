use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_path(prefix: &str, ext: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before unix epoch")
        .as_nanos();
    path.push(format!("{prefix}_{}_{}.{}", std::process::id(), nanos, ext));
    path
}

fn find_smc_binary() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_smc") {
        return PathBuf::from(path);
    }

    let current = std::env::current_exe().expect("failed to get current exe path");
    let deps_dir = current
        .parent()
        .expect("failed to get deps dir from current exe")
        .to_path_buf();
    let debug_dir = deps_dir
        .parent()
        .expect("failed to get debug dir from deps dir")
        .to_path_buf();

    let direct = debug_dir.join("smc");
    if direct.exists() {
        return direct;
    }

    for entry in fs::read_dir(&deps_dir).expect("failed to read target deps dir") {
        let entry = entry.expect("failed to read deps entry");
        let path = entry.path();
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if !name.starts_with("smc-") {
            continue;
        }
        if name.ends_with(".d") || name.ends_with(".rlib") || name.ends_with(".rmeta") {
            continue;
        }
        if path.is_file() {
            return path;
        }
    }

    panic!("failed to find smc binary in CARGO_BIN_EXE_smc or target/debug");
}

#[test]
fn cli_runs_an_em_iteration_and_writes_json() {
    let input = unique_temp_path("smc_cli_input", "txt");
    let output = unique_temp_path("smc_cli_output", "json");
    let content = "\
# span a b nb
3000 0 0 1
1 1 0 1
2000 0 0 1
1 0 1 1
1500 0 0 1
";
    fs::write(&input, content).expect("failed to write cli test input");

    let exe = find_smc_binary();
    let status = Command::new(exe)
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .arg("--em-iters")
        .arg("1")
        .arg("--no-pretrain")
        .arg("--pieces")
        .arg("4")
        .arg("--exponential-pieces")
        .arg("0")
        .arg("--hidden-intervals")
        .arg("4")
        .arg("--no-progress")
        .status()
        .expect("failed to run smc binary");
    assert!(status.success(), "smc exited with non-zero status");

    let out = fs::read_to_string(&output).expect("failed to read smc output json");
    let v: Value = serde_json::from_str(&out).expect("output json is invalid");
    assert!(v.get("n0").is_some());
    let s = v.get("s").and_then(Value::as_array).expect("missing s");
    let x = v.get("x").and_then(Value::as_array).expect("missing x");
    assert_eq!(s.len(), 4);
    assert_eq!(x.len(), 4);

    let _ = fs::remove_file(input);
    let _ = fs::remove_file(output);
}
