use std::path::Path;
use std::process::{Command, Output};

/// Run the CLI with an isolated HOME so credentials never touch the real data dir.
pub fn run_cli_with_env(args: &[&str], home: &Path, api_url: &str) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fixly"));
    cmd.args(args);
    cmd.env("HOME", home);
    cmd.env("XDG_DATA_HOME", home.join("data"));
    cmd.env("FIXLY_API_URL", api_url);
    cmd.env_remove("FIXLY_PASSWORD");
    cmd.env_remove("RUST_LOG");
    cmd.output().expect("Failed to execute CLI")
}

/// Run the CLI with a custom HOME and expect success.
pub fn run_cli_with_env_success(args: &[&str], home: &Path, api_url: &str) -> String {
    let output = run_cli_with_env(args, home, api_url);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!("CLI command failed: {:?}\nstderr: {}", args, stderr);
    }
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Run the CLI with a custom HOME and expect failure, returning stderr.
pub fn run_cli_with_env_failure(args: &[&str], home: &Path, api_url: &str) -> String {
    let output = run_cli_with_env(args, home, api_url);
    if output.status.success() {
        panic!("CLI command should have failed: {:?}", args);
    }
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// The credential document written by the CLI.
pub fn stored_entries(home: &Path) -> serde_json::Value {
    let path = home.join("data").join("fixly").join("credentials.json");
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str::<serde_json::Value>(&content).unwrap()["entries"].clone(),
        Err(_) => serde_json::Value::Null,
    }
}
