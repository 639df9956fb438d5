use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

struct CliFixture {
    tmp: TempDir,
    home_dir: PathBuf,
    state_dir: PathBuf,
    config_path: PathBuf,
}

impl CliFixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let home_dir = tmp.path().join("home");
        let state_dir = tmp.path().join("state");
        let config_path = tmp.path().join("config.yaml");
        std::fs::create_dir_all(&home_dir).unwrap();

        Self {
            tmp,
            home_dir,
            state_dir,
            config_path,
        }
    }

    /// A config pointing at a closed local port, so any accidental network
    /// call fails immediately instead of hanging.
    fn write_config(&self) {
        let config = format!(
            "remote:\n  base_url: \"http://127.0.0.1:9/api\"\n  api_key: test-key\nstorage:\n  state_dir: {}\n",
            yaml_quote_path(&self.state_dir)
        );
        std::fs::write(&self.config_path, config).unwrap();
    }

    fn run(&self, args: &[&str]) -> Output {
        let mut cmd = Command::new(scanq_binary_path());
        cmd.args(args);
        cmd.current_dir(self.tmp.path());
        cmd.env("HOME", &self.home_dir);
        cmd.env("XDG_CONFIG_HOME", self.home_dir.join(".config"));
        cmd.env("NO_COLOR", "1");
        cmd.env_remove("SCANQ_CONFIG");
        cmd.env_remove("SCANQ_API_KEY");
        cmd.output().unwrap()
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        if !output.status.success() {
            panic!(
                "command failed: {:?}\nstdout:\n{}\nstderr:\n{}",
                args,
                stdout(&output),
                stderr(&output)
            );
        }
        stdout(&output)
    }

    fn run_err(&self, args: &[&str]) -> (String, String) {
        let output = self.run(args);
        assert!(
            !output.status.success(),
            "command unexpectedly succeeded: {:?}\nstdout:\n{}\nstderr:\n{}",
            args,
            stdout(&output),
            stderr(&output)
        );
        (stdout(&output), stderr(&output))
    }

    fn write_artifact(&self, name: &str, content: &[u8]) -> String {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().to_string()
    }

    fn persisted_state(&self) -> serde_json::Value {
        let data = std::fs::read(self.state_dir.join("state.json")).unwrap();
        serde_json::from_slice(&data).unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn scanq_binary_path() -> PathBuf {
    if let Some(path) = std::env::var_os("CARGO_BIN_EXE_scanq") {
        return PathBuf::from(path);
    }

    let current_exe = std::env::current_exe().expect("failed to resolve current test binary path");
    let debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .expect("unexpected test binary path layout");

    #[cfg(windows)]
    let candidate = debug_dir.join("scanq.exe");
    #[cfg(not(windows))]
    let candidate = debug_dir.join("scanq");

    assert!(
        candidate.exists(),
        "unable to locate scanq binary at {:?}",
        candidate
    );
    candidate
}

fn yaml_quote_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

#[test]
fn config_generates_template_and_refuses_overwrite() {
    let fx = CliFixture::new();
    let dest = fx.tmp.path().join("generated.yaml");
    let dest_str = dest.to_string_lossy().to_string();

    let out = fx.run_ok(&["config", "--dest", &dest_str]);
    assert!(out.contains("Config written to:"));
    let written = std::fs::read_to_string(&dest).unwrap();
    assert!(written.contains("base_url"));
    assert!(written.contains("SCANQ_API_KEY"));

    let (_, err) = fx.run_err(&["config", "--dest", &dest_str]);
    assert!(err.contains("already exists"));
}

#[test]
fn submit_queue_only_persists_the_job() {
    let fx = CliFixture::new();
    fx.write_config();
    let artifact = fx.write_artifact("artifact.bin", b"hello scanq");
    let cfg = fx.config_path.to_string_lossy().to_string();

    let out = fx.run_ok(&["--config", &cfg, "submit", &artifact, "--queue-only"]);
    assert!(out.contains("Queued: artifact.bin"));

    let state = fx.persisted_state();
    let queue = state["queue"].as_array().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0]["id"], "artifact.bin");
    assert_eq!(queue[0]["sizeBytes"], 11);
    assert!(fx.state_dir.join("blobs").join("artifact.bin").exists());

    // A second artifact under an explicit id queues behind the first.
    let out = fx.run_ok(&[
        "--config",
        &cfg,
        "submit",
        &artifact,
        "--id",
        "custom-id",
        "--queue-only",
    ]);
    assert!(out.contains("Queued: custom-id"));
    let state = fx.persisted_state();
    assert_eq!(state["queue"].as_array().unwrap().len(), 2);
    assert_eq!(state["queue"][1]["id"], "custom-id");
}

#[test]
fn duplicate_pending_id_is_rejected() {
    let fx = CliFixture::new();
    fx.write_config();
    let artifact = fx.write_artifact("artifact.bin", b"hello scanq");
    let cfg = fx.config_path.to_string_lossy().to_string();

    fx.run_ok(&["--config", &cfg, "submit", &artifact, "--queue-only"]);
    let (_, err) = fx.run_err(&["--config", &cfg, "submit", &artifact, "--queue-only"]);
    assert!(err.contains("already queued"), "stderr:\n{err}");

    let state = fx.persisted_state();
    assert_eq!(state["queue"].as_array().unwrap().len(), 1);
}

#[test]
fn empty_file_is_rejected_before_queuing() {
    let fx = CliFixture::new();
    fx.write_config();
    let artifact = fx.write_artifact("empty.bin", b"");
    let cfg = fx.config_path.to_string_lossy().to_string();

    let (_, err) = fx.run_err(&["--config", &cfg, "submit", &artifact]);
    assert!(err.contains("is empty"), "stderr:\n{err}");
    assert!(!fx.state_dir.join("state.json").exists());
}

#[test]
fn status_shows_pending_queue_and_empty_window() {
    let fx = CliFixture::new();
    fx.write_config();
    let artifact = fx.write_artifact("artifact.bin", b"hello scanq");
    let cfg = fx.config_path.to_string_lossy().to_string();

    let fresh = fx.run_ok(&["--config", &cfg, "status"]);
    assert!(fresh.contains("Active"));
    assert!(fresh.contains("0 of 4 requests used"));

    fx.run_ok(&["--config", &cfg, "submit", &artifact, "--queue-only"]);
    let out = fx.run_ok(&["--config", &cfg, "status"]);
    assert!(out.contains("artifact.bin"), "stdout:\n{out}");
    assert!(out.contains("QUEUED AT"), "stdout:\n{out}");
}

#[test]
fn run_with_empty_queue_exits_cleanly() {
    let fx = CliFixture::new();
    fx.write_config();
    let cfg = fx.config_path.to_string_lossy().to_string();

    let out = fx.run_ok(&["--config", &cfg, "run"]);
    assert!(out.contains("Queue is empty."));
}

#[test]
fn missing_config_lists_the_search_order() {
    let fx = CliFixture::new();
    let (_, err) = fx.run_err(&["status"]);
    assert!(err.contains("no configuration file found"), "stderr:\n{err}");
    assert!(err.contains("scanq.yaml"), "stderr:\n{err}");
    assert!(err.contains("scanq config"), "stderr:\n{err}");
}

#[test]
fn invalid_config_is_reported_with_the_offending_key() {
    let fx = CliFixture::new();
    let config = format!(
        "remote:\n  base_url: \"http://127.0.0.1:9/api\"\nprogress:\n  tick_ms: 500\nstorage:\n  state_dir: {}\n",
        yaml_quote_path(&fx.state_dir)
    );
    std::fs::write(&fx.config_path, config).unwrap();
    let cfg = fx.config_path.to_string_lossy().to_string();

    let (_, err) = fx.run_err(&["--config", &cfg, "status"]);
    assert!(err.contains("tick_ms"), "stderr:\n{err}");
}
