use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

fn runplane(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("runplane").expect("binary built");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("RUST_LOG")
        .env_remove("RUNPLANE_SESSION_SECRET")
        .env_remove("RUNPLANE_MODEL_API_BASE")
        .env_remove("RUNPLANE_MODEL_API_KEY");
    cmd
}

#[test]
fn models_reports_the_next_tool_candidate_after_exhaustion() {
    let home = TempDir::new().unwrap();
    let output = runplane(&home)
        .args([
            "--output",
            "json",
            "models",
            "--step",
            "tool",
            "--exhausted",
            "flash-lite",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{:?}", output);

    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["exhausted"], serde_json::json!(["flash-lite"]));
    let decisions = report["decisions"].as_array().unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0]["step"], "tool");
    assert_eq!(decisions[0]["model"], "flash");
    assert_eq!(decisions[0]["fallback"], false);
    assert_eq!(report["catalog"].as_array().unwrap().len(), 5);
}

#[test]
fn exhausting_every_synthesis_candidate_falls_back_to_the_most_capable() {
    let home = TempDir::new().unwrap();
    let output = runplane(&home)
        .args([
            "models",
            "--output",
            "json",
            "--step",
            "synthesis",
            "--exhausted",
            "flash-lite,flash,frontier-flash,pro,frontier-pro",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{:?}", output);
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["decisions"][0]["model"], "frontier-pro");
    assert_eq!(report["decisions"][0]["fallback"], true);
}

#[test]
fn vault_round_trips_session_state_through_stdin() {
    let home = TempDir::new().unwrap();
    let state = r#"{"cookies":[{"name":"sid","value":"abc"}],"origins":[]}"#;

    let encrypted = runplane(&home)
        .env("RUNPLANE_SESSION_SECRET", "correct horse")
        .args(["vault", "encrypt"])
        .write_stdin(state)
        .output()
        .unwrap();
    assert!(encrypted.status.success(), "{:?}", encrypted);
    let blob = String::from_utf8(encrypted.stdout).unwrap();
    let blob = blob.trim();
    let (iv, ciphertext) = blob.split_once(':').unwrap();
    assert_eq!(iv.len(), 32);
    assert!(!ciphertext.is_empty());

    let decrypted = runplane(&home)
        .env("RUNPLANE_SESSION_SECRET", "correct horse")
        .args(["--output", "json", "vault", "decrypt", blob])
        .output()
        .unwrap();
    assert!(decrypted.status.success(), "{:?}", decrypted);
    let value: Value = serde_json::from_slice(&decrypted.stdout).unwrap();
    assert_eq!(value["cookies"][0]["name"], "sid");

    let wrong_key = runplane(&home)
        .env("RUNPLANE_SESSION_SECRET", "another secret")
        .args(["vault", "decrypt", blob])
        .output()
        .unwrap();
    assert!(!wrong_key.status.success());
}

#[test]
fn vault_without_a_secret_fails() {
    let home = TempDir::new().unwrap();
    runplane(&home)
        .args(["vault", "encrypt", "{}"])
        .assert()
        .failure();
}
