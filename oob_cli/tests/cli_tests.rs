use assert_cmd::Command;
use predicates::prelude::*;

fn oob() -> Command {
    Command::cargo_bin("oob").expect("oob binary exists")
}

fn create(args: &[&str]) -> String {
    let output = oob()
        .args(args)
        .output()
        .expect("failed to execute create command");
    assert!(output.status.success());

    String::from_utf8(output.stdout)
        .expect("invalid utf-8")
        .trim()
        .to_string()
}

#[test]
fn test_create_and_decode() {
    let url = create(&[
        "--label",
        "Faber College",
        "create",
        "--endpoint",
        "https://faber.example/didcomm",
        "--domain",
        "https://faber.example/ssi",
    ]);

    assert!(url.starts_with("https://faber.example/ssi?oob="));

    oob()
        .args(["decode", url.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"label\": \"Faber College\""))
        .stdout(predicate::str::contains("https://didcomm.org/didexchange/1.1"))
        .stdout(predicate::str::contains("https://faber.example/didcomm"));
}

#[test]
fn test_create_legacy() {
    let url = create(&[
        "create",
        "--legacy",
        "--endpoint",
        "https://faber.example/didcomm",
    ]);

    assert!(url.contains("?c_i="));

    oob()
        .args(["decode", url.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://didcomm.org/connections/1.0/invitation"))
        .stdout(predicate::str::contains("recipientKeys"));
}

#[test]
fn test_legacy_from_out_of_band() {
    let url = create(&["create", "--endpoint", "https://faber.example/didcomm"]);

    let output = oob()
        .args(["legacy", url.as_str(), "--domain", "https://faber.example/ssi"])
        .output()
        .expect("failed to execute legacy command");
    assert!(output.status.success());

    let legacy = String::from_utf8(output.stdout).expect("invalid utf-8");
    assert!(legacy.trim().starts_with("https://faber.example/ssi?c_i="));
}

#[test]
fn test_create_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.json");
    std::fs::write(
        &path,
        r#"{ "label": "Acme", "defaultEndpoints": ["wss://acme.example/ws"] }"#,
    )
    .unwrap();

    let url = create(&["--config", path.to_str().unwrap(), "create"]);

    oob()
        .args(["decode", url.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"label\": \"Acme\""))
        .stdout(predicate::str::contains("wss://acme.example/ws"));
}

#[test]
fn test_create_without_endpoint() {
    oob()
        .arg("create")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no endpoints configured"));
}

#[test]
fn test_decode_without_invitation() {
    oob()
        .args(["decode", "not a url"])
        .assert()
        .failure();
}
