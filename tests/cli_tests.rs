//! End-to-end tests of the `mailview` binary.

use std::path::Path;
use std::process::{Command, Output};

use assert_fs::prelude::*;
use predicates::prelude::*;

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Run the binary with an isolated config and cache directory.
fn mailview(home: &assert_fs::TempDir, args: &[&str]) -> Output {
    let config = home.child("config.toml");
    config
        .write_str(&format!(
            "[general]\ncache_dir = {:?}\n\n[pgp]\nenabled = false\n\n[[identities]]\nname = \"Me\"\nemail = \"me@example.org\"\n",
            home.child("cache").path().display().to_string()
        ))
        .unwrap();

    Command::new(env!("CARGO_BIN_EXE_mailview"))
        .args(args)
        .env("MAILVIEW_CONFIG", config.path())
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_show_prints_headers_and_attachment_table() {
    let home = assert_fs::TempDir::new().unwrap();
    let file = fixture("three-attachments.eml");
    let output = mailview(&home, &["show", file.to_str().unwrap()]);

    assert!(output.status.success());
    let text = stdout(&output);
    let expected = predicate::str::contains("Trip documents")
        .and(predicate::str::contains("travel, work"))
        .and(predicate::str::contains("ticket.pdf"))
        .and(predicate::str::contains("notes.txt"))
        .and(predicate::str::contains("Tickets and hotel attached."));
    assert!(expected.eval(&text), "{text}");
}

#[test]
fn test_show_json_carries_calendar_preview() {
    let home = assert_fs::TempDir::new().unwrap();
    let file = fixture("invite-berlin.eml");
    let output = mailview(&home, &["show", "--json", file.to_str().unwrap()]);

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let preview = &json["attachments"][0]["preview"];
    assert_eq!(preview["timezone"], "Europe/Berlin");
    assert_eq!(preview["status"], "TENTATIVE");
    assert_eq!(preview["attendees"], "Bob, me@example.org (you)");
}

#[test]
fn test_attachment_is_written_to_output() {
    let home = assert_fs::TempDir::new().unwrap();
    let out = home.child("ticket.pdf");
    let file = fixture("three-attachments.eml");
    let output = mailview(
        &home,
        &[
            "attachment",
            file.to_str().unwrap(),
            "0",
            "-o",
            out.path().to_str().unwrap(),
        ],
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    out.assert(predicate::path::is_file());
    assert_eq!(std::fs::read(out.path()).unwrap(), b"%PDF-1.4\n");
}

#[test]
fn test_out_of_range_attachment_fails() {
    let home = assert_fs::TempDir::new().unwrap();
    let file = fixture("self-reply.eml");
    let output = mailview(&home, &["attachment", file.to_str().unwrap(), "0"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(predicate::str::contains("no attachment").eval(&stderr), "{stderr}");
}

#[test]
fn test_verify_unsigned_message() {
    let home = assert_fs::TempDir::new().unwrap();
    let file = fixture("self-reply.eml");
    let output = mailview(&home, &["verify", file.to_str().unwrap()]);

    assert!(output.status.success());
    assert!(predicate::str::contains("Signature: none").eval(&stdout(&output)));
}

#[test]
fn test_missing_file_fails() {
    let home = assert_fs::TempDir::new().unwrap();
    let missing = home.child("nope.eml");
    let output = mailview(&home, &["show", missing.path().to_str().unwrap()]);
    assert!(!output.status.success());
}
