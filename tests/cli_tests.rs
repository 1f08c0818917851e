//! Binary-level smoke tests through `assert_cmd`.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

const RECORDS: &str = "\
>USA/CA-1/2021-01-10|1001|N501Y, E484K\n\
>USA/NY-2/2021-01-25|1002|N501Y, D614G\n\
>India/MH-3/2021-04-02|1003|L452R, P681R\n";

fn record_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".txt")
        .tempfile()
        .expect("temp file");
    file.write_all(RECORDS.as_bytes()).expect("write records");
    file.flush().expect("flush records");
    file
}

#[test]
fn help_shows_usage() {
    Command::cargo_bin("vql")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn one_shot_command_prints_a_report() {
    let file = record_file();
    Command::cargo_bin("vql")
        .unwrap()
        .arg(file.path())
        .args(["--command", "countries"])
        .assert()
        .success()
        .stdout(predicate::str::contains("USA"))
        .stdout(predicate::str::contains("India"));
}

#[test]
fn syntax_error_fails_the_one_shot() {
    let file = record_file();
    Command::cargo_bin("vql")
        .unwrap()
        .arg(file.path())
        .args(["--command", "from USA +"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Error"));
}

#[test]
fn repl_evaluates_stdin_until_exit() {
    let file = record_file();
    Command::cargo_bin("vql")
        .unwrap()
        .arg(file.path())
        .write_stdin("countries\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("USA"));
}

#[test]
fn missing_input_file_is_an_error() {
    Command::cargo_bin("vql")
        .unwrap()
        .arg("/no/such/file.txt")
        .assert()
        .failure();
}
