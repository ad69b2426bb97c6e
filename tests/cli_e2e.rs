//! End-to-end CLI tests for the oai-harvester binary.

// `Command::cargo_bin` is deprecated in assert_cmd >=2.0.17 in favor of
// `cargo::cargo_bin_cmd!` macro. Suppressed until migration to the new API.
#![allow(deprecated)]

mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use support::oai::{
    Token, base_url, first_page_of, mount_repository_info, mount_sets, oai_error, page_for_token,
    records_page, xml,
};
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A command isolated from the user's config file.
fn harvester_cmd(tempdir: &TempDir) -> Command {
    let config_home = tempdir.path().join("xdg-config");
    std::fs::create_dir_all(&config_home).unwrap();
    let mut cmd = Command::cargo_bin("oai-harvester").unwrap();
    cmd.env("XDG_CONFIG_HOME", &config_home)
        .env_remove("RUST_LOG")
        .current_dir(tempdir.path());
    cmd
}

async fn mount_small_repository(server: &MockServer) {
    mount_repository_info(server, "Example Repository").await;
    mount_sets(server, &[("S1", "First"), ("S2", "Second")]).await;
    first_page_of("S1")
        .respond_with(xml(records_page(&["a1"], Some(Token::next("S1-2")))))
        .mount(server)
        .await;
    page_for_token("S1-2")
        .respond_with(xml(records_page(&["a2"], Some(Token::last()))))
        .mount(server)
        .await;
    first_page_of("S2")
        .respond_with(xml(oai_error("noRecordsMatch", "none")))
        .mount(server)
        .await;
}

#[test]
fn test_binary_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("oai-harvester").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("harvest"))
        .stdout(predicate::str::contains("identify"))
        .stdout(predicate::str::contains("sets"))
        .stdout(predicate::str::contains("formats"));
}

#[test]
fn test_binary_version_flag() {
    let mut cmd = Command::cargo_bin("oai-harvester").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

// ==================== Configuration errors ====================

#[tokio::test]
async fn test_binary_conflicting_set_lists_exit_two_before_any_request() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let assert = harvester_cmd(&tempdir)
        .args(["harvest", "--repo-prefix", "repo", "--base-url"])
        .arg(base_url(&server))
        .args(["--allow-set", "S1", "--deny-set", "S2"])
        .assert()
        .failure();
    assert_eq!(assert.get_output().status.code(), Some(2));
}

#[test]
fn test_binary_missing_base_url_exit_two() {
    let tempdir = TempDir::new().unwrap();
    let assert = harvester_cmd(&tempdir)
        .args(["harvest", "--repo-prefix", "repo"])
        .assert()
        .failure();
    assert_eq!(assert.get_output().status.code(), Some(2));
}

#[test]
fn test_binary_missing_explicit_config_exit_two() {
    let tempdir = TempDir::new().unwrap();
    let assert = harvester_cmd(&tempdir)
        .args(["harvest", "--config", "does-not-exist.toml"])
        .assert()
        .failure();
    assert_eq!(assert.get_output().status.code(), Some(2));
}

#[test]
fn test_binary_missing_allow_list_file_exit_two() {
    let tempdir = TempDir::new().unwrap();
    let assert = harvester_cmd(&tempdir)
        .args([
            "harvest",
            "--base-url",
            "http://127.0.0.1:9/oai",
            "--repo-prefix",
            "repo",
            "--allow-list",
            "missing-sets.txt",
        ])
        .assert()
        .failure();
    assert_eq!(assert.get_output().status.code(), Some(2));
}

// ==================== Harvest runs ====================

#[tokio::test]
async fn test_binary_harvest_writes_pages_and_latest_pointer() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_small_repository(&server).await;

    let tempdir = TempDir::new().unwrap();
    let out = tempdir.path().join("archive");
    harvester_cmd(&tempdir)
        .args(["-q", "harvest", "--repo-prefix", "repo", "--base-url"])
        .arg(base_url(&server))
        .arg("--output-dir")
        .arg(&out)
        .args(["--harvest-date", "2024-03-01", "--attempt-delay", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("outcome:         success"))
        .stdout(predicate::str::contains("S1 (First): files=2"))
        .stdout(predicate::str::contains("S2 (Second): files=0"));

    let day = out.join("repo/oai_dc/2024-03-01/S1");
    assert!(day.join("1.xml").is_file());
    assert!(day.join("2.xml").is_file());
    assert_eq!(
        std::fs::read_to_string(out.join("repo/oai_dc/latest.txt")).unwrap(),
        "2024-03-01"
    );
    // A successful job leaves no checkpoint behind.
    assert!(
        !tempdir
            .path()
            .join(".oai-harvester/repo__oai_dc.checkpoint.json")
            .exists()
    );
}

#[tokio::test]
async fn test_binary_config_file_supplies_repository() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_small_repository(&server).await;

    let tempdir = TempDir::new().unwrap();
    let out = tempdir.path().join("archive");
    let config_path = tempdir.path().join("harvest.toml");
    std::fs::write(
        &config_path,
        format!(
            "base_url = \"{}\"\nrepo_prefix = \"fromfile\"\nattempt_delay_secs = 0\ncheckpoint = false\n",
            base_url(&server)
        ),
    )
    .unwrap();

    harvester_cmd(&tempdir)
        .args(["-q", "harvest", "--config"])
        .arg(&config_path)
        .arg("--output-dir")
        .arg(&out)
        .args(["--harvest-date", "2024-03-01"])
        .assert()
        .success();

    assert!(out.join("fromfile/oai_dc/2024-03-01/S1/1.xml").is_file());
}

#[tokio::test]
async fn test_binary_fail_on_error_exit_one() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_repository_info(&server, "Example Repository").await;
    mount_sets(&server, &[("S1", "First")]).await;
    first_page_of("S1")
        .respond_with(xml(oai_error("badArgument", "bad set")))
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let out = tempdir.path().join("archive");
    let assert = harvester_cmd(&tempdir)
        .args(["-q", "harvest", "--repo-prefix", "repo", "--fail-on-error", "--no-checkpoint"])
        .arg("--base-url")
        .arg(base_url(&server))
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .failure()
        .stdout(predicate::str::contains("outcome:         failure"))
        .stdout(predicate::str::contains("error: OAI-PMH error badArgument: bad set"));
    assert_eq!(assert.get_output().status.code(), Some(1));
    assert!(!out.join("repo/oai_dc/latest.txt").exists());
}

// ==================== Inspection commands ====================

#[tokio::test]
async fn test_binary_sets_command_lists_sets() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_sets(&server, &[("S1", "First"), ("S2", "Second")]).await;

    let tempdir = TempDir::new().unwrap();
    harvester_cmd(&tempdir)
        .args(["-q", "sets", "--base-url"])
        .arg(base_url(&server))
        .assert()
        .success()
        .stdout(predicate::str::contains("S1  First"))
        .stdout(predicate::str::contains("S2  Second"));
}

#[tokio::test]
async fn test_binary_identify_command_prints_name() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_repository_info(&server, "Example Repository").await;

    let tempdir = TempDir::new().unwrap();
    harvester_cmd(&tempdir)
        .args(["-q", "identify", "--base-url"])
        .arg(base_url(&server))
        .assert()
        .success()
        .stdout(predicate::str::contains("repositoryName:    Example Repository"));
}
