//! End-to-end tests running the actual `deckpool` binary against a temp
//! state dir.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Test fixture: isolated config + state + item file.
struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        fs::write(
            dir.path().join("deckpool.toml"),
            r#"
                [eviction]
                max_sets_per_category = 3
                max_age_months = 2

                [categories]
                "cat-science" = "Science"
                "cat-history" = "History"
            "#,
        )
        .expect("failed to write config");

        let items: Vec<serde_json::Value> = (1..=6)
            .map(|i| {
                serde_json::json!({
                    "id": format!("i{i:02}"),
                    "categoryId": "cat-science",
                    "payload": {"q": format!("science question {i}")}
                })
            })
            .collect();
        fs::write(
            dir.path().join("items.json"),
            serde_json::to_string_pretty(&items).unwrap(),
        )
        .expect("failed to write items");

        Self { dir }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("deckpool").expect("binary builds");
        cmd.current_dir(self.dir.path())
            .env("DECKPOOL_STATE_DIR", self.dir.path().join("state"))
            .env("DECKPOOL_CONFIG_DIR", self.dir.path().join("config"))
            .arg("--config")
            .arg(self.dir.path().join("deckpool.toml"));
        cmd
    }
}

#[test]
fn ingest_build_allocate_roundtrip() {
    let env = TestEnv::new();

    env.cmd()
        .args(["ingest", "--file", "items.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stored 6 items"));

    env.cmd()
        .args(["generate-sets", "--num-sets", "2", "--items-per-set", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("built 2 sets"));

    // State persisted across invocations: allocation sees the built pool.
    env.cmd()
        .args(["allocate", "--user", "u1", "--category", "cat-science"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cat-science: qs-"));

    // A category with an empty pool fails per-category, not the request.
    env.cmd()
        .args([
            "allocate",
            "--user",
            "u1",
            "--category",
            "cat-science,cat-history",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("cat-history: failed"));

    env.cmd()
        .args(["pool", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cat-science: 2 available"));
}

#[test]
fn successive_allocations_differ() {
    let env = TestEnv::new();
    env.cmd().args(["ingest", "--file", "items.json"]).assert().success();
    env.cmd()
        .args(["generate-sets", "--num-sets", "3", "--items-per-set", "2"])
        .assert()
        .success();

    let first = env
        .cmd()
        .args(["--json", "allocate", "--user", "u1", "--category", "cat-science"])
        .output()
        .unwrap();
    let second = env
        .cmd()
        .args(["--json", "allocate", "--user", "u1", "--category", "cat-science"])
        .output()
        .unwrap();

    let parse = |bytes: &[u8]| -> serde_json::Value { serde_json::from_slice(bytes).unwrap() };
    let a = parse(&first.stdout);
    let b = parse(&second.stdout);
    assert_ne!(
        a["successful"]["cat-science"], b["successful"]["cat-science"],
        "successive draws must return distinct sets"
    );
}

#[test]
fn validation_errors_exit_one() {
    let env = TestEnv::new();

    env.cmd()
        .args(["generate-sets", "--num-sets", "0", "--items-per-set", "5"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("strictly positive"));

    env.cmd()
        .args(["allocate", "--user", "u1", "--category", "cat-unknown"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown category"));
}

#[test]
fn reset_user_restarts_draw_order() {
    let env = TestEnv::new();
    env.cmd().args(["ingest", "--file", "items.json"]).assert().success();
    env.cmd()
        .args(["generate-sets", "--num-sets", "3", "--items-per-set", "2"])
        .assert()
        .success();

    let draw = |env: &TestEnv| -> serde_json::Value {
        let out = env
            .cmd()
            .args(["--json", "allocate", "--user", "u1", "--category", "cat-science"])
            .output()
            .unwrap();
        serde_json::from_slice(&out.stdout).unwrap()
    };

    let first = draw(&env);
    env.cmd()
        .args(["reset-user", "--user", "u1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cleared 1 allocations"));

    let again = draw(&env);
    assert_eq!(
        first["successful"]["cat-science"], again["successful"]["cat-science"],
        "after reset the user draws from the pool head again"
    );
}

#[test]
fn pool_drain_shrinks_the_pool() {
    let env = TestEnv::new();
    env.cmd().args(["ingest", "--file", "items.json"]).assert().success();
    env.cmd()
        .args(["generate-sets", "--num-sets", "3", "--items-per-set", "2"])
        .assert()
        .success();

    env.cmd()
        .args(["pool", "drain", "--category", "cat-science"])
        .assert()
        .success()
        .stdout(predicate::str::contains("drained 1 sets"));

    env.cmd()
        .args(["pool", "status", "--category", "cat-science"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cat-science: 2 available"));
}

#[test]
fn categories_lists_configured_table() {
    let env = TestEnv::new();
    env.cmd()
        .args(["categories"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("cat-science: Science")
                .and(predicate::str::contains("cat-history: History")),
        );
}
