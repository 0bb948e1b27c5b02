use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const GREET: &str = "def main(argv):\n    print('hello', *argv)\n";

fn ppc(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ppc"));
    cmd.env_remove("PPC_RUN_TIMEOUT")
        .env_remove("PPC_INTERPRETER")
        .arg("--home")
        .arg(home);
    cmd
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

#[test]
fn test_help() {
    Command::new(env!("CARGO_BIN_EXE_ppc"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn test_version() {
    Command::new(env!("CARGO_BIN_EXE_ppc"))
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ppc"));
}

#[test]
fn test_overview_without_command() {
    let home = TempDir::new().unwrap();

    ppc(home.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No commands found."))
        .stdout(predicate::str::contains("Management:"));

    assert!(home.path().join("commands").is_dir());
    assert!(home.path().join("addons").is_dir());
}

#[test]
fn test_list_shows_both_sources() {
    let home = TempDir::new().unwrap();
    write(&home.path().join("commands").join("head.py"), GREET);
    write(
        &home.path().join("addons").join("toolbox").join("commands").join("greet.py"),
        GREET,
    );

    ppc(home.path())
        .args(["list", "--detailed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("head"))
        .stdout(predicate::str::contains("greet"))
        .stdout(predicate::str::contains("Built-in"))
        .stdout(predicate::str::contains(
            "Total: 2 commands (1 official, 1 community)",
        ));

    ppc(home.path())
        .args(["list", "--source", "community"])
        .assert()
        .success()
        .stdout(predicate::str::contains("greet"))
        .stdout(predicate::str::contains("head").not());
}

#[test]
fn test_info_and_search() {
    let home = TempDir::new().unwrap();
    let addon = home.path().join("addons").join("greet");
    write(&addon.join("main.py"), GREET);
    write(
        &addon.join("ppc.project.json"),
        r#"{"version": "1.2.0", "author": "acme", "description": "Says hello", "dependencies": ["rich"]}"#,
    );

    ppc(home.path())
        .args(["info", "greet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1.2.0"))
        .stdout(predicate::str::contains("Community"))
        .stdout(predicate::str::contains("rich"));

    ppc(home.path())
        .args(["search", "HELLO"])
        .assert()
        .success()
        .stdout(predicate::str::contains("greet"));

    ppc(home.path())
        .args(["info", "missing"])
        .assert()
        .code(2);
}

#[test]
fn test_unknown_command() {
    let home = TempDir::new().unwrap();

    ppc(home.path())
        .arg("nope")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown command: nope"));
}

#[test]
fn test_disallowed_scheme_is_rejected() {
    let home = TempDir::new().unwrap();

    ppc(home.path())
        .args(["install", "ftp://example.com/tool"])
        .assert()
        .code(8)
        .stderr(predicate::str::contains("'ftp'"));

    assert!(!home.path().join("addons").join("tool").exists());
}

#[test]
fn test_update_refuses_manual_install() {
    let home = TempDir::new().unwrap();
    write(&home.path().join("addons").join("manual").join("main.py"), GREET);

    ppc(home.path())
        .args(["update", "manual"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not installed via git"));
}

#[test]
fn test_uninstall() {
    let home = TempDir::new().unwrap();
    let addon = home.path().join("addons").join("greet");
    write(&addon.join("main.py"), GREET);

    // Without a terminal the confirmation takes its default answer: no.
    ppc(home.path()).args(["uninstall", "greet"]).assert().success();
    assert!(addon.exists());

    ppc(home.path())
        .args(["uninstall", "greet", "--yes"])
        .assert()
        .success();
    assert!(!addon.exists());
}

#[test]
fn test_risky_community_command_is_not_run() {
    let home = TempDir::new().unwrap();
    write(
        &home.path().join("addons").join("risky").join("main.py"),
        "import subprocess\n\ndef main(argv):\n    subprocess.run(['true'])\n",
    );

    ppc(home.path()).arg("risky").assert().code(8);
}

#[test]
fn test_doctor_reports_directories() {
    let home = TempDir::new().unwrap();

    ppc(home.path())
        .args(["doctor", "--verbose"])
        .assert()
        .stdout(predicate::str::contains("[PASS] Directories"))
        .stdout(predicate::str::contains("[PASS] Cache"));
}

#[test]
fn test_run_forwards_arguments() {
    if !python_available() {
        return;
    }
    let home = TempDir::new().unwrap();
    write(&home.path().join("commands").join("greet.py"), GREET);

    ppc(home.path())
        .args(["greet", "--loud", "world"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello --loud world"));
}

#[test]
fn test_run_failure_kinds() {
    if !python_available() {
        return;
    }
    let home = TempDir::new().unwrap();
    let commands = home.path().join("commands");
    write(&commands.join("quits.py"), "import sys\n\ndef main(argv):\n    sys.exit(3)\n");
    write(&commands.join("raises.py"), "def main(argv):\n    raise RuntimeError('boom')\n");
    write(&commands.join("nomain.py"), "VALUE = 1\n");
    write(
        &commands.join("needs.py"),
        "import ppc_missing_dependency_12345\n\ndef main(argv):\n    pass\n",
    );

    ppc(home.path())
        .arg("quits")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("exited with status 3"));
    ppc(home.path())
        .arg("raises")
        .assert()
        .code(6)
        .stderr(predicate::str::contains("RuntimeError: boom"));
    ppc(home.path()).arg("nomain").assert().code(5);
    ppc(home.path()).arg("needs").assert().code(7);
}

#[test]
fn test_run_timeout() {
    if !python_available() {
        return;
    }
    let home = TempDir::new().unwrap();
    write(
        &home.path().join("commands").join("hang.py"),
        "import time\n\ndef main(argv):\n    while True:\n        time.sleep(1)\n",
    );

    let started = Instant::now();
    ppc(home.path())
        .args(["--timeout", "1", "hang"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[test]
fn test_local_script() {
    if !python_available() {
        return;
    }
    let home = TempDir::new().unwrap();
    let script = home.path().join("main.py");
    write(&script, GREET);

    ppc(home.path())
        .arg("test")
        .arg("--file")
        .arg(&script)
        .args(["--", "a", "b"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello a b"));
}
