//! Launcher CLI End-to-End Tests
//!
//! These tests run the `sgc` binary the way a user would: JVM-style
//! options before the workload, exit codes and the `All good` marker on
//! stdout, uncaught errors on stderr.
//!
//! ============================================================================
//! EACH TEST FINDS SPECIFIC LAUNCHER BUGS - DO NOT WEAKEN ASSERTIONS
//! ============================================================================

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

const UNLOCK: [&str; 2] = ["-XX:+UnlockDiagnosticVMOptions", "-XX:+UnlockExperimentalVMOptions"];

/// Get the path to the sgc binary
fn sgc_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sgc"))
}

/// A command isolated from the caller's `SGC_*` environment
fn sgc() -> Command {
    let mut cmd = Command::new(sgc_bin());
    for var in [
        "SGC_OPTS",
        "SGC_MAX_HEAP",
        "SGC_HEURISTICS",
        "SGC_VERIFY",
        "SGC_RANDOM_SEED",
        "SGC_LOG_JSON",
        "SGC_STATS_JSON",
        "SGC_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("SGC_NO_COLOR", "true");
    cmd
}

// ============================================================================
// Command line surface
// ============================================================================

/// **Bug this finds:** Help broken by the VM option pre-pass
/// **Invariant verified:** Help lists workloads and VM option syntax
#[test]
fn test_cli_help() {
    sgc()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("class-loader-leak"))
        .stdout(predicate::str::contains("SGC_OPTS"));
}

/// **Bug this finds:** Version flag not wired
/// **Invariant verified:** Version matches the package
#[test]
fn test_cli_version() {
    sgc()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

/// **Bug this finds:** Missing workload accepted
/// **Invariant verified:** clap usage error, exit code 2
#[test]
fn test_cli_requires_workload() {
    sgc().arg("-Xmx8m").assert().code(2);
}

// ============================================================================
// Option handling
// ============================================================================

/// **Bug this finds:** Startup or shutdown failing on the simplest program
/// **Invariant verified:** Greeting and success marker on stdout, exit 0
#[test]
fn test_hello_world() {
    sgc()
        .args(["-Xmx8m", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello World"))
        .stdout(predicate::str::contains("All good"));
}

/// **Bug this finds:** Unknown options silently ignored
/// **Invariant verified:** JVM-style rejection, exit 2, nothing run
#[test]
fn test_unrecognized_option_rejected() {
    sgc()
        .args(["-XX:+ShenandoahBogusFlag", "hello"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("All good").not())
        .stderr(predicate::str::contains("Unrecognized VM option"))
        .stderr(predicate::str::contains("ShenandoahBogusFlag"))
        .stderr(predicate::str::contains("Could not create the Java Virtual Machine"));
}

/// **Bug this finds:** SGC_OPTS not validated like the command line
/// **Invariant verified:** Bad option from the environment exits 2
#[test]
fn test_env_options_validated() {
    sgc()
        .env("SGC_OPTS", "-Xmx8m -XX:+NoSuchThing")
        .arg("hello")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unrecognized VM option"));
}

/// **Bug this finds:** IgnoreUnrecognizedVMOptions not honoured
/// **Invariant verified:** Unknown option skipped, program runs
#[test]
fn test_ignore_unrecognized_options() {
    sgc()
        .args(["-XX:+IgnoreUnrecognizedVMOptions", "-XX:+NoSuchThing", "-Xmx8m", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All good"));
}

/// **Bug this finds:** Diagnostic flags usable without unlocking
/// **Invariant verified:** Locked flag names its unlock option, exit 2
#[test]
fn test_locked_flag_rejected() {
    sgc()
        .args(["-Xmx8m", "-XX:+ShenandoahVerify", "hello"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("UnlockDiagnosticVMOptions"));

    sgc()
        .args(["-Xmx8m", "-XX:ShenandoahGCHeuristics=passive", "hello"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("UnlockDiagnosticVMOptions"));
}

/// **Bug this finds:** Unlock order mattering
/// **Invariant verified:** Unlock after the locked flag still unlocks it
#[test]
fn test_unlock_after_flag() {
    sgc()
        .args(["-Xmx8m", "-XX:+ShenandoahVerify", "-XX:+UnlockDiagnosticVMOptions", "hello"])
        .assert()
        .success();
}

/// **Bug this finds:** Workload argument errors reported as crashes
/// **Invariant verified:** Usage error, exit 2
#[test]
fn test_bad_workload_argument() {
    sgc()
        .args(["-Xmx8m", "sieve", "many"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("count must be a number"));
}

// ============================================================================
// Workload outcomes
// ============================================================================

/// **Bug this finds:** Dead class loaders never unloaded
/// **Invariant verified:** 128 x 1MB statics fit a 32MB heap
#[test]
fn test_class_loader_leak_with_unloading() {
    sgc()
        .args(UNLOCK)
        .args(["-Xmx32m", "-XX:ShenandoahGCHeuristics=passive", "class-loader-leak", "128", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All good"));
}

/// **Bug this finds:** Loaders unloaded even when unloading is off
/// **Invariant verified:** Uncaught OutOfMemoryError in main, exit 1
#[test]
fn test_class_loader_leak_without_unloading() {
    sgc()
        .args(UNLOCK)
        .args([
            "-Xmx32m",
            "-XX:ShenandoahGCHeuristics=passive",
            "-XX:-ClassUnloading",
            "class-loader-leak",
            "128",
            "1",
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("All good").not())
        .stderr(predicate::str::contains(
            "Exception in thread \"main\" java.lang.OutOfMemoryError: Java heap space",
        ));
}

/// **Bug this finds:** Heap not recovered after a thread dies of OOM
/// **Invariant verified:** Workers report OOM, main finishes, exit 0
#[test]
fn test_thread_failure() {
    sgc()
        .args(["-Xmx16m", "thread-failure", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All good"))
        .stderr(predicate::str::contains(
            "Exception in thread \"Thread-0\" java.lang.OutOfMemoryError: Java heap space",
        ))
        .stderr(predicate::str::contains("Exception in thread \"Thread-3\""));
}

/// **Bug this finds:** -verbose:gc accepted but not reporting
/// **Invariant verified:** Phase table printed after the program
#[test]
fn test_verbose_gc_prints_stats() {
    sgc()
        .args(UNLOCK)
        .args(["-Xmx16m", "-verbose:gc", "-XX:ShenandoahGCHeuristics=aggressive", "sieve", "20000", "1000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All good"))
        .stdout(predicate::str::contains("Phase"));
}

/// **Bug this finds:** Stats file missing, or not matching the run
/// **Invariant verified:** JSON report names workload, mode and exit code
#[test]
fn test_stats_json_written() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let stats_path = temp_dir.path().join("stats.json");

    sgc()
        .arg("--stats-json")
        .arg(&stats_path)
        .args(UNLOCK)
        .args(["-Xmx32m", "-XX:ShenandoahGCHeuristics=passive", "class-loader-leak", "64", "1"])
        .assert()
        .success();

    let raw = std::fs::read_to_string(&stats_path).expect("stats file should exist");
    let report: serde_json::Value = serde_json::from_str(&raw).expect("stats should be JSON");
    assert_eq!(report["workload"], "ClassLoaderLeak");
    assert_eq!(report["heuristics"], "passive");
    assert_eq!(report["exit_code"], 0);
    assert!(report["summary"]["full_cycles"].as_u64().unwrap() >= 1);
    assert!(report["loaders_unloaded"].as_u64().unwrap() >= 1);
    assert_eq!(report["summary"]["concurrent_cycles"], 0);
}
