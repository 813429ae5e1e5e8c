use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn write_sum_dot_file(path: &Path) {
    let source = r#"
        digraph numbers {
            a [label="Constant(2)"]
            b [label="Constant(3)"]
            s [label=Sum]
            a -> s
            b -> s
        }
    "#;
    std::fs::write(path, source).expect("dot file write should succeed");
}

fn write_checks_dot_file(path: &Path) {
    let source = r#"
        digraph checks {
            ok [label="Constant(4)"]
            big [label="Constant(40)"]
            small [label="BoundsCheck(0, 10)"]
            wide [label="BoundsCheck(0, 100)"]
            ok -> wide
            big -> small
        }
    "#;
    std::fs::write(path, source).expect("dot file write should succeed");
}

fn run_cli(args: &[&str], cwd: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_plugflow-cli"))
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("cli process should start")
}

fn describe(output: &std::process::Output) -> String {
    format!(
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn eval_command_dot_file_with_report_expected_value_and_plan() {
    let temp = TempDir::new().expect("tempdir should create");
    let dot_file = temp.path().join("numbers.dot");
    write_sum_dot_file(&dot_file);

    let output = run_cli(
        &[
            "eval",
            "--dot-file",
            dot_file.to_str().expect("dot file path should be utf8"),
            "--shell",
            "s.total",
            "--report",
        ],
        temp.path(),
    );

    assert!(output.status.success(), "{}", describe(&output));
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    assert!(stdout.contains("s.total in mode is_state"));
    assert!(stdout.contains("1. s adds up 5 when asked for total"));
    assert!(stdout.contains("s.total = 5"));
}

#[test]
fn eval_command_config_leaves_first_expected_producer_line_first() {
    let temp = TempDir::new().expect("tempdir should create");
    let config = temp.path().join("engine.json");
    std::fs::write(&config, r#"{"report_order": "leaves_first"}"#)
        .expect("config write should succeed");

    let output = run_cli(
        &[
            "--config",
            config.to_str().expect("config path should be utf8"),
            "eval",
            "--dot-source",
            r#"digraph g { a [label="Constant(1)"]; s [label=Sum]; a -> s; }"#,
            "--shell",
            "s.total",
            "--report",
        ],
        temp.path(),
    );

    assert!(output.status.success(), "{}", describe(&output));
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[1], "1. a provides 1 through lhs to sum");
    assert_eq!(lines[2], "2. s adds up 1 when asked for total");
}

#[test]
fn qa_command_event_json_expected_events_and_failure_exit_code() {
    let temp = TempDir::new().expect("tempdir should create");
    let dot_file = temp.path().join("checks.dot");
    write_checks_dot_file(&dot_file);

    let output = run_cli(
        &[
            "qa",
            "--dot-file",
            dot_file.to_str().expect("dot file path should be utf8"),
            "--check",
            "small.in_range",
            "--check",
            "wide.in_range",
            "--event-json",
        ],
        temp.path(),
    );

    assert_eq!(output.status.code(), Some(2), "{}", describe(&output));
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    let events: Vec<Value> = stdout
        .lines()
        .filter(|line| line.starts_with('{'))
        .map(|line| serde_json::from_str(line).expect("event line should parse"))
        .collect();
    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|event| event.get("kind").and_then(Value::as_str))
        .collect();
    assert_eq!(kinds, vec!["pre_check", "post_check", "pre_check", "post_check"]);
    assert_eq!(events[1]["result"]["failed_items"][0], "40");
    assert!(stdout.contains("checks: 2 passed: 1 failed: 1"));
}

#[test]
fn dirty_command_pending_register_write_expected_dirty_exit_code() {
    let temp = TempDir::new().expect("tempdir should create");

    let output = run_cli(
        &[
            "dirty",
            "--dot-source",
            r#"digraph env { reg [label="Register(1)"]; }"#,
            "--target",
            "7",
        ],
        temp.path(),
    );

    assert_eq!(output.status.code(), Some(2), "{}", describe(&output));
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    assert!(stdout.contains("dirty reg.current: reg holds 1 but should hold 7"));
}

#[test]
fn inspect_command_expected_nodes_edges_and_targets() {
    let temp = TempDir::new().expect("tempdir should create");
    let dot_file = temp.path().join("numbers.dot");
    write_sum_dot_file(&dot_file);

    let output = run_cli(
        &[
            "inspect",
            "--dot-file",
            dot_file.to_str().expect("dot file path should be utf8"),
        ],
        temp.path(),
    );

    assert!(output.status.success(), "{}", describe(&output));
    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf8");
    assert!(stdout.contains("workflow: numbers"));
    assert!(stdout.contains("node s (Sum)"));
    assert!(stdout.contains("edge a.value -> s.lhs"));
    assert!(stdout.contains("edge b.value -> s.rhs"));
}

#[test]
fn eval_command_missing_source_expected_error_exit_code() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(&["eval", "--shell", "s.total"], temp.path());

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    let stderr = String::from_utf8(output.stderr).expect("stderr should be utf8");
    assert!(stderr.contains("one of --dot-file or --dot-source is required"));
}
