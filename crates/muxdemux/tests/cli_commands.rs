#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::process::{Command, Output, Stdio};

fn run_with_stdin(args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_muxdemux"))
        .args(["--log-level", "off"])
        .args(args)
        .env_remove("MUXDEMUX_OPTIONS")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("muxdemux should start");

    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(stdin.as_bytes())
        .expect("stdin should accept input");

    child.wait_with_output().expect("muxdemux should exit")
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line should be json"))
        .collect()
}

#[test]
fn mux_wraps_lines_as_envelopes() {
    let output = run_with_stdin(&["mux", "--substream", "logs", "--id", "cli"], "one\ntwo\n");
    assert!(output.status.success());

    let lines = json_lines(&output);
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[0],
        serde_json::json!({ "substream": "logs", "new": true, "source": "cli" })
    );
    assert_eq!(lines[1]["method"], "write");
    assert_eq!(lines[1]["args"][0]["type"], "Buffer");
    assert_eq!(lines[1]["args"][0]["data"], serde_json::json!([111, 110, 101]));
    assert_eq!(lines[3]["method"], "end");
}

#[test]
fn mux_streams_input_past_the_high_water_mark() {
    let input: String = (0..2000).map(|n| format!("line {n:04}\n")).collect();
    let output = run_with_stdin(&["mux", "--substream", "bulk"], &input);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let lines = json_lines(&output);
    assert_eq!(lines.len(), 2002);
    assert_eq!(lines[2001]["method"], "end");
}

#[test]
fn mux_object_mode_rejects_non_json_lines() {
    let output = run_with_stdin(&["mux", "-s", "events", "--object"], "{\"ok\":true}\nnope\n");
    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("input line 2"));
}

#[test]
fn demux_renders_substream_events() {
    let mux = run_with_stdin(&["mux", "--substream", "logs"], "hello\nworld\n");
    assert!(mux.status.success());
    let envelopes = String::from_utf8_lossy(&mux.stdout).into_owned();

    let output = run_with_stdin(&["--format", "json", "demux"], &format!("{envelopes}raw line\n"));
    assert!(output.status.success());

    let events = json_lines(&output);
    let summary: Vec<(Option<&str>, &str, Option<&str>)> = events
        .iter()
        .map(|event| {
            (
                event["substream"].as_str(),
                event["event"].as_str().unwrap_or_default(),
                event["payload"].as_str(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (Some("logs"), "data", Some("hello")),
            (Some("logs"), "data", Some("world")),
            (Some("logs"), "end", None),
            (None, "passthrough", Some("raw line")),
        ]
    );
}

#[test]
fn demux_fails_when_input_ends_early() {
    let input = concat!(
        r#"{"substream":"open","new":true,"source":"peer"}"#,
        "\n",
        r#"{"substream":"open","method":"write","args":[{"type":"Buffer","data":[104,105]}],"source":"peer"}"#,
        "\n",
    );
    let output = run_with_stdin(&["--format", "pretty", "demux"], input);

    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[open] data hi"));
    assert!(stdout.contains("[open] error unexpected muxdemux finish"));
}

#[test]
fn demux_quiet_finish_succeeds() {
    let input = concat!(r#"{"substream":"open","new":true}"#, "\n");
    let output = run_with_stdin(&["--format", "raw", "demux", "--no-finish-error"], input);
    assert!(output.status.success());
}

#[test]
fn demux_filters_substreams() {
    let input = concat!(
        r#"{"substream":"a","new":true}"#,
        "\n",
        r#"{"substream":"b","new":true}"#,
        "\n",
        r#"{"substream":"a","method":"write","args":[{"type":"Buffer","data":[97]}]}"#,
        "\n",
        r#"{"substream":"b","method":"write","args":[{"type":"Buffer","data":[98]}]}"#,
        "\n",
        r#"{"substream":"a","method":"end","args":[]}"#,
        "\n",
        r#"{"substream":"b","method":"end","args":[]}"#,
        "\n",
    );
    let output = run_with_stdin(
        &["--format", "raw", "demux", "--substream", "b", "--no-passthrough"],
        input,
    );
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "b\n");
}

#[test]
fn bad_options_are_usage_errors() {
    let output = run_with_stdin(&["demux", "--options", "{\"bogus\":1}"], "");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_reports_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_muxdemux"))
        .args(["--format", "json", "version", "--extended"])
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("version should emit json");
    assert_eq!(payload["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(payload["wire_methods"], serde_json::json!(["write", "emit", "end"]));
}
