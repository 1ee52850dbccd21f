use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn faceplate_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_faceplate").expect("faceplate test binary not built")
}

fn temp_settings() -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("faceplate_cli_{nanos}/settings.json"))
}

#[test]
fn faceplate_help_mentions_name() {
    let output = Command::new(faceplate_bin())
        .arg("--help")
        .output()
        .expect("run faceplate --help");
    assert!(output.status.success());
    assert!(combined_output(&output).contains("Faceplate"));
}

#[test]
fn faceplate_prints_schedule() {
    let output = Command::new(faceplate_bin())
        .args([
            "--print-schedule",
            "--latitude",
            "51.5074",
            "--longitude",
            "-0.1278",
            "--timezone",
            "Europe/London",
        ])
        .output()
        .expect("run faceplate --print-schedule");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Brightness schedule for"));
    for label in ["Sunrise", "Noon", "Sunset"] {
        assert!(stdout.contains(label), "missing {label}");
    }
}

#[test]
fn faceplate_rejects_schedule_without_location() {
    let output = Command::new(faceplate_bin())
        .arg("--print-schedule")
        .output()
        .expect("run faceplate --print-schedule");
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("--latitude"));
}

#[test]
fn faceplate_rejects_bad_timezone() {
    let output = Command::new(faceplate_bin())
        .args(["--timezone", "Mars/Olympus_Mons"])
        .output()
        .expect("run faceplate --timezone");
    assert!(!output.status.success());
}

#[test]
fn faceplate_session_shows_selected_idle_screen() {
    let settings = temp_settings();
    let mut child = Command::new(faceplate_bin())
        .arg("--settings-path")
        .arg(&settings)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn faceplate");
    {
        let stdin = child.stdin.as_mut().expect("child stdin");
        let lines = [
            r#"{"type": "mycroft.mycroft-gui.register_idle", "data": {"name": "Weather", "id": "weather-skill"}}"#,
            r#"{"type": "mycroft.device.set.idle", "data": {"selected": "Weather"}}"#,
            r#"{"type": "mycroft.speech.recognition.unknown", "data": {}}"#,
            "this is not json",
        ];
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
    }
    let output = child.wait_with_output().expect("wait for faceplate");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let types: Vec<String> = stdout
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("json line");
            value["type"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert!(types.iter().any(|t| t == "mycroft.mycroft-gui.collect_idle"));
    assert!(types.iter().any(|t| t == "weather-skill.idle"));
    assert!(types.iter().any(|t| t == "faceplate.error"));

    let saved = std::fs::read_to_string(&settings).expect("settings written");
    assert!(saved.contains("Weather"));
    let _ = std::fs::remove_dir_all(settings.parent().unwrap());
}
