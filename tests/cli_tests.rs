use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

use serial_test::serial;

/// Command for the built binary, isolated from the caller's environment
fn autorename(work_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_autorename"));
    cmd.current_dir(work_dir)
        .env("RUST_LOG", "autorename=info")
        .env("SCRATCH_DIR", work_dir.join("scratch"))
        .env("AUTORENAME_PREFS", work_dir.join("prefs.json"))
        .env("FFMPEG_BIN", "/nonexistent/ffmpeg")
        .env("FFPROBE_BIN", "/nonexistent/ffprobe")
        .env_remove("AUTORENAME_USER")
        .env_remove("FALLBACK_TO_ORIGINAL")
        .env_remove("MAX_FILE_SIZE");
    cmd
}

fn output_text(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn scratch_is_empty(work_dir: &Path) -> bool {
    match fs::read_dir(work_dir.join("scratch")) {
        Ok(entries) => entries.count() == 0,
        Err(_) => true,
    }
}

#[test]
#[serial]
fn test_help_lists_commands() {
    let temp_dir = TempDir::new().unwrap();
    let output = autorename(temp_dir.path())
        .arg("--help")
        .output()
        .expect("Failed to execute help command");

    assert!(output.status.success());
    let text = output_text(&output);
    for command in ["process", "watch", "rename", "prefs", "clean"] {
        assert!(text.contains(command), "Missing {command} in help: {text}");
    }
}

/// Set a template, process a file and check what lands in the outbox
#[test]
#[serial]
fn test_prefs_then_process_workflow() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();

    let prefs_output = autorename(temp_path)
        .args(["prefs", "1", "template", "{season}x{episode} - [{quality}]"])
        .output()
        .expect("Failed to execute prefs command");
    assert!(prefs_output.status.success(), "Prefs command failed");
    assert!(
        output_text(&prefs_output).contains("Auto rename format saved"),
        "Unexpected prefs output: {}",
        output_text(&prefs_output)
    );
    assert!(temp_path.join("prefs.json").exists());

    let source = temp_path.join("Show.S02E07.1080p.mkv");
    fs::write(&source, "not really a video").unwrap();

    // ffmpeg cannot start, so the original is delivered under its new name
    let process_output = autorename(temp_path)
        .args(["process", "--user", "1", "--out"])
        .arg(temp_path.join("outbox"))
        .arg(&source)
        .output()
        .expect("Failed to execute process command");
    let text = output_text(&process_output);
    assert!(process_output.status.success(), "Process command failed: {text}");

    let delivered = temp_path.join("outbox").join("02x07 - [1080p].mkv");
    assert!(delivered.exists(), "Renamed file not delivered: {text}");
    assert_eq!(fs::read_to_string(&delivered).unwrap(), "not really a video");
    assert_eq!(
        fs::read_to_string(temp_path.join("outbox").join("02x07 - [1080p].mkv.caption.txt"))
            .unwrap(),
        "**02x07 - [1080p].mkv**"
    );
    assert!(source.exists(), "Source file must be left alone");
    assert!(scratch_is_empty(temp_path));
}

#[test]
#[serial]
fn test_process_without_template_reports_instructions() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();
    let source = temp_path.join("Show.S01E01.mkv");
    fs::write(&source, "video").unwrap();

    let output = autorename(temp_path)
        .args(["process", "--user", "5", "--out"])
        .arg(temp_path.join("outbox"))
        .arg(&source)
        .output()
        .expect("Failed to execute process command");
    let text = output_text(&output);

    // A job that ends without a delivery makes the run fail
    assert!(!output.status.success(), "Process should report the failed job: {text}");
    assert!(
        text.contains("Please Set An Auto Rename Format First Using /autorename"),
        "Expected template instructions, got: {text}"
    );
    assert!(text.contains("1 of 1 job(s) failed"), "Expected failure summary, got: {text}");
    assert!(!temp_path.join("outbox").join("01x01 - [Unknown].mkv").exists());
    assert!(scratch_is_empty(temp_path));
}

#[test]
#[serial]
fn test_rename_preview() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();
    fs::write(temp_path.join("Show.S02E07.1080p.mkv"), "").unwrap();
    fs::write(temp_path.join("randomfile.mkv"), "").unwrap();

    let output = autorename(temp_path)
        .args(["rename", "--template", "S{season}E{episode} [{quality}]"])
        .arg(temp_path)
        .output()
        .expect("Failed to execute rename command");
    let text = output_text(&output);

    assert!(output.status.success(), "Rename command failed: {text}");
    assert!(text.contains("→ S02E07 [1080p].mkv"), "Got: {text}");
    assert!(text.contains("→ S01EXX [Unknown].mkv"), "Got: {text}");
    assert!(text.contains("no episode number"), "Got: {text}");

    // Preview never touches the files
    assert!(temp_path.join("Show.S02E07.1080p.mkv").exists());
    assert!(temp_path.join("randomfile.mkv").exists());
}

#[test]
#[serial]
fn test_prefs_rejects_unknown_media_type() {
    let temp_dir = TempDir::new().unwrap();
    let output = autorename(temp_dir.path())
        .args(["prefs", "1", "media", "sticker"])
        .output()
        .expect("Failed to execute prefs command");

    assert!(!output.status.success());
    assert!(output_text(&output).contains("Valid types: video, document, audio"));
}

#[test]
#[serial]
fn test_clean_removes_leftover_artifacts() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();
    let scratch = temp_path.join("scratch");
    fs::create_dir_all(&scratch).unwrap();
    let artifact = scratch.join("20240101120000-0123456789abcdef0123456789abcdef-abc.download.mkv");
    let unrelated = scratch.join("notes.txt");
    fs::write(&artifact, "partial").unwrap();
    fs::write(&unrelated, "keep").unwrap();

    let output = autorename(temp_path)
        .arg("clean")
        .output()
        .expect("Failed to execute clean command");
    let text = output_text(&output);

    assert!(output.status.success(), "Clean command failed: {text}");
    assert!(text.contains("Removed 1 file(s)"), "Got: {text}");
    assert!(!artifact.exists());
    assert!(unrelated.exists());
}

#[test]
#[serial]
fn test_invalid_paths_fail() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();

    let process_output = autorename(temp_path)
        .args(["process", "/nonexistent/Show.S01E01.mkv"])
        .output()
        .expect("Failed to execute process command");
    assert!(!process_output.status.success());

    let watch_output = autorename(temp_path)
        .args(["watch", "/nonexistent/inbox"])
        .output()
        .expect("Failed to execute watch command");
    assert!(!watch_output.status.success());

    let rename_output = autorename(temp_path)
        .args(["rename", "--template", "{episode}", "/nonexistent/path"])
        .output()
        .expect("Failed to execute rename command");
    assert!(!rename_output.status.success());

    let clean_output = autorename(temp_path)
        .args(["clean", "--dir", "/nonexistent/scratch"])
        .output()
        .expect("Failed to execute clean command");
    assert!(!clean_output.status.success());
}
