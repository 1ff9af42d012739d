use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_internshipd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn internshipd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn allocate_then_delete_cascades_through_internships() {
    let workspace = temp_dir("internshipd-e2e");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let guide = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "guides.create",
        json!({
            "username": "asharma",
            "guideName": "A. Sharma",
            "email": "asharma@faculty.example.edu"
        }),
    );
    let guide_id = guide
        .get("guideId")
        .and_then(|v| v.as_str())
        .expect("guideId")
        .to_string();

    for (i, sid) in ["22cs001", "22cs002", "22cs003"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({
                "studentId": sid,
                "studentName": format!("Student {}", sid),
                "semester": 5
            }),
        );
    }

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "allocations.create",
        json!({ "range": "22cs001-22cs003", "guideId": guide_id, "semester": 5 }),
    );
    assert_eq!(
        created.get("assignedCount").and_then(|v| v.as_i64()),
        Some(3)
    );
    assert_eq!(
        created
            .get("missingStudents")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
    assert_eq!(
        created
            .pointer("/allocation/range")
            .and_then(|v| v.as_str()),
        Some("22cs001-22cs003")
    );

    let listed = request_ok(&mut stdin, &mut reader, "4", "allocations.list", json!({}));
    let allocations = listed
        .get("allocations")
        .and_then(|v| v.as_array())
        .expect("allocations array");
    assert_eq!(allocations.len(), 1);
    assert_eq!(
        allocations[0].pointer("/guide/username").and_then(|v| v.as_str()),
        Some("asharma")
    );

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "semester": 5 }),
    );
    for row in students
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students array")
    {
        assert_eq!(
            row.pointer("/guide/id").and_then(|v| v.as_str()),
            Some(guide_id.as_str()),
            "student not assigned: {}",
            row
        );
    }

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "allocations.delete",
        json!({ "range": "22cs001-22cs003", "semester": 5 }),
    );
    assert_eq!(
        deleted
            .pointer("/allocation/range")
            .and_then(|v| v.as_str()),
        Some("22cs001-22cs003")
    );

    let after = request_ok(&mut stdin, &mut reader, "7", "allocations.list", json!({}));
    assert_eq!(
        after
            .get("allocations")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // The internship records went with the allocation.
    let lookup = request(
        &mut stdin,
        &mut reader,
        "8",
        "internships.get",
        json!({ "studentId": "22cs002", "semester": 5 }),
    );
    assert_eq!(lookup.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        lookup.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );
}
