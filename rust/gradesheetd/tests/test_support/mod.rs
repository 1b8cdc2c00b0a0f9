#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradesheetd");
    let mut child = Command::new(exe)
        .env_remove("GRADESHEETD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradesheetd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_line(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read line");
    assert!(!line.trim().is_empty(), "unexpected end of output");
    serde_json::from_str(line.trim()).expect("parse line json")
}

pub fn request(
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

    let value = read_line(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Returns the error code of a request expected to fail.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().unwrap_or("unknown").to_string()
}

pub struct Fixture {
    pub class_id: String,
    pub subject_id: String,
    /// Student ids in insertion order.
    pub students: Vec<String>,
}

/// Workspace with one class, one subject assigned to `teacher`, and the given
/// `(name, exam_id)` students.
pub fn seed_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    school_level: &str,
    grade: i64,
    teacher: &str,
    students: &[(&str, &str)],
) -> Fixture {
    let class = request_ok(
        stdin,
        reader,
        "seed-class",
        "classes.create",
        json!({ "name": "Class A", "schoolLevel": school_level, "grade": grade }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let subject = request_ok(
        stdin,
        reader,
        "seed-subject",
        "subjects.create",
        json!({ "classId": class_id, "name": "Mathematics", "teacherId": teacher }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();

    let mut ids = Vec::new();
    for (i, (name, exam)) in students.iter().enumerate() {
        let s = request_ok(
            stdin,
            reader,
            &format!("seed-student-{}", i),
            "students.create",
            json!({ "classId": class_id, "name": name, "examId": exam }),
        );
        ids.push(s["studentId"].as_str().expect("studentId").to_string());
    }

    Fixture {
        class_id,
        subject_id,
        students: ids,
    }
}
