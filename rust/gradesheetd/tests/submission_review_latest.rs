mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err, request_ok, seed_class, spawn_sidecar, temp_dir, Fixture};

fn open_sheet(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    fx: &Fixture,
    teacher: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        "open",
        "sheet.open",
        json!({ "teacherId": teacher, "classId": fx.class_id, "subjectId": fx.subject_id }),
    )
}

fn commit(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    session_id: &str,
    student: &str,
    slot: &str,
    text: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        "commit",
        "sheet.commit",
        json!({ "sessionId": session_id, "studentId": student, "slot": slot, "text": text }),
    );
}

fn submit(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    session_id: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        "submit",
        "sheet.submit",
        json!({ "sessionId": session_id, "confirm": true }),
    )
}

#[test]
fn review_shows_the_later_of_two_submissions() {
    let workspace = temp_dir("gradesheet-review-latest");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = seed_class(&mut stdin, &mut reader, "secondary", 1, "t1", &[("Ali", "1"), ("Badr", "2")]);
    let (ali, badr) = (&fx.students[0], &fx.students[1]);
    let key = json!({ "classId": fx.class_id, "subjectId": fx.subject_id });

    let none = request_ok(&mut stdin, &mut reader, "2", "review.latest", key.clone());
    assert_eq!(none["found"].as_bool(), Some(false));

    let view = open_sheet(&mut stdin, &mut reader, &fx, "t1");
    let sid = view["sessionId"].as_str().expect("sessionId").to_string();
    assert!(view["seededFrom"].is_null());
    for (slot, text) in [
        ("firstSemMonth1", "80"),
        ("firstSemMonth2", "90"),
        ("midYear", "85"),
        ("secondSemMonth1", "70"),
        ("secondSemMonth2", "75"),
    ] {
        commit(&mut stdin, &mut reader, &sid, ali, slot, text);
    }
    commit(&mut stdin, &mut reader, &sid, badr, "midYear", "غ");

    // Confirmation is required by default.
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "3",
            "sheet.submit",
            json!({ "sessionId": sid })
        ),
        "confirmation_required"
    );

    let first = submit(&mut stdin, &mut reader, &sid);
    let first_id = first["submissionId"].as_str().expect("id").to_string();
    assert_eq!(first["state"].as_str(), Some("submitted"));
    assert_eq!(first["studentCount"].as_u64(), Some(2));

    // Editing resumes after a submit.
    commit(&mut stdin, &mut reader, &sid, ali, "midYear", "95");
    let view = request_ok(&mut stdin, &mut reader, "4", "sheet.get", json!({ "sessionId": sid }));
    assert_eq!(view["state"].as_str(), Some("editing"));
    assert_eq!(view["lastSubmissionId"].as_str(), Some(first_id.as_str()));

    let second = submit(&mut stdin, &mut reader, &sid);
    let second_id = second["submissionId"].as_str().expect("id").to_string();
    assert_ne!(first_id, second_id);
    assert!(second["sequence"].as_i64() > first["sequence"].as_i64());

    let latest = request_ok(&mut stdin, &mut reader, "5", "review.latest", key.clone());
    assert_eq!(latest["found"].as_bool(), Some(true));
    let table = &latest["table"];
    assert_eq!(table["submission"]["id"].as_str(), Some(second_id.as_str()));
    assert_eq!(table["rows"][0]["name"].as_str(), Some("Ali"));
    assert_eq!(table["rows"][0]["cells"]["midYear"]["value"].as_i64(), Some(95));
    assert_eq!(table["rows"][0]["calculated"]["annualPursuit"].as_i64(), Some(84));
    assert_eq!(table["rows"][1]["cells"]["midYear"]["display"].as_str(), Some("غائب"));
    assert!(table["rows"][1]["calculated"]["annualPursuit"].is_null());
    assert_eq!(table["statistics"]["slots"]["midYear"]["absentCount"].as_u64(), Some(1));

    let history = request_ok(&mut stdin, &mut reader, "6", "review.history", key.clone());
    let ids: Vec<_> = history["submissions"]
        .as_array()
        .expect("submissions")
        .iter()
        .map(|s| s["id"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(ids, vec![second_id.clone(), first_id.clone()]);

    // The superseded submission is still intact.
    let older = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "review.open",
        json!({ "classId": fx.class_id, "subjectId": fx.subject_id, "submissionId": first_id }),
    );
    assert_eq!(older["table"]["rows"][0]["cells"]["midYear"]["value"].as_i64(), Some(85));
    assert_eq!(older["table"]["rows"][0]["calculated"]["annualPursuit"].as_i64(), Some(81));

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "8",
            "review.open",
            json!({ "classId": fx.class_id, "subjectId": fx.subject_id, "submissionId": "missing" })
        ),
        "not_found"
    );

    let overview = request_ok(&mut stdin, &mut reader, "9", "review.list", json!({}));
    assert_eq!(overview["subjects"][0]["subjectName"].as_str(), Some("Mathematics"));
    assert_eq!(overview["subjects"][0]["latest"]["id"].as_str(), Some(second_id.as_str()));
}

#[test]
fn unassigned_subject_renders_not_configured() {
    let workspace = temp_dir("gradesheet-not-configured");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = seed_class(&mut stdin, &mut reader, "secondary", 1, "t1", &[("Ali", "1")]);

    let view = open_sheet(&mut stdin, &mut reader, &fx, "t2");
    assert_eq!(view["configured"].as_bool(), Some(false));
    assert!(view["sessionId"].is_null());
    assert!(view["message"].as_str().is_some());

    let missing = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sheet.open",
        json!({ "teacherId": "t1", "classId": fx.class_id, "subjectId": "no-such-subject" }),
    );
    assert_eq!(missing["configured"].as_bool(), Some(false));

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "3",
            "sheet.open",
            json!({ "teacherId": "t1", "classId": "no-such-class", "subjectId": fx.subject_id })
        ),
        "not_found"
    );
}

#[test]
fn reopened_sheet_is_seeded_from_the_latest_submission() {
    let workspace = temp_dir("gradesheet-seeding");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "sheet", "patch": { "requireConfirm": false } }),
    );
    let fx = seed_class(&mut stdin, &mut reader, "secondary", 1, "t1", &[("Ali", "1")]);
    let ali = &fx.students[0];

    let view = open_sheet(&mut stdin, &mut reader, &fx, "t1");
    let sid = view["sessionId"].as_str().expect("sessionId").to_string();
    commit(&mut stdin, &mut reader, &sid, ali, "midYear", "64");
    let submitted = request_ok(&mut stdin, &mut reader, "3", "sheet.submit", json!({ "sessionId": sid }));
    let submission_id = submitted["submissionId"].as_str().expect("id").to_string();

    // A new teacher inherits the previous teacher's last sheet.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.assign",
        json!({ "classId": fx.class_id, "subjectId": fx.subject_id, "teacherId": "t2" }),
    );
    let view = open_sheet(&mut stdin, &mut reader, &fx, "t2");
    assert_eq!(view["state"].as_str(), Some("loaded"));
    assert_eq!(view["seededFrom"].as_str(), Some(submission_id.as_str()));
    assert_eq!(view["rows"][0]["cells"]["midYear"]["value"].as_i64(), Some(64));

    let by_teacher = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "review.latest",
        json!({ "classId": fx.class_id, "subjectId": fx.subject_id, "teacherId": "t2" }),
    );
    assert_eq!(by_teacher["found"].as_bool(), Some(false));
}
