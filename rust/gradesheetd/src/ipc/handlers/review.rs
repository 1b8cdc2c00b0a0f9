use crate::grade::Gender;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::setup::load_default_gender;
use crate::ipc::helpers::{db_query_failed, optional_str, require_store, required_str};
use crate::ipc::types::{AppState, Request};
use crate::review::build_table;
use crate::roster;
use crate::store::{RecordStore, SqliteStore};
use crate::submission::{self, Submission, SubmissionError, SubmissionSummary};
use serde_json::json;
use std::rc::Rc;
use tracing::{debug, info};
use uuid::Uuid;

fn submission_error(e: SubmissionError) -> HandlerErr {
    match e {
        SubmissionError::InvalidKey(k) => {
            HandlerErr::new("bad_params", "invalid id").with_details(json!({ "id": k }))
        }
        other => HandlerErr::new("db_query_failed", other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(v: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr::new("server_error", e.to_string()))
}

fn class_gender(store: &SqliteStore, class_id: &str) -> Result<Gender, HandlerErr> {
    let conn = store.conn();
    let class = roster::class_get(conn, class_id).map_err(db_query_failed)?;
    match class.and_then(|c| c.gender) {
        Some(g) => Ok(g),
        None => load_default_gender(conn).map_err(db_query_failed),
    }
}

fn table_json(store: &SqliteStore, sub: &Submission) -> Result<serde_json::Value, HandlerErr> {
    let roster_rows = roster::students_for_class(store.conn(), &sub.class_id).map_err(db_query_failed)?;
    let gender = class_gender(store, &sub.class_id)?;
    to_json(&build_table(sub, &roster_rows, gender))
}

fn review_latest(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let class_id = required_str(req, "classId")?;
    let subject_id = required_str(req, "subjectId")?;
    let teacher_id = optional_str(req, "teacherId")?;

    let latest = submission::latest(store, &class_id, &subject_id, teacher_id.as_deref())
        .map_err(submission_error)?;
    match latest {
        None => Ok(json!({ "found": false })),
        Some(sub) => Ok(json!({ "found": true, "table": table_json(store, &sub)? })),
    }
}

fn review_open(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let class_id = required_str(req, "classId")?;
    let subject_id = required_str(req, "subjectId")?;
    let submission_id = required_str(req, "submissionId")?;

    let Some(sub) = submission::load(store, &class_id, &subject_id, &submission_id)
        .map_err(submission_error)?
    else {
        return Err(HandlerErr::new("not_found", "submission not found")
            .with_details(json!({ "submissionId": submission_id })));
    };
    Ok(json!({ "table": table_json(store, &sub)? }))
}

fn review_history(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let class_id = required_str(req, "classId")?;
    let subject_id = required_str(req, "subjectId")?;
    let teacher_id = optional_str(req, "teacherId")?;
    let history = submission::history(store, &class_id, &subject_id, teacher_id.as_deref())
        .map_err(submission_error)?;
    Ok(json!({ "submissions": to_json(&history)? }))
}

/// One row per (class, subject) pair with its latest submission, if any.
fn review_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let conn = store.conn();
    let subjects = roster::subjects_all(conn).map_err(db_query_failed)?;

    let mut rows = Vec::with_capacity(subjects.len());
    for s in subjects {
        let class_name = roster::class_get(conn, &s.class_id)
            .map_err(db_query_failed)?
            .map(|c| c.name);
        let latest = submission::latest(store, &s.class_id, &s.id, None).map_err(submission_error)?;
        rows.push(json!({
            "classId": s.class_id,
            "className": class_name,
            "subjectId": s.id,
            "subjectName": s.name,
            "teacherId": s.teacher_id,
            "latest": latest.as_ref().map(SubmissionSummary::from),
        }));
    }
    Ok(json!({ "subjects": rows }))
}

fn review_watch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(req, "classId")?;
    let subject_id = required_str(req, "subjectId")?;
    let store = require_store(state)?;
    let path = submission::submissions_path(&class_id, &subject_id).map_err(submission_error)?;

    let watch_id = Uuid::new_v4().to_string();
    let events = Rc::clone(&state.events);
    let (w, c, s, base) = (watch_id.clone(), class_id.clone(), subject_id.clone(), path.clone());
    let subscription = store
        .subscribe(
            &path,
            Rc::new(move |snapshot: Option<&serde_json::Value>| {
                let all = submission::from_collection(&base, snapshot, None);
                let latest = all.first().map(SubmissionSummary::from);
                debug!(watch_id = %w, count = all.len(), "review watch fired");
                events.borrow_mut().push(json!({
                    "event": "review.updated",
                    "watchId": w,
                    "classId": c,
                    "subjectId": s,
                    "latest": latest,
                    "count": all.len(),
                }));
            }),
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let latest = submission::latest(store, &class_id, &subject_id, None).map_err(submission_error)?;
    state.watches.insert(watch_id.clone(), subscription);
    info!(%watch_id, %class_id, %subject_id, "review watch attached");
    Ok(json!({
        "watchId": watch_id,
        "latest": latest.as_ref().map(SubmissionSummary::from),
    }))
}

fn review_unwatch(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let watch_id = required_str(req, "watchId")?;
    let removed = match state.watches.remove(&watch_id) {
        Some(sub) => {
            sub.detach();
            true
        }
        None => false,
    };
    Ok(json!({ "ok": true, "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "review.latest" => review_latest(state, req),
        "review.open" => review_open(state, req),
        "review.history" => review_history(state, req),
        "review.list" => review_list(state, req),
        "review.watch" => review_watch(state, req),
        "review.unwatch" => review_unwatch(state, req),
        _ => return None,
    };
    Some(match r {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
