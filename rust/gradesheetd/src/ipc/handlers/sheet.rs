use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::setup::{load_default_gender, load_sheet_settings};
use crate::ipc::helpers::{db_query_failed, require_store, required_slot, required_str};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use crate::sheet::{CellOutcome, SheetError, SheetOptions, SheetSession};
use crate::submission::{self, SubmissionError};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

fn sheet_error(e: SheetError) -> HandlerErr {
    match e {
        SheetError::UnknownStudent(id) => HandlerErr::new("not_found", "student is not on this sheet")
            .with_details(json!({ "studentId": id })),
        SheetError::SlotNotInScheme(slot, scheme) => {
            HandlerErr::new("bad_params", format!("slot {} is not part of the {} scheme", slot, scheme))
                .with_details(json!({ "slot": slot, "scheme": scheme }))
        }
    }
}

fn submission_read_error(e: SubmissionError) -> HandlerErr {
    match e {
        SubmissionError::InvalidKey(k) => {
            HandlerErr::new("bad_params", "invalid id").with_details(json!({ "id": k }))
        }
        other => HandlerErr::new("db_query_failed", other.to_string()),
    }
}

fn session_mut<'a>(state: &'a mut AppState, req: &Request) -> Result<&'a mut SheetSession, HandlerErr> {
    let session_id = required_str(req, "sessionId")?;
    state.sessions.get_mut(&session_id).ok_or_else(|| {
        HandlerErr::new("not_found", "sheet session not found")
            .with_details(json!({ "sessionId": session_id }))
    })
}

fn render(req: &Request, r: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match r {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn outcome_json(o: &CellOutcome) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(o).map_err(|e| HandlerErr::new("server_error", e.to_string()))
}

fn sheet_open(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(req, "teacherId")?;
    let class_id = required_str(req, "classId")?;
    let subject_id = required_str(req, "subjectId")?;
    let store = require_store(state)?;
    let conn = store.conn();

    let Some(class) = roster::class_get(conn, &class_id).map_err(db_query_failed)? else {
        return Err(HandlerErr::new("not_found", "class not found")
            .with_details(json!({ "classId": class_id })));
    };
    let subject = roster::subject_get(conn, &class_id, &subject_id).map_err(db_query_failed)?;
    let assigned = subject
        .as_ref()
        .and_then(|s| s.teacher_id.as_deref())
        .map(|t| t == teacher_id)
        .unwrap_or(false);
    if !assigned {
        info!(%teacher_id, %class_id, %subject_id, "sheet open refused: subject not assigned");
        return Ok(json!({
            "configured": false,
            "message": "This subject is not assigned to you in this class. Ask the administrator to complete the setup."
        }));
    }

    let students = roster::students_for_class(conn, &class_id).map_err(db_query_failed)?;
    // Prefer the teacher's own last sheet; a reassigned subject falls back to whoever
    // submitted last.
    let seed = match submission::latest(store, &class_id, &subject_id, Some(&teacher_id))
        .map_err(submission_read_error)?
    {
        Some(s) => Some(s),
        None => submission::latest(store, &class_id, &subject_id, None)
            .map_err(submission_read_error)?,
    };

    let settings = load_sheet_settings(conn).map_err(db_query_failed)?;
    let gender = match class.gender {
        Some(g) => g,
        None => load_default_gender(conn).map_err(db_query_failed)?,
    };

    let session = SheetSession::open(
        Uuid::new_v4().to_string(),
        teacher_id,
        class_id,
        subject_id,
        class.scheme(),
        students,
        seed.as_ref(),
        SheetOptions {
            gender,
            auto_advance: settings.auto_advance,
        },
    );
    let view = session.view();
    info!(
        session_id = %session.id,
        scheme = session.scheme.as_str(),
        seeded_from = ?seed.as_ref().map(|s| s.id.as_str()),
        "sheet opened"
    );
    state.sessions.insert(session.id.clone(), session);
    serde_json::to_value(view).map_err(|e| HandlerErr::new("server_error", e.to_string()))
}

fn sheet_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let session = session_mut(state, req)?;
    serde_json::to_value(session.view()).map_err(|e| HandlerErr::new("server_error", e.to_string()))
}

fn sheet_input(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(req, "studentId")?;
    let slot = required_slot(req)?;
    let Some(text) = req.params.get("text").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::new("bad_params", "missing text"));
    };
    let session = session_mut(state, req)?;
    let outcome = session.input(&student_id, slot, text).map_err(sheet_error)?;
    outcome_json(&outcome)
}

fn sheet_commit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(req, "studentId")?;
    let slot = required_slot(req)?;
    let text = match req.params.get("text") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str() {
            Some(s) => Some(s),
            None => return Err(HandlerErr::new("bad_params", "text must be a string or null")),
        },
    };
    let session = session_mut(state, req)?;
    let outcome = session.commit(&student_id, slot, text).map_err(sheet_error)?;
    outcome_json(&outcome)
}

fn sheet_blur(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(req, "studentId")?;
    let slot = required_slot(req)?;
    let session = session_mut(state, req)?;
    let outcome = session.blur(&student_id, slot).map_err(sheet_error)?;
    outcome_json(&outcome)
}

fn sheet_submit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let confirm = req
        .params
        .get("confirm")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let session_id = required_str(req, "sessionId")?;

    let store = require_store(state)?;
    let settings = load_sheet_settings(store.conn()).map_err(db_query_failed)?;
    if settings.require_confirm && !confirm {
        return Err(HandlerErr::new(
            "confirmation_required",
            "confirm the submission before it is sent",
        )
        .with_details(json!({ "sessionId": session_id })));
    }

    let Some(session) = state.sessions.get(&session_id) else {
        return Err(HandlerErr::new("not_found", "sheet session not found")
            .with_details(json!({ "sessionId": session_id })));
    };
    let draft = session.draft();

    let written = match submission::submit(store, draft, Utc::now()) {
        Ok(s) => s,
        Err(SubmissionError::InvalidKey(k)) => {
            return Err(HandlerErr::new("bad_params", "invalid id").with_details(json!({ "id": k })))
        }
        Err(e) => {
            // The session keeps its edits so the user can retry.
            warn!(%session_id, error = %e, "submission failed");
            return Err(HandlerErr::new("submit_failed", e.to_string())
                .with_details(json!({ "sessionId": session_id })));
        }
    };

    let session = session_mut(state, req)?;
    session.mark_submitted(&written.id);
    Ok(json!({
        "submissionId": written.id,
        "submittedAt": written.submitted_at.to_rfc3339(),
        "sequence": written.sequence,
        "studentCount": written.grades.len(),
        "state": session.state(),
    }))
}

fn sheet_close(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let session_id = required_str(req, "sessionId")?;
    let closed = state.sessions.remove(&session_id).is_some();
    Ok(json!({ "ok": true, "closed": closed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let r = match req.method.as_str() {
        "sheet.open" => sheet_open(state, req),
        "sheet.get" => sheet_get(state, req),
        "sheet.input" => sheet_input(state, req),
        "sheet.commit" => sheet_commit(state, req),
        "sheet.blur" => sheet_blur(state, req),
        "sheet.submit" => sheet_submit(state, req),
        "sheet.close" => sheet_close(state, req),
        _ => return None,
    };
    Some(render(req, r))
}
