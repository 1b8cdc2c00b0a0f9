use crate::grade::Gender;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{optional_str, require_store, required_str};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use crate::scheme::SchoolLevel;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Correlated subqueries keep the counts independent of each other.
    let mut stmt = match store.conn().prepare(
        "SELECT
           c.id,
           c.name,
           c.school_level,
           c.grade,
           c.gender,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM subjects sj WHERE sj.class_id = c.id) AS subject_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let level: String = row.get(2)?;
            let grade: i64 = row.get(3)?;
            let gender: Option<String> = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            let subject_count: i64 = row.get(6)?;
            let scheme = SchoolLevel::parse(&level)
                .map(|l| crate::scheme::GradingScheme::for_class(l, u8::try_from(grade).unwrap_or(0)));
            Ok(json!({
                "id": id,
                "name": name,
                "schoolLevel": level,
                "grade": grade,
                "gender": gender,
                "scheme": scheme.map(|s| s.as_str()),
                "studentCount": student_count,
                "subjectCount": subject_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    match classes_create(state, req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn classes_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = require_store(state)?;
    let name = required_str(req, "name")?;
    let level_raw = required_str(req, "schoolLevel")?;
    let Some(level) = SchoolLevel::parse(&level_raw) else {
        return Err(HandlerErr::new(
            "bad_params",
            "schoolLevel must be one of: primary, intermediate, secondary",
        )
        .with_details(json!({ "schoolLevel": level_raw })));
    };
    let grade = match req.params.get("grade").and_then(|v| v.as_i64()) {
        Some(g) if (1..=6).contains(&g) => g,
        _ => return Err(HandlerErr::new("bad_params", "grade must be an integer 1-6")),
    };
    let gender = match optional_str(req, "gender")? {
        None => None,
        Some(g) => match Gender::parse(&g) {
            Some(g) => Some(g),
            None => {
                return Err(HandlerErr::new("bad_params", "gender must be 'male' or 'female'"))
            }
        },
    };

    let class_id = Uuid::new_v4().to_string();
    store
        .conn()
        .execute(
            "INSERT INTO classes(id, name, school_level, grade, gender) VALUES(?, ?, ?, ?, ?)",
            (
                &class_id,
                &name,
                level.as_str(),
                grade,
                gender.map(|g| g.as_str()),
            ),
        )
        .map_err(|e| {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "classes" }))
        })?;

    let scheme = crate::scheme::GradingScheme::for_class(level, grade as u8);
    Ok(json!({
        "classId": class_id,
        "name": name,
        "scheme": scheme.as_str(),
        "maxScore": scheme.max_score()
    }))
}

fn require_class(conn: &Connection, class_id: &str) -> Result<(), HandlerErr> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "class not found")
            .with_details(json!({ "classId": class_id })));
    }
    Ok(())
}

fn next_sort_order(conn: &Connection, table: &str, class_id: &str) -> Result<i64, HandlerErr> {
    let sql = format!(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM {} WHERE class_id = ?",
        table
    );
    conn.query_row(&sql, [class_id], |r| r.get(0))
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = (|| {
        let store = require_store(state)?;
        let class_id = required_str(req, "classId")?;
        require_class(store.conn(), &class_id)?;
        let mut students = roster::students_for_class(store.conn(), &class_id)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        roster::sort_for_display(&mut students);
        let rows: Vec<_> = students
            .iter()
            .map(|s| json!({ "id": s.id, "name": s.name, "examId": s.exam_id }))
            .collect();
        Ok::<_, HandlerErr>(json!({ "students": rows }))
    })();
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = (|| {
        let store = require_store(state)?;
        let class_id = required_str(req, "classId")?;
        let name = required_str(req, "name")?;
        let exam_id = optional_str(req, "examId")?;
        require_class(store.conn(), &class_id)?;
        let sort_order = next_sort_order(store.conn(), "students", &class_id)?;

        let student_id = Uuid::new_v4().to_string();
        store
            .conn()
            .execute(
                "INSERT INTO students(id, class_id, name, exam_id, sort_order) VALUES(?, ?, ?, ?, ?)",
                (&student_id, &class_id, &name, &exam_id, sort_order),
            )
            .map_err(|e| {
                HandlerErr::new("db_insert_failed", e.to_string())
                    .with_details(json!({ "table": "students" }))
            })?;
        Ok::<_, HandlerErr>(json!({ "studentId": student_id, "name": name, "examId": exam_id }))
    })();
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = (|| {
        let store = require_store(state)?;
        let class_id = required_str(req, "classId")?;
        require_class(store.conn(), &class_id)?;
        let mut stmt = store
            .conn()
            .prepare(
                "SELECT id, name, teacher_id FROM subjects WHERE class_id = ? ORDER BY sort_order",
            )
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        let rows = stmt
            .query_map([&class_id], |r| {
                let id: String = r.get(0)?;
                let name: String = r.get(1)?;
                let teacher_id: Option<String> = r.get(2)?;
                Ok(json!({ "id": id, "name": name, "teacherId": teacher_id }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        Ok::<_, HandlerErr>(json!({ "subjects": rows }))
    })();
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = (|| {
        let store = require_store(state)?;
        let class_id = required_str(req, "classId")?;
        let name = required_str(req, "name")?;
        let teacher_id = optional_str(req, "teacherId")?;
        require_class(store.conn(), &class_id)?;
        let sort_order = next_sort_order(store.conn(), "subjects", &class_id)?;

        let subject_id = Uuid::new_v4().to_string();
        store
            .conn()
            .execute(
                "INSERT INTO subjects(id, class_id, name, sort_order, teacher_id) VALUES(?, ?, ?, ?, ?)",
                (&subject_id, &class_id, &name, sort_order, &teacher_id),
            )
            .map_err(|e| {
                HandlerErr::new("db_insert_failed", e.to_string())
                    .with_details(json!({ "table": "subjects" }))
            })?;
        Ok::<_, HandlerErr>(json!({ "subjectId": subject_id, "name": name, "teacherId": teacher_id }))
    })();
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn handle_subjects_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = (|| {
        let store = require_store(state)?;
        let class_id = required_str(req, "classId")?;
        let subject_id = required_str(req, "subjectId")?;
        let teacher_id = optional_str(req, "teacherId")?;
        let changed = store
            .conn()
            .execute(
                "UPDATE subjects SET teacher_id = ? WHERE class_id = ? AND id = ?",
                (&teacher_id, &class_id, &subject_id),
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        if changed == 0 {
            return Err(HandlerErr::new("not_found", "subject not found")
                .with_details(json!({ "classId": class_id, "subjectId": subject_id })));
        }
        Ok::<_, HandlerErr>(json!({ "ok": true, "teacherId": teacher_id }))
    })();
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.assign" => Some(handle_subjects_assign(state, req)),
        _ => None,
    }
}
