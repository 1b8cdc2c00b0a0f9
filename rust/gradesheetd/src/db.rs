use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradesheet.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            school_level TEXT NOT NULL,
            grade INTEGER NOT NULL
        )",
        [],
    )?;
    // Gender was added after the first release; older workspaces lack it.
    ensure_classes_gender(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            exam_id TEXT,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            teacher_id TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id, sort_order)",
        [],
    )?;

    // Keyed-record store backing submissions and counters (see store.rs).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS records(
            path TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_classes_gender(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "gender")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE classes ADD COLUMN gender TEXT", [])?;
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_is_idempotent_and_adds_gender() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE classes(id TEXT PRIMARY KEY, name TEXT NOT NULL,
               school_level TEXT NOT NULL, grade INTEGER NOT NULL)",
            [],
        )
        .expect("old classes table");
        init_schema(&conn).expect("init");
        init_schema(&conn).expect("init again");
        assert!(table_has_column(&conn, "classes", "gender").expect("pragma"));
    }

    #[test]
    fn settings_roundtrip_overwrites() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        assert_eq!(settings_get_json(&conn, "setup.display").expect("get"), None);
        settings_set_json(&conn, "setup.display", &json!({ "studentGender": "male" }))
            .expect("set");
        settings_set_json(&conn, "setup.display", &json!({ "studentGender": "female" }))
            .expect("set again");
        assert_eq!(
            settings_get_json(&conn, "setup.display").expect("get"),
            Some(json!({ "studentGender": "female" }))
        );
    }
}
