use crate::db;
use crate::grade::Gender;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::warn;

#[derive(Clone, Copy)]
enum SetupSection {
    Display,
    Sheet,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "display" => Some(Self::Display),
            "sheet" => Some(Self::Sheet),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Display => "setup.display",
            Self::Sheet => "setup.sheet",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Display => json!({
            "studentGender": "male"
        }),
        SetupSection::Sheet => json!({
            "autoAdvance": true,
            "requireConfirm": true
        }),
    }
}

/// Applies a client patch over `current`. Unknown fields and wrong types are rejected.
fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let Some(fields) = current.as_object_mut() else {
        return Err(format!("stored {} settings are not an object", section.key()));
    };
    for (field, v) in patch {
        let accepted = match (section, field.as_str()) {
            (SetupSection::Display, "studentGender") => v
                .as_str()
                .and_then(Gender::parse)
                .map(|g| Value::String(g.as_str().to_string()))
                .ok_or("studentGender must be 'male' or 'female'")?,
            (SetupSection::Sheet, "autoAdvance" | "requireConfirm") => v
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| format!("{} must be a boolean", field))?,
            _ => return Err(format!("unknown {} field: {}", section.key(), field)),
        };
        fields.insert(field.clone(), accepted);
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        match saved.as_object() {
            // Field by field, so one bad stored value keeps its default and the rest apply.
            Some(saved_obj) => {
                for (field, v) in saved_obj {
                    let single: Map<String, Value> =
                        std::iter::once((field.clone(), v.clone())).collect();
                    if let Err(msg) = merge_section_patch(section, &mut current, &single) {
                        warn!(section = section.key(), field = %field, %msg, "ignoring stored setting");
                    }
                }
            }
            None => warn!(section = section.key(), "stored settings are not an object"),
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy)]
pub struct SheetSettings {
    pub auto_advance: bool,
    pub require_confirm: bool,
}

pub fn load_default_gender(conn: &Connection) -> anyhow::Result<Gender> {
    let display = load_section(conn, SetupSection::Display)?;
    Ok(display
        .get("studentGender")
        .and_then(|v| v.as_str())
        .and_then(Gender::parse)
        .unwrap_or_default())
}

pub fn load_sheet_settings(conn: &Connection) -> anyhow::Result<SheetSettings> {
    let sheet = load_section(conn, SetupSection::Sheet)?;
    let flag = |k: &str| sheet.get(k).and_then(|v| v.as_bool()).unwrap_or(true);
    Ok(SheetSettings {
        auto_advance: flag("autoAdvance"),
        require_confirm: flag("requireConfirm"),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let conn = store.conn();
    let display = match load_section(conn, SetupSection::Display) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let sheet = match load_section(conn, SetupSection::Sheet) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "display": display, "sheet": sheet }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(store) = state.store.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let conn = store.conn();
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "ok": true, "section": section_raw, "values": current }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
