use crate::grade::SlotKey;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;
use serde_json::json;

pub fn require_store(state: &AppState) -> Result<&SqliteStore, HandlerErr> {
    state
        .store
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr::new("bad_params", format!("missing {}", key))),
    }
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Err(HandlerErr::new(
                "bad_params",
                format!("{} must be a string or null", key),
            )),
        },
    }
}

pub fn required_slot(req: &Request) -> Result<SlotKey, HandlerErr> {
    let raw = required_str(req, "slot")?;
    SlotKey::parse(&raw).ok_or_else(|| {
        HandlerErr::new("bad_params", "unknown slot").with_details(json!({ "slot": raw }))
    })
}

pub fn db_query_failed(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}
