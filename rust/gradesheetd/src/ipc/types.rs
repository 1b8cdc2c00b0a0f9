use crate::sheet::SheetSession;
use crate::store::{SqliteStore, Subscription};
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Event lines produced by store subscriptions, flushed after the current response.
pub type EventQueue = Rc<RefCell<Vec<serde_json::Value>>>;

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<SqliteStore>,
    pub sessions: HashMap<String, SheetSession>,
    pub watches: HashMap<String, Subscription>,
    pub events: EventQueue,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            store: None,
            sessions: HashMap::new(),
            watches: HashMap::new(),
            events: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn drain_events(&self) -> Vec<serde_json::Value> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
