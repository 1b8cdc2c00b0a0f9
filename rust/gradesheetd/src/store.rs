use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid record path: {0:?}")]
    InvalidPath(String),
    #[error("record store query failed: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("counter at {0} is not an integer")]
    NotACounter(String),
}

pub type ChangeFn = Rc<dyn Fn(Option<&Value>)>;

/// Keyed-record store with realtime-database semantics over slash-separated paths.
///
/// A record written at `a/b` is visible through `get("a")` as `{"b": ...}`, and a write
/// replaces the whole subtree under its path.
pub trait RecordStore {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Single atomic write. Subscribers at, above or below `path` are notified after the
    /// write commits.
    fn set(&self, path: &str, value: &Value) -> Result<(), StoreError>;

    fn subscribe(&self, path: &str, on_change: ChangeFn) -> Result<Subscription, StoreError>;

    /// Atomically increments the integer at `path` (missing counts as 0) and returns the
    /// new value.
    fn increment(&self, path: &str) -> Result<i64, StoreError>;
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(u64, String, ChangeFn)>,
}

/// Handle returned by `subscribe`. Delivery stops on `detach` or drop.
pub struct Subscription {
    id: u64,
    registry: Weak<RefCell<Registry>>,
}

impl Subscription {
    pub fn detach(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(reg) = self.registry.upgrade() {
            reg.borrow_mut().entries.retain(|(id, _, _)| *id != self.id);
        }
    }
}

pub fn normalize_path(path: &str) -> Result<String, StoreError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    let mut segs = Vec::new();
    for seg in trimmed.split('/') {
        if seg.is_empty() || seg == "." || seg == ".." {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        if seg.chars().any(|c| c.is_control() || matches!(c, '#' | '$' | '[' | ']')) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        segs.push(seg);
    }
    Ok(segs.join("/"))
}

fn is_same_or_descendant(path: &str, root: &str) -> bool {
    path == root
        || (path.len() > root.len()
            && path.starts_with(root)
            && path.as_bytes()[root.len()] == b'/')
}

fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(i, _)| &path[..i])
}

/// Exclusive upper bound for every descendant of `path`: `'0'` sorts right after `'/'`.
fn descendant_range(path: &str) -> (String, String) {
    (format!("{path}/"), format!("{path}0"))
}

fn upsert_row(conn: &Connection, path: &str, value: &Value) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO records(path, value, updated_at) VALUES(?, ?, ?)
         ON CONFLICT(path) DO UPDATE SET
           value = excluded.value,
           updated_at = excluded.updated_at",
        (path, serde_json::to_string(value)?, chrono::Utc::now().to_rfc3339()),
    )?;
    Ok(())
}

/// Sets `rel` (slash-separated) inside `doc`, creating intermediate objects. A null
/// `value` removes the entry instead.
fn splice(doc: &mut Value, rel: &str, value: &Value) {
    let (parents, leaf) = match rel.rsplit_once('/') {
        Some((p, l)) => (Some(p), l),
        None => (None, rel),
    };

    let mut node = doc;
    for seg in parents.into_iter().flat_map(|p| p.split('/')) {
        if value.is_null() {
            match node.get_mut(seg) {
                Some(next) => node = next,
                None => return,
            }
        } else {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node = match node {
                Value::Object(map) => map.entry(seg).or_insert_with(|| Value::Object(Map::new())),
                _ => return,
            };
        }
    }

    if value.is_null() {
        if let Some(map) = node.as_object_mut() {
            map.remove(leaf);
        }
    } else {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Some(map) = node.as_object_mut() {
            map.insert(leaf.to_string(), value.clone());
        }
    }
}

pub struct SqliteStore {
    conn: Connection,
    subscribers: Rc<RefCell<Registry>>,
}

impl SqliteStore {
    /// `conn` must already carry the `records` table (see `db::open_db`).
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            subscribers: Rc::new(RefCell::new(Registry::default())),
        }
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        crate::db::init_schema(&conn)?;
        Ok(Self::new(conn))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn read_row(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT value FROM records WHERE path = ?", [path], |r| {
                r.get(0)
            })
            .optional()?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn read_normalized(&self, path: &str) -> Result<Option<Value>, StoreError> {
        if let Some(v) = self.read_row(path)? {
            return Ok(Some(v));
        }

        // Inside a record stored at an ancestor.
        for anc in ancestors(path) {
            if let Some(v) = self.read_row(anc)? {
                let rest = &path[anc.len() + 1..];
                let mut cur = &v;
                for seg in rest.split('/') {
                    match cur.get(seg) {
                        Some(next) => cur = next,
                        None => return Ok(None),
                    }
                }
                return Ok(Some(cur.clone()));
            }
        }

        // Parent of stored records.
        let (lo, hi) = descendant_range(path);
        let mut stmt = self
            .conn
            .prepare("SELECT path, value FROM records WHERE path >= ? AND path < ? ORDER BY path")?;
        let rows = stmt
            .query_map((&lo, &hi), |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut root = Map::new();
        for (p, raw) in rows {
            let value: Value = serde_json::from_str(&raw)?;
            let rel = &p[lo.len()..];
            let mut segs = rel.split('/').peekable();
            let mut node = &mut root;
            while let Some(seg) = segs.next() {
                if segs.peek().is_none() {
                    node.insert(seg.to_string(), value);
                    break;
                }
                let child = node
                    .entry(seg.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !child.is_object() {
                    *child = Value::Object(Map::new());
                }
                node = match child.as_object_mut() {
                    Some(m) => m,
                    None => break,
                };
            }
        }
        Ok(Some(Value::Object(root)))
    }

    /// The stored row at or above `path`. Rows never nest, so there is at most one.
    fn covering_row(&self, path: &str) -> Result<Option<(String, Value)>, StoreError> {
        for anc in ancestors(path) {
            if let Some(v) = self.read_row(anc)? {
                return Ok(Some((anc.to_string(), v)));
            }
        }
        Ok(self.read_row(path)?.map(|v| (path.to_string(), v)))
    }

    /// Replaces the subtree at `path`. Must run inside a transaction on `self.conn`.
    fn write_in_tx(&self, path: &str, value: &Value) -> Result<(), StoreError> {
        let (lo, hi) = descendant_range(path);
        self.conn.execute(
            "DELETE FROM records WHERE path >= ? AND path < ?",
            (&lo, &hi),
        )?;

        match self.covering_row(path)? {
            // The target lives inside an ancestor record: edit that record in place so
            // its other children survive.
            Some((row_path, mut doc)) if row_path != path => {
                splice(&mut doc, &path[row_path.len() + 1..], value);
                if doc.as_object().map(Map::is_empty).unwrap_or(false) {
                    self.conn
                        .execute("DELETE FROM records WHERE path = ?", [&row_path])?;
                } else {
                    upsert_row(&self.conn, &row_path, &doc)?;
                }
            }
            _ if value.is_null() => {
                self.conn.execute("DELETE FROM records WHERE path = ?", [path])?;
            }
            _ => upsert_row(&self.conn, path, value)?,
        }
        Ok(())
    }

    fn write_normalized(&self, path: &str, value: &Value) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        self.write_in_tx(path, value)?;
        tx.commit()?;
        Ok(())
    }

    fn notify(&self, written: &str) {
        let targets: Vec<(String, ChangeFn)> = self
            .subscribers
            .borrow()
            .entries
            .iter()
            .filter(|(_, p, _)| is_same_or_descendant(written, p) || is_same_or_descendant(p, written))
            .map(|(_, p, f)| (p.clone(), Rc::clone(f)))
            .collect();

        for (path, f) in targets {
            match self.read_normalized(&path) {
                Ok(v) => f(v.as_ref()),
                Err(e) => debug!(path = %path, error = %e, "subscriber snapshot read failed"),
            }
        }
    }
}

impl RecordStore for SqliteStore {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let path = normalize_path(path)?;
        self.read_normalized(&path)
    }

    fn set(&self, path: &str, value: &Value) -> Result<(), StoreError> {
        let path = normalize_path(path)?;
        self.write_normalized(&path, value)?;
        debug!(path = %path, "record written");
        self.notify(&path);
        Ok(())
    }

    fn subscribe(&self, path: &str, on_change: ChangeFn) -> Result<Subscription, StoreError> {
        let path = normalize_path(path)?;
        let mut reg = self.subscribers.borrow_mut();
        reg.next_id += 1;
        let id = reg.next_id;
        reg.entries.push((id, path, on_change));
        Ok(Subscription {
            id,
            registry: Rc::downgrade(&self.subscribers),
        })
    }

    fn increment(&self, path: &str) -> Result<i64, StoreError> {
        let path = normalize_path(path)?;
        let tx = self.conn.unchecked_transaction()?;
        let current = match self.read_normalized(&path)? {
            Some(v) => v
                .as_i64()
                .ok_or_else(|| StoreError::NotACounter(path.clone()))?,
            None => 0,
        };
        let next = current + 1;
        self.write_in_tx(&path, &Value::from(next))?;
        tx.commit()?;
        self.notify(&path);
        Ok(next)
    }
}
