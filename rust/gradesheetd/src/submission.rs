use crate::grade::SubjectGrade;
use crate::scheme::GradingScheme;
use crate::store::{normalize_path, RecordStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const SEQUENCE_COUNTER_PATH: &str = "counters/submissionSequence";

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("submission write failed: {0}")]
    Write(#[source] StoreError),
    #[error("submission read failed: {0}")]
    Read(#[source] StoreError),
    #[error("invalid key segment: {0:?}")]
    InvalidKey(String),
}

/// Immutable snapshot of one grade sheet. `sequence` is assigned by the store at write
/// time and decides which submission is the latest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub teacher_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub sequence: i64,
    pub scheme: GradingScheme,
    pub grades: BTreeMap<String, SubjectGrade>,
}

#[derive(Debug, Clone)]
pub struct SubmissionDraft {
    pub teacher_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub scheme: GradingScheme,
    pub grades: BTreeMap<String, SubjectGrade>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSummary {
    pub id: String,
    pub teacher_id: String,
    pub submitted_at: DateTime<Utc>,
    pub sequence: i64,
    pub student_count: usize,
}

impl From<&Submission> for SubmissionSummary {
    fn from(s: &Submission) -> Self {
        Self {
            id: s.id.clone(),
            teacher_id: s.teacher_id.clone(),
            submitted_at: s.submitted_at,
            sequence: s.sequence,
            student_count: s.grades.len(),
        }
    }
}

fn key_segment(raw: &str) -> Result<&str, SubmissionError> {
    if raw.is_empty() || raw.contains('/') || normalize_path(raw).is_err() {
        return Err(SubmissionError::InvalidKey(raw.to_string()));
    }
    Ok(raw)
}

pub fn submissions_path(class_id: &str, subject_id: &str) -> Result<String, SubmissionError> {
    Ok(format!(
        "submissions/{}/{}",
        key_segment(class_id)?,
        key_segment(subject_id)?
    ))
}

/// Newer first. Records written before sequencing carry 0 and fall back to the client
/// timestamp.
fn recency(a: &Submission, b: &Submission) -> Ordering {
    b.sequence
        .cmp(&a.sequence)
        .then_with(|| b.submitted_at.cmp(&a.submitted_at))
        .then_with(|| b.id.cmp(&a.id))
}

/// Writes one new submission under a fresh id. Prior submissions are never touched.
pub fn submit(
    store: &dyn RecordStore,
    draft: SubmissionDraft,
    now: DateTime<Utc>,
) -> Result<Submission, SubmissionError> {
    let base = submissions_path(&draft.class_id, &draft.subject_id)?;
    let sequence = store
        .increment(SEQUENCE_COUNTER_PATH)
        .map_err(SubmissionError::Write)?;

    let submission = Submission {
        id: Uuid::new_v4().to_string(),
        teacher_id: draft.teacher_id,
        class_id: draft.class_id,
        subject_id: draft.subject_id,
        submitted_at: now,
        sequence,
        scheme: draft.scheme,
        grades: draft.grades,
    };

    let value = serde_json::to_value(&submission)
        .map_err(|e| SubmissionError::Write(StoreError::Json(e)))?;
    store
        .set(&format!("{}/{}", base, submission.id), &value)
        .map_err(SubmissionError::Write)?;

    info!(
        submission_id = %submission.id,
        class_id = %submission.class_id,
        subject_id = %submission.subject_id,
        sequence,
        students = submission.grades.len(),
        "submission written"
    );
    Ok(submission)
}

/// All submissions for (class, subject), newest first. Unreadable records are skipped.
pub fn list(
    store: &dyn RecordStore,
    class_id: &str,
    subject_id: &str,
    teacher_id: Option<&str>,
) -> Result<Vec<Submission>, SubmissionError> {
    let base = submissions_path(class_id, subject_id)?;
    let value = store.get(&base).map_err(SubmissionError::Read)?;
    Ok(from_collection(&base, value.as_ref(), teacher_id))
}

/// Decodes a `submissions/{class}/{subject}` snapshot, as returned by `get` or delivered
/// to a subscriber.
pub fn from_collection(
    base: &str,
    value: Option<&Value>,
    teacher_id: Option<&str>,
) -> Vec<Submission> {
    let Some(value) = value else {
        return Vec::new();
    };
    let Some(obj) = value.as_object() else {
        warn!(path = %base, "submission collection is not an object");
        return Vec::new();
    };

    let mut out = Vec::with_capacity(obj.len());
    for (id, raw) in obj {
        match serde_json::from_value::<Submission>(raw.clone()) {
            Ok(s) => {
                if teacher_id.map(|t| t == s.teacher_id).unwrap_or(true) {
                    out.push(s);
                }
            }
            Err(e) => warn!(path = %base, id = %id, error = %e, "skipping malformed submission"),
        }
    }
    out.sort_by(recency);
    out
}

pub fn latest(
    store: &dyn RecordStore,
    class_id: &str,
    subject_id: &str,
    teacher_id: Option<&str>,
) -> Result<Option<Submission>, SubmissionError> {
    Ok(list(store, class_id, subject_id, teacher_id)?.into_iter().next())
}

pub fn history(
    store: &dyn RecordStore,
    class_id: &str,
    subject_id: &str,
    teacher_id: Option<&str>,
) -> Result<Vec<SubmissionSummary>, SubmissionError> {
    Ok(list(store, class_id, subject_id, teacher_id)?
        .iter()
        .map(SubmissionSummary::from)
        .collect())
}

pub fn load(
    store: &dyn RecordStore,
    class_id: &str,
    subject_id: &str,
    submission_id: &str,
) -> Result<Option<Submission>, SubmissionError> {
    let path = format!(
        "{}/{}",
        submissions_path(class_id, subject_id)?,
        key_segment(submission_id)?
    );
    match store.get(&path).map_err(SubmissionError::Read)? {
        Some(v) => Ok(serde_json::from_value(v).ok()),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grade::{SlotKey, SlotValue};
    use crate::store::{ChangeFn, SqliteStore, Subscription};
    use chrono::TimeZone;

    fn draft(teacher: &str, mid: u16) -> SubmissionDraft {
        let mut grades = BTreeMap::new();
        grades.insert(
            "st1".to_string(),
            SubjectGrade::new().with(SlotKey::MidYear, SlotValue::Score(mid)),
        );
        SubmissionDraft {
            teacher_id: teacher.into(),
            class_id: "c1".into(),
            subject_id: "math".into(),
            scheme: GradingScheme::Standard,
            grades,
        }
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, h, 0, 0).single().expect("valid time")
    }

    /// Reads go through; every write fails.
    struct ReadOnly<'a>(&'a SqliteStore);

    impl RecordStore for ReadOnly<'_> {
        fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
            self.0.get(path)
        }
        fn set(&self, _path: &str, _value: &Value) -> Result<(), StoreError> {
            Err(StoreError::Db(rusqlite::Error::InvalidQuery))
        }
        fn subscribe(&self, path: &str, f: ChangeFn) -> Result<Subscription, StoreError> {
            self.0.subscribe(path, f)
        }
        fn increment(&self, path: &str) -> Result<i64, StoreError> {
            self.0.increment(path)
        }
    }

    #[test]
    fn later_submission_wins_and_both_are_kept() {
        let store = SqliteStore::open_in_memory().expect("store");
        let first = submit(&store, draft("t1", 50), at(9)).expect("first");
        let second = submit(&store, draft("t1", 60), at(10)).expect("second");
        assert_ne!(first.id, second.id);
        assert!(second.sequence > first.sequence);

        let latest = latest(&store, "c1", "math", None).expect("latest").expect("some");
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.grades["st1"].get(SlotKey::MidYear), SlotValue::Score(60));

        let hist = history(&store, "c1", "math", None).expect("history");
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0].id, second.id);
        assert_eq!(hist[1].id, first.id);
    }

    #[test]
    fn store_sequence_beats_skewed_client_clock() {
        let store = SqliteStore::open_in_memory().expect("store");
        let _early_clock = submit(&store, draft("t1", 50), at(12)).expect("first");
        let late_clock = submit(&store, draft("t2", 70), at(8)).expect("second");
        let latest = latest(&store, "c1", "math", None).expect("latest").expect("some");
        assert_eq!(latest.id, late_clock.id);
    }

    #[test]
    fn unsequenced_records_fall_back_to_timestamp() {
        let store = SqliteStore::open_in_memory().expect("store");
        let mut a = submit(&store, draft("t1", 10), at(8)).expect("a");
        let mut b = submit(&store, draft("t1", 20), at(9)).expect("b");
        a.sequence = 0;
        b.sequence = 0;
        a.submitted_at = at(11);
        for s in [&a, &b] {
            store
                .set(
                    &format!("submissions/c1/math/{}", s.id),
                    &serde_json::to_value(s).expect("json"),
                )
                .expect("rewrite");
        }
        let latest = latest(&store, "c1", "math", None).expect("latest").expect("some");
        assert_eq!(latest.id, a.id);
    }

    #[test]
    fn teacher_filter_narrows_selection() {
        let store = SqliteStore::open_in_memory().expect("store");
        let t1 = submit(&store, draft("t1", 50), at(9)).expect("t1");
        let _t2 = submit(&store, draft("t2", 60), at(10)).expect("t2");
        let latest = latest(&store, "c1", "math", Some("t1")).expect("latest").expect("some");
        assert_eq!(latest.id, t1.id);
        assert!(latest_is_none(&store, "t3"));
    }

    fn latest_is_none(store: &SqliteStore, teacher: &str) -> bool {
        latest(store, "c1", "math", Some(teacher)).expect("latest").is_none()
    }

    #[test]
    fn failed_write_leaves_prior_submissions_intact() {
        let store = SqliteStore::open_in_memory().expect("store");
        let kept = submit(&store, draft("t1", 50), at(9)).expect("first");

        let failing = ReadOnly(&store);
        let r = submit(&failing, draft("t1", 99), at(10));
        assert!(matches!(r, Err(SubmissionError::Write(_))));

        let hist = history(&store, "c1", "math", None).expect("history");
        assert_eq!(hist.len(), 1);
        let latest = latest(&store, "c1", "math", None).expect("latest").expect("some");
        assert_eq!(latest, kept);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let store = SqliteStore::open_in_memory().expect("store");
        let good = submit(&store, draft("t1", 50), at(9)).expect("good");
        store
            .set("submissions/c1/math/broken", &serde_json::json!({ "id": 3 }))
            .expect("write junk");
        let all = list(&store, "c1", "math", None).expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, good.id);
    }

    #[test]
    fn key_segments_cannot_escape_the_collection() {
        let store = SqliteStore::open_in_memory().expect("store");
        let mut d = draft("t1", 1);
        d.class_id = "c1/../x".into();
        assert!(matches!(
            submit(&store, d, at(9)),
            Err(SubmissionError::InvalidKey(_))
        ));
    }
}
