use crate::calc::{calculate, CalculatedGrade};
use crate::grade::{display_value, Gender, SlotKey, SlotValue, SubjectGrade};
use crate::roster::{sort_for_display, StudentRow};
use crate::scheme::{DerivedKey, GradingScheme};
use crate::submission::{Submission, SubmissionDraft};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

const ABSENT_ALIASES: [&str; 3] = ["غ", "غائب", "غائبة"];
const EXEMPTED_ALIASES: [&str; 3] = ["م", "مجاز", "مجازة"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SheetError {
    #[error("student is not on this sheet: {0}")]
    UnknownStudent(String),
    #[error("slot {0} is not part of the {1} scheme")]
    SlotNotInScheme(&'static str, &'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetState {
    Loaded,
    Editing,
    Submitted,
}

#[derive(Debug, Clone, Copy)]
pub struct SheetOptions {
    pub gender: Gender,
    pub auto_advance: bool,
}

impl Default for SheetOptions {
    fn default() -> Self {
        Self {
            gender: Gender::Male,
            auto_advance: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub student_id: String,
    pub slot: SlotKey,
}

/// Parses typed cell text. `None` means the text is not a grade at all.
pub fn parse_cell(text: &str, max: u16) -> Option<SlotValue> {
    let t = text.trim();
    if t.is_empty() {
        return Some(SlotValue::NotEntered);
    }
    if ABSENT_ALIASES.contains(&t) {
        return Some(SlotValue::Absent);
    }
    if EXEMPTED_ALIASES.contains(&t) {
        return Some(SlotValue::Exempted);
    }
    let (negative, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if negative {
        return Some(SlotValue::Score(0));
    }
    // Any digit run too long for u64 is still above the bound.
    let n = digits.parse::<u64>().unwrap_or(u64::MAX);
    Some(SlotValue::Score(n.min(u64::from(max)) as u16))
}

/// True once typed digits reach the bound's digit length. A leading zero means the
/// entry may still be a truncated prefix and waits for an explicit commit.
fn is_complete_entry(text: &str, max_digits: usize) -> bool {
    let t = text.trim();
    !t.is_empty()
        && t.bytes().all(|b| b.is_ascii_digit())
        && t.len() >= max_digits
        && !(t.len() > 1 && t.starts_with('0'))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellOutcome {
    pub student_id: String,
    pub slot: SlotKey,
    pub value: SlotValue,
    pub display: String,
    pub pending: Option<String>,
    pub committed: bool,
    pub reverted: bool,
    pub advanced: bool,
    pub focus: Option<Cursor>,
    pub calculated: CalculatedGrade,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellView {
    pub value: SlotValue,
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    pub student_id: String,
    pub name: String,
    pub exam_id: Option<String>,
    pub cells: BTreeMap<SlotKey, CellView>,
    pub calculated: CalculatedGrade,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetView {
    pub session_id: String,
    pub configured: bool,
    pub state: SheetState,
    pub teacher_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub scheme: GradingScheme,
    pub max_score: u16,
    pub gender: Gender,
    pub slots: Vec<SlotKey>,
    pub derived: Vec<DerivedKey>,
    pub seeded_from: Option<String>,
    pub last_submission_id: Option<String>,
    pub focus: Option<Cursor>,
    pub rows: Vec<RowView>,
}

/// Editing session for one (teacher, class, subject). Owned by a single client and
/// never merged with other sessions.
#[derive(Debug)]
pub struct SheetSession {
    pub id: String,
    pub teacher_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub scheme: GradingScheme,
    options: SheetOptions,
    state: SheetState,
    students: Vec<StudentRow>,
    committed: HashMap<String, SubjectGrade>,
    pending: HashMap<(String, SlotKey), String>,
    focus: Option<Cursor>,
    seeded_from: Option<String>,
    last_submission_id: Option<String>,
}

impl SheetSession {
    /// Seeds every roster student from `seed` when given, else from empty defaults.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: String,
        teacher_id: String,
        class_id: String,
        subject_id: String,
        scheme: GradingScheme,
        mut students: Vec<StudentRow>,
        seed: Option<&Submission>,
        options: SheetOptions,
    ) -> Self {
        sort_for_display(&mut students);
        let max = scheme.max_score();
        let committed = students
            .iter()
            .map(|s| {
                let mut grade = SubjectGrade::new();
                if let Some(prior) = seed.and_then(|sub| sub.grades.get(&s.id)) {
                    for (k, v) in prior.iter() {
                        if !scheme.has_slot(k) {
                            continue;
                        }
                        let v = match v {
                            SlotValue::Score(n) if n > max => SlotValue::Score(max),
                            other => other,
                        };
                        grade.set(k, v);
                    }
                }
                (s.id.clone(), grade)
            })
            .collect();

        Self {
            id,
            teacher_id,
            class_id,
            subject_id,
            scheme,
            options,
            state: SheetState::Loaded,
            students,
            committed,
            pending: HashMap::new(),
            focus: None,
            seeded_from: seed.map(|s| s.id.clone()),
            last_submission_id: None,
        }
    }

    pub fn state(&self) -> SheetState {
        self.state
    }

    pub fn value(&self, student_id: &str, slot: SlotKey) -> SlotValue {
        self.committed
            .get(student_id)
            .map(|g| g.get(slot))
            .unwrap_or_default()
    }

    fn check_cell(&self, student_id: &str, slot: SlotKey) -> Result<(), SheetError> {
        if !self.committed.contains_key(student_id) {
            return Err(SheetError::UnknownStudent(student_id.to_string()));
        }
        if !self.scheme.has_slot(slot) {
            return Err(SheetError::SlotNotInScheme(slot.as_str(), self.scheme.as_str()));
        }
        Ok(())
    }

    fn next_cursor(&self, student_id: &str, slot: SlotKey) -> Option<Cursor> {
        let pos = self.students.iter().position(|s| s.id == student_id)?;
        self.students.get(pos + 1).map(|s| Cursor {
            student_id: s.id.clone(),
            slot,
        })
    }

    fn store_value(&mut self, student_id: &str, slot: SlotKey, value: SlotValue) {
        if let Some(g) = self.committed.get_mut(student_id) {
            g.set(slot, value);
        }
        self.state = SheetState::Editing;
    }

    fn outcome(
        &self,
        student_id: &str,
        slot: SlotKey,
        committed: bool,
        reverted: bool,
        advanced: bool,
    ) -> CellOutcome {
        let value = self.value(student_id, slot);
        let grade = self.committed.get(student_id).cloned().unwrap_or_default();
        CellOutcome {
            student_id: student_id.to_string(),
            slot,
            value,
            display: display_value(value, self.options.gender),
            pending: self.pending.get(&(student_id.to_string(), slot)).cloned(),
            committed,
            reverted,
            advanced,
            focus: self.focus.clone(),
            calculated: calculate(self.scheme, &grade),
        }
    }

    /// Moves focus to the next student's same slot. Stays put after the last student.
    fn advance(&mut self, student_id: &str, slot: SlotKey) -> bool {
        match self.next_cursor(student_id, slot) {
            Some(next) => {
                self.focus = Some(next);
                true
            }
            None => false,
        }
    }

    /// A keystroke-level edit. Complete numeric entries commit and advance immediately;
    /// anything else is held as pending text.
    pub fn input(
        &mut self,
        student_id: &str,
        slot: SlotKey,
        text: &str,
    ) -> Result<CellOutcome, SheetError> {
        self.check_cell(student_id, slot)?;
        let key = (student_id.to_string(), slot);
        self.focus = Some(Cursor {
            student_id: student_id.to_string(),
            slot,
        });
        self.state = SheetState::Editing;

        if self.options.auto_advance && is_complete_entry(text, self.scheme.max_digits()) {
            if let Some(value) = parse_cell(text, self.scheme.max_score()) {
                self.pending.remove(&key);
                self.store_value(student_id, slot, value);
                let advanced = self.advance(student_id, slot);
                debug!(student_id, slot = slot.as_str(), ?value, advanced, "cell committed on length");
                return Ok(self.outcome(student_id, slot, true, false, advanced));
            }
        }

        self.pending.insert(key, text.to_string());
        Ok(self.outcome(student_id, slot, false, false, false))
    }

    /// Explicit commit keypress: commits and advances regardless of length.
    pub fn commit(
        &mut self,
        student_id: &str,
        slot: SlotKey,
        text: Option<&str>,
    ) -> Result<CellOutcome, SheetError> {
        self.check_cell(student_id, slot)?;
        self.focus = Some(Cursor {
            student_id: student_id.to_string(),
            slot,
        });
        self.resolve(student_id, slot, text, true)
    }

    /// Focus leaves the cell: valid pending text commits, anything else reverts.
    pub fn blur(&mut self, student_id: &str, slot: SlotKey) -> Result<CellOutcome, SheetError> {
        self.check_cell(student_id, slot)?;
        self.resolve(student_id, slot, None, false)
    }

    fn resolve(
        &mut self,
        student_id: &str,
        slot: SlotKey,
        text: Option<&str>,
        advance: bool,
    ) -> Result<CellOutcome, SheetError> {
        let key = (student_id.to_string(), slot);
        let pending = self.pending.remove(&key);
        let Some(raw) = text.map(str::to_string).or(pending) else {
            // Nothing typed: a commit keypress still moves on.
            let advanced = advance && self.advance(student_id, slot);
            return Ok(self.outcome(student_id, slot, false, false, advanced));
        };

        match parse_cell(&raw, self.scheme.max_score()) {
            Some(value) => {
                self.store_value(student_id, slot, value);
                let advanced = advance && self.advance(student_id, slot);
                debug!(student_id, slot = slot.as_str(), ?value, advanced, "cell committed");
                Ok(self.outcome(student_id, slot, true, false, advanced))
            }
            None => {
                debug!(student_id, slot = slot.as_str(), text = %raw, "unparseable cell reverted");
                Ok(self.outcome(student_id, slot, false, true, false))
            }
        }
    }

    /// Snapshot of committed values for every student on the sheet. Pending text is
    /// not part of a submission.
    pub fn draft(&self) -> SubmissionDraft {
        SubmissionDraft {
            teacher_id: self.teacher_id.clone(),
            class_id: self.class_id.clone(),
            subject_id: self.subject_id.clone(),
            scheme: self.scheme,
            grades: self
                .committed
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn mark_submitted(&mut self, submission_id: &str) {
        self.state = SheetState::Submitted;
        self.last_submission_id = Some(submission_id.to_string());
    }

    pub fn view(&self) -> SheetView {
        let gender = self.options.gender;
        let rows = self
            .students
            .iter()
            .map(|s| {
                let grade = self.committed.get(&s.id).cloned().unwrap_or_default();
                let cells = self
                    .scheme
                    .layout()
                    .slots
                    .iter()
                    .map(|k| {
                        let value = grade.get(*k);
                        (
                            *k,
                            CellView {
                                value,
                                display: display_value(value, gender),
                                pending: self.pending.get(&(s.id.clone(), *k)).cloned(),
                            },
                        )
                    })
                    .collect();
                RowView {
                    student_id: s.id.clone(),
                    name: s.name.clone(),
                    exam_id: s.exam_id.clone(),
                    cells,
                    calculated: calculate(self.scheme, &grade),
                }
            })
            .collect();

        SheetView {
            session_id: self.id.clone(),
            configured: true,
            state: self.state,
            teacher_id: self.teacher_id.clone(),
            class_id: self.class_id.clone(),
            subject_id: self.subject_id.clone(),
            scheme: self.scheme,
            max_score: self.scheme.max_score(),
            gender,
            slots: self.scheme.layout().slots.to_vec(),
            derived: self.scheme.layout().aggregates.iter().map(|a| a.key).collect(),
            seeded_from: self.seeded_from.clone(),
            last_submission_id: self.last_submission_id.clone(),
            focus: self.focus.clone(),
            rows,
        }
    }
}
