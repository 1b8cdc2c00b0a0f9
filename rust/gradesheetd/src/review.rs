use crate::calc::{calculate, class_statistics, CalculatedGrade, ClassStatistics};
use crate::grade::{display_value, Gender, SlotKey, SlotValue};
use crate::roster::{sort_for_display, StudentRow};
use crate::scheme::{DerivedKey, GradingScheme};
use crate::submission::{Submission, SubmissionSummary};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCell {
    pub value: SlotValue,
    pub display: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRow {
    pub student_id: String,
    pub name: String,
    pub exam_id: Option<String>,
    /// False for students that left the class after the submission was written.
    pub on_roster: bool,
    pub cells: BTreeMap<SlotKey, ReviewCell>,
    pub calculated: CalculatedGrade,
}

/// Read-only reconstruction of one submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTable {
    pub submission: SubmissionSummary,
    pub class_id: String,
    pub subject_id: String,
    pub scheme: GradingScheme,
    pub max_score: u16,
    pub slots: Vec<SlotKey>,
    pub derived: Vec<DerivedKey>,
    pub rows: Vec<ReviewRow>,
    pub statistics: ClassStatistics,
}

pub fn build_table(submission: &Submission, roster: &[StudentRow], gender: Gender) -> ReviewTable {
    let scheme = submission.scheme;
    let layout = scheme.layout();

    let mut students: Vec<StudentRow> = roster
        .iter()
        .filter(|s| submission.grades.contains_key(&s.id))
        .cloned()
        .collect();
    let on_roster: HashSet<String> = students.iter().map(|s| s.id.clone()).collect();
    // Students no longer on the roster sort after everyone else by id.
    let mut departed: Vec<StudentRow> = submission
        .grades
        .keys()
        .filter(|id| !on_roster.contains(*id))
        .map(|id| StudentRow {
            id: id.clone(),
            name: id.clone(),
            exam_id: None,
        })
        .collect();
    sort_for_display(&mut students);
    departed.sort_by(|a, b| a.id.cmp(&b.id));

    let rows = students
        .iter()
        .map(|s| (s, true))
        .chain(departed.iter().map(|s| (s, false)))
        .map(|(s, present)| {
            let grade = submission.grades.get(&s.id).cloned().unwrap_or_default();
            let cells = layout
                .slots
                .iter()
                .map(|k| {
                    let value = grade.get(*k);
                    (
                        *k,
                        ReviewCell {
                            value,
                            display: display_value(value, gender),
                        },
                    )
                })
                .collect();
            ReviewRow {
                student_id: s.id.clone(),
                name: s.name.clone(),
                exam_id: s.exam_id.clone(),
                on_roster: present,
                cells,
                calculated: calculate(scheme, &grade),
            }
        })
        .collect();

    ReviewTable {
        submission: SubmissionSummary::from(submission),
        class_id: submission.class_id.clone(),
        subject_id: submission.subject_id.clone(),
        scheme,
        max_score: scheme.max_score(),
        slots: layout.slots.to_vec(),
        derived: layout.aggregates.iter().map(|a| a.key).collect(),
        rows,
        statistics: class_statistics(scheme, submission.grades.values()),
    }
}
