use crate::grade::Gender;
use crate::scheme::{GradingScheme, SchoolLevel};
use rusqlite::{Connection, OptionalExtension};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: String,
    pub name: String,
    pub school_level: SchoolLevel,
    pub grade: u8,
    pub gender: Option<Gender>,
}

impl ClassInfo {
    pub fn scheme(&self) -> GradingScheme {
        GradingScheme::for_class(self.school_level, self.grade)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub exam_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubjectRow {
    pub id: String,
    pub class_id: String,
    pub name: String,
    pub teacher_id: Option<String>,
}

pub fn class_get(conn: &Connection, class_id: &str) -> rusqlite::Result<Option<ClassInfo>> {
    conn.query_row(
        "SELECT id, name, school_level, grade, gender FROM classes WHERE id = ?",
        [class_id],
        |r| {
            let level: String = r.get(2)?;
            let grade: i64 = r.get(3)?;
            let gender: Option<String> = r.get(4)?;
            Ok(ClassInfo {
                id: r.get(0)?,
                name: r.get(1)?,
                school_level: SchoolLevel::parse(&level).unwrap_or(SchoolLevel::Secondary),
                grade: u8::try_from(grade).unwrap_or(0),
                gender: gender.as_deref().and_then(Gender::parse),
            })
        },
    )
    .optional()
}

pub fn students_for_class(conn: &Connection, class_id: &str) -> rusqlite::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, exam_id FROM students WHERE class_id = ? ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                name: r.get(1)?,
                exam_id: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn subject_get(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
) -> rusqlite::Result<Option<SubjectRow>> {
    conn.query_row(
        "SELECT id, class_id, name, teacher_id FROM subjects WHERE class_id = ? AND id = ?",
        (class_id, subject_id),
        |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                class_id: r.get(1)?,
                name: r.get(2)?,
                teacher_id: r.get(3)?,
            })
        },
    )
    .optional()
}

pub fn subjects_all(conn: &Connection) -> rusqlite::Result<Vec<SubjectRow>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.class_id, s.name, s.teacher_id
         FROM subjects s JOIN classes c ON c.id = s.class_id
         ORDER BY c.name, s.sort_order",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                class_id: r.get(1)?,
                name: r.get(2)?,
                teacher_id: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn compare_exam_ids(a: Option<&str>, b: Option<&str>) -> Ordering {
    let a = a.map(str::trim).filter(|s| !s.is_empty());
    let b = b.map(str::trim).filter(|s| !s.is_empty());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        },
    }
}

/// Grade-sheet row order: exam ID (numeric when both parse), then name, then id.
pub fn sort_for_display(students: &mut [StudentRow]) {
    students.sort_by(|a, b| {
        compare_exam_ids(a.exam_id.as_deref(), b.exam_id.as_deref())
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(id: &str, name: &str, exam: Option<&str>) -> StudentRow {
        StudentRow {
            id: id.into(),
            name: name.into(),
            exam_id: exam.map(Into::into),
        }
    }

    #[test]
    fn numeric_exam_ids_sort_numerically() {
        let mut rows = vec![
            s("a", "A", Some("10")),
            s("b", "B", Some("9")),
            s("c", "C", Some("100")),
        ];
        sort_for_display(&mut rows);
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn mixed_and_missing_exam_ids() {
        let mut rows = vec![
            s("none", "Zed", None),
            s("txt2", "T2", Some("B-2")),
            s("num", "N", Some("5")),
            s("txt1", "T1", Some("A-7")),
            s("blank", "Amy", Some("  ")),
        ];
        sort_for_display(&mut rows);
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["num", "txt1", "txt2", "blank", "none"]);
    }
}
