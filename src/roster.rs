use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::progress::{
    student_progress, subject_progress, ElectiveSlot, StudentProgress, StudentRef, SubjectKind,
    SubjectProgress, SubjectRef, SubmissionIndex, SubmissionRecord, SubmissionTypeIds,
    SubmissionTypeRow,
};

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub class_id: String,
    pub batch_id: Option<String>,
    pub name: String,
    pub roll_no: String,
    pub hall_ticket_no: Option<String>,
    pub email: Option<String>,
    pub attendance: Option<f64>,
    pub defaulter: bool,
    pub selections_locked: bool,
}

impl StudentRow {
    pub const COLUMNS: &'static str = "id, class_id, batch_id, name, roll_no, hall_ticket_no, email, attendance, defaulter, selections_locked";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            class_id: r.get(1)?,
            batch_id: r.get(2)?,
            name: r.get(3)?,
            roll_no: r.get(4)?,
            hall_ticket_no: r.get(5)?,
            email: r.get(6)?,
            attendance: r.get(7)?,
            defaulter: r.get::<_, i64>(8)? != 0,
            selections_locked: r.get::<_, i64>(9)? != 0,
        })
    }

    pub fn progress_ref(&self) -> StudentRef<'_> {
        StudentRef {
            id: &self.id,
            defaulter: self.defaulter,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubjectRow {
    pub id: String,
    pub class_id: String,
    pub name: String,
    pub code: String,
    pub kind: SubjectKind,
}

impl SubjectRow {
    pub const COLUMNS: &'static str = "id, class_id, name, code, type";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        let raw: String = r.get(4)?;
        let kind = SubjectKind::parse(&raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown subject type {raw:?}").into(),
            )
        })?;
        Ok(Self {
            id: r.get(0)?,
            class_id: r.get(1)?,
            name: r.get(2)?,
            code: r.get(3)?,
            kind,
        })
    }

    pub fn progress_ref(&self) -> SubjectRef<'_> {
        SubjectRef {
            id: &self.id,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectionRow {
    pub student_id: String,
    pub slot: ElectiveSlot,
    pub subject_id: Option<String>,
    pub faculty_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AssignmentRow {
    pub subject_id: String,
    pub faculty_id: String,
    pub batch_id: Option<String>,
}

/// Everything needed to derive submission progress for a set of classes,
/// read once per request.
#[derive(Debug, Default)]
pub struct RosterSnapshot {
    pub students: Vec<StudentRow>,
    pub subjects: Vec<SubjectRow>,
    selections: HashMap<(String, ElectiveSlot), SelectionRow>,
    assignments: Vec<AssignmentRow>,
    pub types: SubmissionTypeIds,
    index: SubmissionIndex,
}

pub fn load_submission_types(conn: &Connection) -> rusqlite::Result<Vec<SubmissionTypeRow>> {
    let mut stmt = conn.prepare("SELECT id, name, kind FROM submission_types ORDER BY rowid")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SubmissionTypeRow {
                id: r.get(0)?,
                name: r.get(1)?,
                kind: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl RosterSnapshot {
    pub fn load_class(conn: &Connection, class_id: &str) -> rusqlite::Result<Self> {
        Self::load_classes(conn, &[class_id.to_string()])
    }

    /// Loads every class the faculty member has a core assignment in or grades
    /// an elective selection for.
    pub fn load_for_faculty(conn: &Connection, faculty_id: &str) -> rusqlite::Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT s.class_id
             FROM subject_faculty sf
             JOIN subjects s ON s.id = sf.subject_id
             WHERE sf.faculty_id = ?1
             UNION
             SELECT st.class_id
             FROM elective_selections es
             JOIN students st ON st.id = es.student_id
             WHERE es.faculty_id = ?1
             ORDER BY 1",
        )?;
        let class_ids = stmt
            .query_map([faculty_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Self::load_classes(conn, &class_ids)
    }

    pub fn load_classes(conn: &Connection, class_ids: &[String]) -> rusqlite::Result<Self> {
        let mut snapshot = Self {
            types: SubmissionTypeIds::resolve(&load_submission_types(conn)?),
            ..Self::default()
        };
        let mut seen_subjects: HashSet<String> = HashSet::new();
        let mut records: Vec<SubmissionRecord> = Vec::new();

        let mut student_stmt = conn.prepare(&format!(
            "SELECT {} FROM students WHERE class_id = ?",
            StudentRow::COLUMNS
        ))?;
        // Electives may be owned by another class, so pull in anything a
        // student of this class selected.
        let mut subject_stmt = conn.prepare(&format!(
            "SELECT {} FROM subjects
             WHERE class_id = ?1
                OR id IN (
                  SELECT es.subject_id
                  FROM elective_selections es
                  JOIN students st ON st.id = es.student_id
                  WHERE st.class_id = ?1 AND es.subject_id IS NOT NULL
                )
             ORDER BY code, name",
            SubjectRow::COLUMNS
        ))?;
        let mut selection_stmt = conn.prepare(
            "SELECT es.student_id, es.slot, es.subject_id, es.faculty_id
             FROM elective_selections es
             JOIN students st ON st.id = es.student_id
             WHERE st.class_id = ?",
        )?;
        let mut assignment_stmt = conn.prepare(
            "SELECT sf.subject_id, sf.faculty_id, sf.batch_id
             FROM subject_faculty sf
             JOIN subjects s ON s.id = sf.subject_id
             WHERE s.class_id = ?",
        )?;
        let mut submission_stmt = conn.prepare(
            "SELECT sub.student_id, sub.subject_id, sub.submission_type_id, sub.status
             FROM submissions sub
             JOIN students st ON st.id = sub.student_id
             WHERE st.class_id = ?",
        )?;

        for class_id in class_ids {
            let students = student_stmt
                .query_map([class_id], StudentRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            snapshot.students.extend(students);

            let subjects = subject_stmt
                .query_map([class_id], SubjectRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            for s in subjects {
                if seen_subjects.insert(s.id.clone()) {
                    snapshot.subjects.push(s);
                }
            }

            let selections = selection_stmt
                .query_map([class_id], |r| {
                    let raw_slot: String = r.get(1)?;
                    let slot = ElectiveSlot::parse(&raw_slot).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            Type::Text,
                            format!("unknown elective slot {raw_slot:?}").into(),
                        )
                    })?;
                    Ok(SelectionRow {
                        student_id: r.get(0)?,
                        slot,
                        subject_id: r.get(2)?,
                        faculty_id: r.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for sel in selections {
                snapshot
                    .selections
                    .insert((sel.student_id.clone(), sel.slot), sel);
            }

            let assignments = assignment_stmt
                .query_map([class_id], |r| {
                    Ok(AssignmentRow {
                        subject_id: r.get(0)?,
                        faculty_id: r.get(1)?,
                        batch_id: r.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            snapshot.assignments.extend(assignments);

            let subs = submission_stmt
                .query_map([class_id], |r| {
                    Ok(SubmissionRecord {
                        student_id: r.get(0)?,
                        subject_id: r.get(1)?,
                        submission_type_id: r.get(2)?,
                        status: r.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            records.extend(subs);
        }

        snapshot
            .students
            .sort_by(|a, b| a.class_id.cmp(&b.class_id).then_with(|| compare_rolls(&a.roll_no, &b.roll_no)));
        snapshot.index = SubmissionIndex::from_records(records);
        Ok(snapshot)
    }

    pub fn subject(&self, subject_id: &str) -> Option<&SubjectRow> {
        self.subjects.iter().find(|s| s.id == subject_id)
    }

    pub fn student(&self, student_id: &str) -> Option<&StudentRow> {
        self.students.iter().find(|s| s.id == student_id)
    }

    pub fn selection(&self, student_id: &str, slot: ElectiveSlot) -> Option<&SelectionRow> {
        self.selections.get(&(student_id.to_string(), slot))
    }

    /// The class's core subjects followed by the electives the student
    /// selected, in MDM, OE, PE order.
    pub fn applicable_subjects(&self, student: &StudentRow) -> Vec<&SubjectRow> {
        let mut out: Vec<&SubjectRow> = self
            .subjects
            .iter()
            .filter(|s| s.class_id == student.class_id && !s.kind.is_elective())
            .collect();
        for slot in ElectiveSlot::ALL {
            if let Some(subject) = self.selected_elective(student, slot) {
                out.push(subject);
            }
        }
        out
    }

    fn selected_elective(&self, student: &StudentRow, slot: ElectiveSlot) -> Option<&SubjectRow> {
        let subject_id = self.selection(&student.id, slot)?.subject_id.as_deref()?;
        self.subject(subject_id)
            .filter(|s| s.kind.elective_slot() == Some(slot))
    }

    pub fn progress_for(&self, student: &StudentRow) -> StudentProgress {
        student_progress(
            student.progress_ref(),
            self.applicable_subjects(student)
                .into_iter()
                .map(SubjectRow::progress_ref),
            &self.types,
            &self.index,
        )
    }

    pub fn subject_progress_for(&self, student: &StudentRow, subject: &SubjectRow) -> SubjectProgress {
        subject_progress(student.progress_ref(), subject.progress_ref(), &self.types, &self.index)
    }

    /// Whether the faculty member grades this (student, subject) pair.
    pub fn faculty_teaches(&self, faculty_id: &str, student: &StudentRow, subject: &SubjectRow) -> bool {
        match subject.kind.elective_slot() {
            Some(slot) => self
                .selection(&student.id, slot)
                .map(|sel| {
                    sel.subject_id.as_deref() == Some(subject.id.as_str())
                        && sel.faculty_id.as_deref() == Some(faculty_id)
                })
                .unwrap_or(false),
            None => {
                subject.class_id == student.class_id
                    && self.assignments.iter().any(|a| {
                        a.subject_id == subject.id
                            && a.faculty_id == faculty_id
                            && (a.batch_id.is_none() || a.batch_id == student.batch_id)
                    })
            }
        }
    }

    /// One entry per (student, subject) the faculty member grades. A student
    /// appears once for every such subject.
    pub fn faculty_pairs(&self, faculty_id: &str) -> Vec<(&StudentRow, &SubjectRow)> {
        let mut out = Vec::new();
        for student in &self.students {
            for subject in self.applicable_subjects(student) {
                if self.faculty_teaches(faculty_id, student, subject) {
                    out.push((student, subject));
                }
            }
        }
        out
    }

    pub fn assignments_for_subject<'a>(&'a self, subject_id: &'a str) -> impl Iterator<Item = &'a AssignmentRow> + 'a {
        self.assignments.iter().filter(move |a| a.subject_id == subject_id)
    }
}

/// Sort key for roll numbers: the uppercased prefix, then the trailing digit
/// run as a number, then the whole uppercased roll. `22CS9` sorts before
/// `22CS10`, and a roll with no trailing digits (`A10B`) is keyed on its full
/// text as the prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RollKey {
    prefix: String,
    number: Option<u64>,
    raw: String,
}

impl RollKey {
    fn new(roll: &str) -> Self {
        let roll = roll.trim();
        let digits_start = roll
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(i, _)| i);
        let (prefix, number) = match digits_start {
            Some(i) => (&roll[..i], roll[i..].parse::<u64>().ok()),
            None => (roll, None),
        };
        Self {
            prefix: prefix.to_ascii_uppercase(),
            number,
            raw: roll.to_ascii_uppercase(),
        }
    }
}

pub fn compare_rolls(a: &str, b: &str) -> Ordering {
    RollKey::new(a).cmp(&RollKey::new(b))
}

pub fn roll_in_range(roll: &str, from: &str, to: &str) -> bool {
    let key = RollKey::new(roll);
    key >= RollKey::new(from) && key <= RollKey::new(to)
}
