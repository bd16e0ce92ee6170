//! JSON shapes shared by the class-teacher, faculty and student handlers.

use crate::ipc::error::HandlerErr;
use crate::progress::{ElectiveSlot, SubjectProgress};
use crate::roster::{RosterSnapshot, StudentRow, SubjectRow};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

pub type NameMap = HashMap<String, String>;

pub fn batch_names(conn: &Connection) -> Result<NameMap, HandlerErr> {
    id_name_map(conn, "SELECT id, name FROM batches")
}

pub fn user_names(conn: &Connection) -> Result<NameMap, HandlerErr> {
    id_name_map(conn, "SELECT id, name FROM users")
}

fn id_name_map(conn: &Connection, sql: &str) -> Result<NameMap, HandlerErr> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().collect())
}

pub fn student_json(student: &StudentRow, batches: &NameMap) -> serde_json::Value {
    json!({
        "id": student.id,
        "classId": student.class_id,
        "name": student.name,
        "rollNo": student.roll_no,
        "hallTicketNo": student.hall_ticket_no,
        "email": student.email,
        "batchId": student.batch_id,
        "batchName": student.batch_id.as_ref().and_then(|b| batches.get(b)),
        "attendance": student.attendance,
        "isDefaulter": student.defaulter,
        "selectionsLocked": student.selections_locked,
    })
}

pub fn subject_json(subject: &SubjectRow) -> serde_json::Value {
    json!({
        "id": subject.id,
        "classId": subject.class_id,
        "name": subject.name,
        "code": subject.code,
        "type": subject.kind.as_str(),
    })
}

/// `{ "MDM": {...} | null, "OE": ..., "PE": ... }` for one student.
pub fn electives_json(
    snapshot: &RosterSnapshot,
    student: &StudentRow,
    users: &NameMap,
) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    for slot in ElectiveSlot::ALL {
        let value = snapshot
            .selection(&student.id, slot)
            .and_then(|sel| {
                let subject_id = sel.subject_id.as_ref()?;
                let subject = snapshot.subject(subject_id);
                Some(json!({
                    "subjectId": subject_id,
                    "subjectName": subject.map(|s| s.name.clone()),
                    "subjectCode": subject.map(|s| s.code.clone()),
                    "facultyId": sel.faculty_id,
                    "facultyName": sel.faculty_id.as_ref().and_then(|f| users.get(f)),
                }))
            })
            .unwrap_or(serde_json::Value::Null);
        out.insert(slot.as_str().to_string(), value);
    }
    serde_json::Value::Object(out)
}

pub fn progress_json(subject: &SubjectRow, p: &SubjectProgress) -> serde_json::Value {
    json!({
        "subjectId": subject.id,
        "subjectName": subject.name,
        "subjectCode": subject.code,
        "subjectType": subject.kind.as_str(),
        "ta": p.ta,
        "cie": p.cie,
        "defaulter": p.defaulter,
        "completed": p.completed,
        "total": p.total,
        "submissionPercentage": p.submission_percentage,
    })
}

/// Roster entry with aggregate progress; `with_subjects` adds the per-subject
/// breakdown.
pub fn roster_entry_json(
    snapshot: &RosterSnapshot,
    student: &StudentRow,
    batches: &NameMap,
    users: &NameMap,
    with_subjects: bool,
) -> serde_json::Value {
    let progress = snapshot.progress_for(student);
    let mut entry = student_json(student, batches);
    entry["electives"] = electives_json(snapshot, student, users);
    entry["completed"] = json!(progress.completed);
    entry["total"] = json!(progress.total);
    entry["submissionPercentage"] = json!(progress.submission_percentage);
    if with_subjects {
        let subjects: Vec<serde_json::Value> = progress
            .subjects
            .iter()
            .filter_map(|p| {
                snapshot
                    .subject(&p.subject_id)
                    .map(|subject| progress_json(subject, p))
            })
            .collect();
        entry["submissions"] = json!(subjects);
    }
    entry
}
