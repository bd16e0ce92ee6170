use crate::ipc::access::require_role;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::views::{batch_names, progress_json, student_json, subject_json};
use crate::ipc::helpers::{get_optional_str, with_db};
use crate::ipc::types::{AppState, Request, Role};
use crate::roster::{RosterSnapshot, SubjectRow};
use rusqlite::Connection;
use serde_json::json;

const SUBJECT_COLUMNS: &str = "s.id, s.class_id, s.name, s.code, s.type";

fn faculty_subjects(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, &[Role::Faculty])?;
    let faculty_id = caller.user_id.as_str();

    // Core subjects, one entry per assignment so batch scoping stays visible.
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUBJECT_COLUMNS}, c.name, sf.batch_id, b.name
         FROM subject_faculty sf
         JOIN subjects s ON s.id = sf.subject_id
         JOIN classes c ON c.id = s.class_id
         LEFT JOIN batches b ON b.id = sf.batch_id
         WHERE sf.faculty_id = ? AND s.type IN ('theory', 'practical')
         ORDER BY c.name, s.code"
    ))?;
    let assigned = stmt
        .query_map([faculty_id], |r| {
            let mut v = subject_json(&SubjectRow::from_row(r)?);
            v["className"] = json!(r.get::<_, String>(5)?);
            v["batchId"] = json!(r.get::<_, Option<String>>(6)?);
            v["batchName"] = json!(r.get::<_, Option<String>>(7)?);
            Ok(v)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // Electives this faculty grades because students picked them for the slot.
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUBJECT_COLUMNS}, c.name, COUNT(es.student_id)
         FROM elective_selections es
         JOIN subjects s ON s.id = es.subject_id
         JOIN classes c ON c.id = s.class_id
         WHERE es.faculty_id = ?
         GROUP BY s.id
         ORDER BY s.type, s.code"
    ))?;
    let electives = stmt
        .query_map([faculty_id], |r| {
            let mut v = subject_json(&SubjectRow::from_row(r)?);
            v["className"] = json!(r.get::<_, String>(5)?);
            v["studentCount"] = json!(r.get::<_, i64>(6)?);
            Ok(v)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // Electives the faculty is listed to teach, selected or not.
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT {SUBJECT_COLUMNS}, c.name
         FROM subject_faculty sf
         JOIN subjects s ON s.id = sf.subject_id
         JOIN classes c ON c.id = s.class_id
         WHERE sf.faculty_id = ? AND s.type IN ('MDM', 'OE', 'PE')
         ORDER BY s.type, s.code"
    ))?;
    let offered = stmt
        .query_map([faculty_id], |r| {
            let mut v = subject_json(&SubjectRow::from_row(r)?);
            v["className"] = json!(r.get::<_, String>(5)?);
            Ok(v)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "assigned": assigned,
        "electives": electives,
        "offered": offered,
    }))
}

fn faculty_students(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, &[Role::Faculty])?;
    let subject_filter = get_optional_str(&req.params, "subjectId")?;

    let snapshot = RosterSnapshot::load_for_faculty(conn, &caller.user_id)?;
    let batches = batch_names(conn)?;
    let rows: Vec<serde_json::Value> = snapshot
        .faculty_pairs(&caller.user_id)
        .into_iter()
        .filter(|(_, subject)| {
            subject_filter
                .as_deref()
                .map(|id| subject.id == id)
                .unwrap_or(true)
        })
        .map(|(student, subject)| {
            let progress = snapshot.subject_progress_for(student, subject);
            let mut row = student_json(student, &batches);
            if let (serde_json::Value::Object(dst), serde_json::Value::Object(src)) =
                (&mut row, progress_json(subject, &progress))
            {
                dst.extend(src);
            }
            row
        })
        .collect();

    Ok(json!({ "students": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "faculty.subjects" => Some(with_db(state, req, |conn| faculty_subjects(conn, req))),
        "faculty.students" => Some(with_db(state, req, |conn| faculty_students(conn, req))),
        _ => None,
    }
}
