use crate::ipc::access::{
    batch_in_class, load_subject, require_role, resolve_class, staff_role,
    subject_in_class, STAFF,
};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::views::subject_json;
use crate::ipc::helpers::{get_optional_str, get_required_bool, get_required_str, with_db};
use crate::ipc::types::{AppState, Request, Role};
use crate::progress::SubjectKind;
use crate::roster::SubjectRow;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct FacultyLink {
    faculty_id: String,
    batch_id: Option<String>,
}

/// Accepts either `faculty: [{ facultyId, batchId? }]` or the shorthand
/// `facultyIds: [id, ...]` (unscoped).
fn parse_faculty_links(params: &serde_json::Value) -> Result<Vec<FacultyLink>, HandlerErr> {
    if let Some(v) = params.get("faculty") {
        let Some(arr) = v.as_array() else {
            return Err(HandlerErr::bad_params("faculty must be an array"));
        };
        let mut out = Vec::with_capacity(arr.len());
        for item in arr {
            out.push(FacultyLink {
                faculty_id: get_required_str(item, "facultyId")?,
                batch_id: get_optional_str(item, "batchId")?,
            });
        }
        return Ok(out);
    }
    if let Some(v) = params.get("facultyIds") {
        let Some(arr) = v.as_array() else {
            return Err(HandlerErr::bad_params("facultyIds must be an array"));
        };
        let mut out = Vec::with_capacity(arr.len());
        for item in arr {
            let Some(id) = item.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                return Err(HandlerErr::bad_params("facultyIds must contain strings"));
            };
            out.push(FacultyLink {
                faculty_id: id.to_string(),
                batch_id: None,
            });
        }
        return Ok(out);
    }
    Ok(Vec::new())
}

fn subjects_assign(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    let name = get_required_str(&req.params, "name")?;
    let code = get_required_str(&req.params, "code")?;
    let raw_type = get_required_str(&req.params, "type")?;
    let Some(kind) = SubjectKind::parse(&raw_type) else {
        return Err(HandlerErr::bad_params(format!(
            "type must be one of theory, practical, MDM, OE, PE (got {})",
            raw_type
        )));
    };

    let links = parse_faculty_links(&req.params)?;
    for link in &links {
        match staff_role(conn, &link.faculty_id)? {
            None => {
                return Err(HandlerErr::bad_params(format!(
                    "faculty {} not found",
                    link.faculty_id
                )))
            }
            Some(Role::Director) => {
                return Err(HandlerErr::bad_params("directors cannot teach subjects"))
            }
            Some(_) => {}
        }
        if let Some(batch_id) = link.batch_id.as_deref() {
            if kind.is_elective() {
                return Err(HandlerErr::bad_params(
                    "elective assignments cannot be batch-scoped",
                ));
            }
            batch_in_class(conn, batch_id, &class_id)?;
        }
    }

    let subject_id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tx.execute(
        "INSERT INTO subjects(id, class_id, name, code, type) VALUES(?, ?, ?, ?, ?)",
        (&subject_id, &class_id, &name, &code, kind.as_str()),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "subjects", e))?;

    let mut assignments = Vec::with_capacity(links.len());
    for link in &links {
        let assignment_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO subject_faculty(id, subject_id, faculty_id, batch_id) VALUES(?, ?, ?, ?)",
            (&assignment_id, &subject_id, &link.faculty_id, &link.batch_id),
        )
        .map_err(|e| HandlerErr::write_failed("db_insert_failed", "subject_faculty", e))?;
        assignments.push(json!({
            "id": assignment_id,
            "facultyId": link.faculty_id,
            "batchId": link.batch_id,
        }));
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        class_id = %class_id,
        subject_id = %subject_id,
        kind = kind.as_str(),
        assignments = assignments.len(),
        "subject created"
    );

    let subject = SubjectRow {
        id: subject_id,
        class_id,
        name,
        code,
        kind,
    };
    Ok(json!({
        "subject": subject_json(&subject),
        "assignments": assignments,
    }))
}

fn subjects_delete(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, &[Role::ClassTeacher])?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    let subject_id = get_required_str(&req.params, "subjectId")?;
    subject_in_class(conn, &subject_id, &class_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let assignments = tx
        .execute("DELETE FROM subject_faculty WHERE subject_id = ?", [&subject_id])
        .map_err(|e| HandlerErr::write_failed("db_delete_failed", "subject_faculty", e))?;
    tx.execute(
        "DELETE FROM faculty_availability WHERE subject_id = ?",
        [&subject_id],
    )
    .map_err(|e| HandlerErr::write_failed("db_delete_failed", "faculty_availability", e))?;
    let submissions = tx
        .execute("DELETE FROM submissions WHERE subject_id = ?", [&subject_id])
        .map_err(|e| HandlerErr::write_failed("db_delete_failed", "submissions", e))?;
    let selections = tx
        .execute(
            "UPDATE elective_selections SET subject_id = NULL, faculty_id = NULL
             WHERE subject_id = ?",
            [&subject_id],
        )
        .map_err(|e| HandlerErr::write_failed("db_update_failed", "elective_selections", e))?;
    tx.execute(
        "DELETE FROM subjects WHERE id = ? AND class_id = ?",
        (&subject_id, &class_id),
    )
    .map_err(|e| HandlerErr::write_failed("db_delete_failed", "subjects", e))?;

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        class_id = %class_id,
        subject_id = %subject_id,
        assignments,
        submissions,
        selections,
        "subject deleted"
    );

    Ok(json!({
        "deleted": subject_id,
        "removedAssignments": assignments,
        "removedSubmissions": submissions,
        "clearedSelections": selections,
    }))
}

fn availability_rows(
    conn: &Connection,
    faculty_id: &str,
    only_available: bool,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut sql = String::from(
        "SELECT s.id, s.class_id, s.name, s.code, s.type, c.name, fa.available, fa.updated_at
         FROM faculty_availability fa
         JOIN subjects s ON s.id = fa.subject_id
         JOIN classes c ON c.id = s.class_id
         WHERE fa.faculty_id = ?",
    );
    if only_available {
        sql.push_str(" AND fa.available = 1");
    }
    sql.push_str(" ORDER BY c.name, s.code");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([faculty_id], |r| {
            let mut v = subject_json(&SubjectRow::from_row(r)?);
            v["className"] = json!(r.get::<_, String>(5)?);
            v["available"] = json!(r.get::<_, i64>(6)? != 0);
            v["updatedAt"] = json!(r.get::<_, Option<String>>(7)?);
            Ok(v)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn availability_get(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let rows = availability_rows(conn, &caller.user_id, false)?;
    Ok(json!({ "facultyId": caller.user_id, "availability": rows }))
}

fn availability_set(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let subject_id = get_required_str(&req.params, "subjectId")?;
    let available = get_required_bool(&req.params, "available")?;
    if load_subject(conn, &subject_id)?.is_none() {
        return Err(HandlerErr::not_found("subject not found"));
    }

    conn.execute(
        "INSERT INTO faculty_availability(faculty_id, subject_id, available, updated_at)
         VALUES(?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(faculty_id, subject_id) DO UPDATE
         SET available = excluded.available, updated_at = excluded.updated_at",
        (&caller.user_id, &subject_id, available as i64),
    )
    .map_err(|e| HandlerErr::write_failed("db_update_failed", "faculty_availability", e))?;

    tracing::debug!(faculty_id = %caller.user_id, subject_id = %subject_id, available, "availability set");
    Ok(json!({
        "facultyId": caller.user_id,
        "subjectId": subject_id,
        "available": available,
    }))
}

fn availability_subjects(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let faculty_id = get_optional_str(&req.params, "facultyId")?
        .unwrap_or_else(|| caller.user_id.clone());
    if staff_role(conn, &faculty_id)?.is_none() {
        return Err(HandlerErr::not_found("faculty not found"));
    }
    let rows = availability_rows(conn, &faculty_id, true)?;
    Ok(json!({ "facultyId": faculty_id, "subjects": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.assign" => Some(with_db(state, req, |conn| subjects_assign(conn, req))),
        "subjects.delete" => Some(with_db(state, req, |conn| subjects_delete(conn, req))),
        "availability.get" => Some(with_db(state, req, |conn| availability_get(conn, req))),
        "availability.set" => Some(with_db(state, req, |conn| availability_set(conn, req))),
        "availability.subjects" => Some(with_db(state, req, |conn| {
            availability_subjects(conn, req)
        })),
        _ => None,
    }
}
