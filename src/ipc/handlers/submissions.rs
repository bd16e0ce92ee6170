use crate::ipc::access::{
    load_subject, require_caller, require_role, resolve_class, student_in_class, STAFF,
};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::views::progress_json;
use crate::ipc::helpers::{get_required_str, with_db};
use crate::ipc::types::{AppState, Request, Role};
use crate::progress::{required_items, SubmissionKind, STATUS_COMPLETED};
use crate::roster::{load_submission_types, RosterSnapshot};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const STATUS_PENDING: &str = "pending";

fn submission_types_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_caller(req)?;
    let types: Vec<serde_json::Value> = load_submission_types(conn)?
        .into_iter()
        .map(|t| json!({ "id": t.id, "name": t.name, "kind": t.kind }))
        .collect();
    Ok(json!({ "submissionTypes": types }))
}

/// Sets one required item for a (student, subject) pair and answers with the
/// recomputed progress row.
fn submissions_update(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let subject_id = get_required_str(&req.params, "subjectId")?;
    let raw_kind = get_required_str(&req.params, "kind")?;
    let status = get_required_str(&req.params, "status")?;

    let Some(kind) = SubmissionKind::parse(&raw_kind) else {
        return Err(HandlerErr::bad_params(format!(
            "kind must be one of ta, cie, defaulter (got {})",
            raw_kind
        )));
    };
    if status != STATUS_COMPLETED && status != STATUS_PENDING {
        return Err(HandlerErr::bad_params(format!(
            "status must be {} or {}",
            STATUS_COMPLETED, STATUS_PENDING
        )));
    }

    student_in_class(conn, &student_id, &class_id)?;
    if load_subject(conn, &subject_id)?.is_none() {
        return Err(HandlerErr::not_found("subject not found"));
    }

    let snapshot = RosterSnapshot::load_class(conn, &class_id)?;
    let Some(student) = snapshot.student(&student_id) else {
        return Err(HandlerErr::not_found("student not found"));
    };
    let Some(subject) = snapshot
        .applicable_subjects(student)
        .into_iter()
        .find(|s| s.id == subject_id)
    else {
        return Err(HandlerErr::bad_params("student does not take this subject"));
    };
    if caller.role == Role::Faculty && !snapshot.faculty_teaches(&caller.user_id, student, subject) {
        return Err(HandlerErr::forbidden("faculty does not grade this student for the subject"));
    }
    if !required_items(subject.kind, student.defaulter).contains(&kind) {
        return Err(HandlerErr::bad_params(format!(
            "{} is not required for this subject and student",
            kind.as_str()
        )));
    }
    let Some(type_id) = snapshot.types.get(kind) else {
        return Err(HandlerErr::not_found(format!(
            "no submission type is configured for {}",
            kind.as_str()
        )));
    };

    conn.execute(
        "INSERT INTO submissions(id, student_id, subject_id, submission_type_id, status, updated_at)
         VALUES(?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(student_id, subject_id, submission_type_id) DO UPDATE
         SET status = excluded.status, updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &subject_id,
            type_id,
            &status,
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_update_failed", "submissions", e))?;

    tracing::debug!(
        student_id = %student_id,
        subject_id = %subject_id,
        kind = kind.as_str(),
        status = %status,
        "submission updated"
    );

    let refreshed = RosterSnapshot::load_class(conn, &class_id)?;
    let (Some(student), Some(subject)) = (refreshed.student(&student_id), refreshed.subject(&subject_id))
    else {
        return Err(HandlerErr::not_found("student not found"));
    };
    let progress = refreshed.subject_progress_for(student, subject);
    Ok(json!({
        "studentId": student_id,
        "progress": progress_json(subject, &progress),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissionTypes.list" => Some(with_db(state, req, |conn| {
            submission_types_list(conn, req)
        })),
        "submissions.update" => Some(with_db(state, req, |conn| submissions_update(conn, req))),
        _ => None,
    }
}
