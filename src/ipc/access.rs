use rusqlite::{Connection, OptionalExtension};

use super::error::HandlerErr;
use super::helpers::get_optional_str;
use super::types::{Caller, Request, Role};
use crate::roster::{StudentRow, SubjectRow};

pub const STAFF: &[Role] = &[Role::ClassTeacher, Role::Faculty];

pub fn require_caller(req: &Request) -> Result<&Caller, HandlerErr> {
    req.caller
        .as_ref()
        .ok_or_else(|| HandlerErr::new("unauthenticated", "missing caller identity"))
}

pub fn require_role<'a>(req: &'a Request, allowed: &[Role]) -> Result<&'a Caller, HandlerErr> {
    let caller = require_caller(req)?;
    if !allowed.contains(&caller.role) {
        return Err(HandlerErr::forbidden(format!(
            "role {} may not call {}",
            caller.role.as_str(),
            req.method
        )));
    }
    Ok(caller)
}

pub fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    let found = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn faculty_in_class(conn: &Connection, faculty_id: &str, class_id: &str) -> Result<bool, HandlerErr> {
    let found = conn
        .query_row(
            "SELECT 1 WHERE EXISTS (
               SELECT 1 FROM subject_faculty sf
               JOIN subjects s ON s.id = sf.subject_id
               WHERE s.class_id = ?1 AND sf.faculty_id = ?2
             ) OR EXISTS (
               SELECT 1 FROM elective_selections es
               JOIN students st ON st.id = es.student_id
               WHERE st.class_id = ?1 AND es.faculty_id = ?2
             )",
            (class_id, faculty_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// The class the caller acts on.
///
/// Class teachers always act on the class they own; any `classId` they pass
/// must match it. Other staff name the class explicitly, and faculty must
/// teach in it.
pub fn resolve_class(
    conn: &Connection,
    caller: &Caller,
    params: &serde_json::Value,
) -> Result<String, HandlerErr> {
    let requested = get_optional_str(params, "classId")?;
    match caller.role {
        Role::ClassTeacher => {
            let owned: Option<String> = conn
                .query_row(
                    "SELECT id FROM classes WHERE class_teacher_id = ? ORDER BY rowid LIMIT 1",
                    [&caller.user_id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(owned) = owned else {
                return Err(HandlerErr::not_found("no class is assigned to this class teacher"));
            };
            match requested {
                Some(class_id) if class_id != owned => {
                    Err(HandlerErr::forbidden("class does not belong to the caller"))
                }
                _ => Ok(owned),
            }
        }
        Role::Faculty | Role::Hod | Role::Director => {
            let Some(class_id) = requested else {
                return Err(HandlerErr::bad_params("missing classId"));
            };
            if !class_exists(conn, &class_id)? {
                return Err(HandlerErr::not_found("class not found"));
            }
            if caller.role == Role::Faculty && !faculty_in_class(conn, &caller.user_id, &class_id)? {
                return Err(HandlerErr::forbidden("faculty does not teach in this class"));
            }
            Ok(class_id)
        }
        Role::Student => Err(HandlerErr::forbidden("students cannot act on a class")),
    }
}

pub fn load_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, HandlerErr> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM students WHERE id = ?", StudentRow::COLUMNS),
            [student_id],
            StudentRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Loads a student and checks it belongs to `class_id`.
pub fn student_in_class(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
) -> Result<StudentRow, HandlerErr> {
    let Some(student) = load_student(conn, student_id)? else {
        return Err(HandlerErr::not_found("student not found"));
    };
    if student.class_id != class_id {
        return Err(HandlerErr::forbidden("student is not in the caller's class"));
    }
    Ok(student)
}

pub fn load_subject(conn: &Connection, subject_id: &str) -> Result<Option<SubjectRow>, HandlerErr> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM subjects WHERE id = ?", SubjectRow::COLUMNS),
            [subject_id],
            SubjectRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn subject_in_class(
    conn: &Connection,
    subject_id: &str,
    class_id: &str,
) -> Result<SubjectRow, HandlerErr> {
    let Some(subject) = load_subject(conn, subject_id)? else {
        return Err(HandlerErr::not_found("subject not found"));
    };
    if subject.class_id != class_id {
        return Err(HandlerErr::forbidden("subject is not in the caller's class"));
    }
    Ok(subject)
}

pub fn batch_in_class(conn: &Connection, batch_id: &str, class_id: &str) -> Result<(), HandlerErr> {
    let owner: Option<String> = conn
        .query_row("SELECT class_id FROM batches WHERE id = ?", [batch_id], |r| {
            r.get(0)
        })
        .optional()?;
    match owner {
        None => Err(HandlerErr::bad_params("batch not found")),
        Some(c) if c != class_id => Err(HandlerErr::forbidden("batch is not in the caller's class")),
        Some(_) => Ok(()),
    }
}

/// Looks up a staff user, returning their role.
pub fn staff_role(conn: &Connection, user_id: &str) -> Result<Option<Role>, HandlerErr> {
    let raw: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()?;
    Ok(raw.as_deref().and_then(Role::parse_staff))
}
