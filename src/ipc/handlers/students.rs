use crate::import::{parse_student_sheet, TakenKeys};
use crate::ipc::access::{
    batch_in_class, load_student, require_role, resolve_class, student_in_class, STAFF,
};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::views::{batch_names, electives_json, student_json, user_names};
use crate::ipc::helpers::{get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request, Role};
use crate::password::hash_password;
use crate::progress::{attendance_in_range, is_defaulter, ElectiveSlot};
use crate::roster::{RosterSnapshot, StudentRow};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// A resolved elective choice; `None` clears the slot.
type ElectiveChoice = (ElectiveSlot, Option<(String, Option<String>)>);

fn student_detail_json(conn: &Connection, student: &StudentRow) -> Result<serde_json::Value, HandlerErr> {
    let snapshot = RosterSnapshot::load_class(conn, &student.class_id)?;
    let batches = batch_names(conn)?;
    let users = user_names(conn)?;
    let mut v = student_json(student, &batches);
    v["electives"] = electives_json(&snapshot, student, &users);
    if let Some(current) = snapshot.student(&student.id) {
        let progress = snapshot.progress_for(current);
        v["submissionPercentage"] = json!(progress.submission_percentage);
    }
    Ok(v)
}

/// Validates one elective choice against the subjects offered to the class.
///
/// When no faculty is named and exactly one faculty offers the subject, that
/// faculty is assigned.
fn resolve_elective_choice(
    conn: &Connection,
    class_id: &str,
    slot: ElectiveSlot,
    raw: &serde_json::Value,
) -> Result<ElectiveChoice, HandlerErr> {
    if raw.is_null() {
        return Ok((slot, None));
    }
    let subject_id = get_required_str(raw, "subjectId")?;
    let subject_row: Option<(String, String)> = conn
        .query_row(
            "SELECT class_id, type FROM subjects WHERE id = ?",
            [&subject_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((subject_class, subject_type)) = subject_row else {
        return Err(HandlerErr::bad_params(format!(
            "{} subject not found",
            slot.as_str()
        )));
    };
    if subject_class != class_id {
        return Err(HandlerErr::forbidden(format!(
            "{} subject is not offered to this class",
            slot.as_str()
        )));
    }
    if subject_type != slot.as_str() {
        return Err(HandlerErr::bad_params(format!(
            "subject of type {} cannot fill the {} slot",
            subject_type,
            slot.as_str()
        )));
    }

    let mut stmt = conn.prepare(
        "SELECT DISTINCT faculty_id FROM subject_faculty WHERE subject_id = ? ORDER BY faculty_id",
    )?;
    let offering = stmt
        .query_map([&subject_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let faculty_id = match get_optional_str(raw, "facultyId")? {
        Some(f) => {
            if !offering.contains(&f) {
                return Err(HandlerErr::bad_params(format!(
                    "faculty does not offer the selected {} subject",
                    slot.as_str()
                )));
            }
            Some(f)
        }
        None if offering.len() == 1 => offering.into_iter().next(),
        None => None,
    };
    Ok((slot, Some((subject_id, faculty_id))))
}

fn parse_electives(
    conn: &Connection,
    class_id: &str,
    raw: Option<&serde_json::Value>,
) -> Result<Vec<ElectiveChoice>, HandlerErr> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let Some(obj) = raw.as_object() else {
        return Err(HandlerErr::bad_params("electives must be an object"));
    };
    let mut out = Vec::new();
    for (key, value) in obj {
        let Some(slot) = ElectiveSlot::parse(key) else {
            return Err(HandlerErr::bad_params(format!(
                "unknown elective slot {}",
                key
            )));
        };
        out.push(resolve_elective_choice(conn, class_id, slot, value)?);
    }
    Ok(out)
}

fn write_electives(
    conn: &Connection,
    student_id: &str,
    choices: &[ElectiveChoice],
) -> Result<(), HandlerErr> {
    for (slot, choice) in choices {
        let (subject_id, faculty_id) = match choice {
            Some((s, f)) => (Some(s.as_str()), f.as_deref()),
            None => (None, None),
        };
        conn.execute(
            "INSERT INTO elective_selections(student_id, slot, subject_id, faculty_id)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id, slot) DO UPDATE
             SET subject_id = excluded.subject_id, faculty_id = excluded.faculty_id",
            (student_id, slot.as_str(), subject_id, faculty_id),
        )
        .map_err(|e| HandlerErr::write_failed("db_update_failed", "elective_selections", e))?;
    }
    Ok(())
}

fn optional_text_patch(
    patch: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    column: &str,
    set_parts: &mut Vec<String>,
    bind_values: &mut Vec<Value>,
) -> Result<(), HandlerErr> {
    let Some(v) = patch.get(key) else {
        return Ok(());
    };
    if v.is_null() {
        set_parts.push(format!("{} = ?", column));
        bind_values.push(Value::Null);
        return Ok(());
    }
    let Some(s) = v.as_str() else {
        return Err(HandlerErr::bad_params(format!(
            "patch.{} must be a string or null",
            key
        )));
    };
    let t = s.trim().to_string();
    set_parts.push(format!("{} = ?", column));
    bind_values.push(if t.is_empty() {
        Value::Null
    } else {
        Value::Text(t)
    });
    Ok(())
}

fn required_text_patch(
    patch: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    column: &str,
    set_parts: &mut Vec<String>,
    bind_values: &mut Vec<Value>,
) -> Result<(), HandlerErr> {
    let Some(v) = patch.get(key) else {
        return Ok(());
    };
    let s = match v {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => {
            return Err(HandlerErr::bad_params(format!(
                "patch.{} must be a string",
                key
            )))
        }
    };
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    set_parts.push(format!("{} = ?", column));
    bind_values.push(Value::Text(s));
    Ok(())
}

fn students_update(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    student_in_class(conn, &student_id, &class_id)?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing/invalid patch"));
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    required_text_patch(patch, "name", "name", &mut set_parts, &mut bind_values)?;
    required_text_patch(patch, "rollNo", "roll_no", &mut set_parts, &mut bind_values)?;
    optional_text_patch(
        patch,
        "hallTicketNo",
        "hall_ticket_no",
        &mut set_parts,
        &mut bind_values,
    )?;
    optional_text_patch(patch, "email", "email", &mut set_parts, &mut bind_values)?;

    if let Some(v) = patch.get("batchId") {
        if let Some(b) = v.as_str() {
            batch_in_class(conn, b, &class_id)?;
            set_parts.push("batch_id = ?".into());
            bind_values.push(Value::Text(b.to_string()));
        } else if v.is_null() {
            set_parts.push("batch_id = ?".into());
            bind_values.push(Value::Null);
        } else {
            return Err(HandlerErr::bad_params("patch.batchId must be a string or null"));
        }
    }

    let explicit_defaulter = match patch.get("defaulter") {
        None => None,
        Some(v) => Some(
            v.as_bool()
                .ok_or_else(|| HandlerErr::bad_params("patch.defaulter must be a boolean"))?,
        ),
    };
    if let Some(v) = patch.get("attendance") {
        if v.is_null() {
            set_parts.push("attendance = ?".into());
            bind_values.push(Value::Null);
        } else {
            let Some(pct) = v.as_f64() else {
                return Err(HandlerErr::bad_params("patch.attendance must be a number or null"));
            };
            if !attendance_in_range(pct) {
                return Err(HandlerErr::bad_params("attendance must be between 0 and 100"));
            }
            set_parts.push("attendance = ?".into());
            bind_values.push(Value::Real(pct));
            if explicit_defaulter.is_none() {
                set_parts.push("defaulter = ?".into());
                bind_values.push(Value::Integer(is_defaulter(pct) as i64));
            }
        }
    }
    if let Some(d) = explicit_defaulter {
        set_parts.push("defaulter = ?".into());
        bind_values.push(Value::Integer(d as i64));
    }

    let electives = parse_electives(conn, &class_id, patch.get("electives"))?;

    if set_parts.is_empty() && electives.is_empty() {
        return Err(HandlerErr::bad_params("patch must include at least one field"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    if !set_parts.is_empty() {
        set_parts.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".into());
        let sql = format!(
            "UPDATE students SET {} WHERE id = ? AND class_id = ?",
            set_parts.join(", ")
        );
        bind_values.push(Value::Text(student_id.clone()));
        bind_values.push(Value::Text(class_id.clone()));
        let changed = tx
            .execute(&sql, params_from_iter(bind_values))
            .map_err(|e| HandlerErr::write_failed("db_update_failed", "students", e))?;
        if changed == 0 {
            return Err(HandlerErr::not_found("student not found"));
        }
    }
    write_electives(&tx, &student_id, &electives)?;

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let Some(updated) = load_student(conn, &student_id)? else {
        return Err(HandlerErr::not_found("student not found"));
    };
    Ok(json!({ "student": student_detail_json(conn, &updated)? }))
}

fn students_delete(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    student_in_class(conn, &student_id, &class_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tx.execute("DELETE FROM submissions WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::write_failed("db_delete_failed", "submissions", e))?;
    tx.execute(
        "DELETE FROM elective_selections WHERE student_id = ?",
        [&student_id],
    )
    .map_err(|e| HandlerErr::write_failed("db_delete_failed", "elective_selections", e))?;
    let changed = tx
        .execute(
            "DELETE FROM students WHERE id = ? AND class_id = ?",
            (&student_id, &class_id),
        )
        .map_err(|e| HandlerErr::write_failed("db_delete_failed", "students", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(class_id = %class_id, student_id = %student_id, "student deleted");
    Ok(json!({ "deleted": student_id }))
}

fn students_import(
    conn: &Connection,
    req: &Request,
    default_password: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let class_id = resolve_class(conn, caller, &req.params)?;

    let text = match (
        get_optional_str(&req.params, "csvText")?,
        get_optional_str(&req.params, "csvPath")?,
    ) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
            HandlerErr::bad_params(format!("failed to read {}: {}", path, e))
        })?,
        (None, None) => return Err(HandlerErr::bad_params("missing csvText or csvPath")),
    };
    let sheet = parse_student_sheet(&text).map_err(|e| HandlerErr::bad_params(format!("{e:#}")))?;

    let mut taken = TakenKeys::default();
    {
        let mut stmt =
            conn.prepare("SELECT roll_no, hall_ticket_no FROM students WHERE class_id = ?")?;
        let existing = stmt
            .query_map([&class_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (roll, ht) in &existing {
            taken.insert(roll, ht.as_deref());
        }
    }

    let batches: HashMap<String, String> = {
        let mut stmt = conn.prepare("SELECT name, id FROM batches WHERE class_id = ?")?;
        let rows = stmt
            .query_map([&class_id], |r| {
                Ok((r.get::<_, String>(0)?.to_ascii_uppercase(), r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut imported: Vec<String> = Vec::new();
    let mut skipped = 0usize;
    for row in &sheet.rows {
        if !taken.claim(row) {
            skipped += 1;
            continue;
        }
        let student_id = Uuid::new_v4().to_string();
        let batch_id = row
            .batch
            .as_ref()
            .and_then(|b| batches.get(&b.to_ascii_uppercase()));
        tx.execute(
            "INSERT INTO students(
               id, class_id, batch_id, name, roll_no, hall_ticket_no, email,
               password_hash, attendance, defaulter, selections_locked, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (
                &student_id,
                &class_id,
                batch_id,
                &row.name,
                &row.roll_no,
                &row.hall_ticket_no,
                &row.email,
                hash_password(default_password),
                row.attendance,
                row.defaulter() as i64,
            ),
        )
        .map_err(|e| HandlerErr::write_failed("db_insert_failed", "students", e))?;
        imported.push(student_id);
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        class_id = %class_id,
        imported = imported.len(),
        skipped,
        invalid = sheet.invalid,
        "students imported"
    );

    Ok(json!({
        "imported": imported.len(),
        "skipped": skipped,
        "invalid": sheet.invalid,
        "studentIds": imported,
    }))
}

fn electives_get(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let student = student_in_class(conn, &student_id, &class_id)?;
    electives_view(conn, &student)
}

/// Offered electives per slot (with the faculty offering each) plus the
/// student's current selections.
fn electives_view(conn: &Connection, student: &StudentRow) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.code, s.type, sf.faculty_id, u.name
         FROM subjects s
         LEFT JOIN subject_faculty sf ON sf.subject_id = s.id
         LEFT JOIN users u ON u.id = sf.faculty_id
         WHERE s.class_id = ? AND s.type IN ('MDM', 'OE', 'PE')
         ORDER BY s.type, s.code, u.name",
    )?;
    let rows = stmt
        .query_map([&student.class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut offered: serde_json::Map<String, serde_json::Value> = ElectiveSlot::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), json!([])))
        .collect();
    for (id, name, code, kind, faculty_id, faculty_name) in rows {
        let Some(list) = offered.get_mut(&kind).and_then(|v| v.as_array_mut()) else {
            continue;
        };
        let idx = match list.iter().position(|e| e["id"].as_str() == Some(id.as_str())) {
            Some(i) => i,
            None => {
                list.push(json!({ "id": id, "name": name, "code": code, "faculty": [] }));
                list.len() - 1
            }
        };
        if let Some(fid) = faculty_id {
            if let Some(fac) = list[idx]["faculty"].as_array_mut() {
                fac.push(json!({ "id": fid, "name": faculty_name }));
            }
        }
    }

    let snapshot = RosterSnapshot::load_class(conn, &student.class_id)?;
    let users = user_names(conn)?;
    Ok(json!({
        "studentId": student.id,
        "locked": student.selections_locked,
        "offered": offered,
        "selections": electives_json(&snapshot, student, &users),
    }))
}

fn electives_unlock(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    student_in_class(conn, &student_id, &class_id)?;
    conn.execute(
        "UPDATE students
         SET selections_locked = 0, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        [&student_id],
    )
    .map_err(|e| HandlerErr::write_failed("db_update_failed", "students", e))?;
    Ok(json!({ "studentId": student_id, "locked": false }))
}

/// A student submits their own elective picks; selections lock afterwards
/// until staff unlock them.
fn electives_select(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, &[Role::Student])?;
    let Some(student) = load_student(conn, &caller.user_id)? else {
        return Err(HandlerErr::not_found("student not found"));
    };
    if student.selections_locked {
        return Err(HandlerErr::forbidden(
            "selections are locked; ask a class teacher to unlock them",
        ));
    }
    let choices = parse_electives(conn, &student.class_id, req.params.get("selections"))?;
    if choices.is_empty() {
        return Err(HandlerErr::bad_params("missing selections"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    write_electives(&tx, &student.id, &choices)?;
    tx.execute(
        "UPDATE students
         SET selections_locked = 1, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        [&student.id],
    )
    .map_err(|e| HandlerErr::write_failed("db_update_failed", "students", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let Some(updated) = load_student(conn, &student.id)? else {
        return Err(HandlerErr::not_found("student not found"));
    };
    electives_view(conn, &updated)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.update" => Some(with_db(state, req, |conn| students_update(conn, req))),
        "students.delete" => Some(with_db(state, req, |conn| students_delete(conn, req))),
        "students.import" => {
            let password = state.config.default_password.clone();
            Some(with_db(state, req, |conn| {
                students_import(conn, req, &password)
            }))
        }
        "electives.get" => Some(with_db(state, req, |conn| electives_get(conn, req))),
        "electives.unlock" => Some(with_db(state, req, |conn| electives_unlock(conn, req))),
        "electives.select" => Some(with_db(state, req, |conn| electives_select(conn, req))),
        _ => None,
    }
}
