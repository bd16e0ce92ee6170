use crate::bundle::{self, MatrixRow};
use crate::ipc::access::{require_role, resolve_class, staff_role, subject_in_class, STAFF};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::views::{batch_names, roster_entry_json, subject_json, user_names};
use crate::ipc::helpers::{get_optional_str, get_required_str, get_roll, with_db};
use crate::ipc::types::{AppState, Request, Role};
use crate::roster::{load_submission_types, roll_in_range, RosterSnapshot};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn class_info_json(conn: &Connection, class_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT
               c.id, c.name, c.department, c.year, c.semester, c.section,
               u.id, u.name, u.email,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id),
               (SELECT COUNT(*) FROM subjects s WHERE s.class_id = c.id),
               (SELECT COUNT(*) FROM batches b WHERE b.class_id = c.id)
             FROM classes c
             LEFT JOIN users u ON u.id = c.class_teacher_id
             WHERE c.id = ?",
            [class_id],
            |r| {
                let teacher_id: Option<String> = r.get(6)?;
                let teacher = match teacher_id {
                    Some(id) => json!({
                        "id": id,
                        "name": r.get::<_, Option<String>>(7)?,
                        "email": r.get::<_, Option<String>>(8)?,
                    }),
                    None => serde_json::Value::Null,
                };
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "department": r.get::<_, Option<String>>(2)?,
                    "year": r.get::<_, Option<i64>>(3)?,
                    "semester": r.get::<_, Option<i64>>(4)?,
                    "section": r.get::<_, Option<String>>(5)?,
                    "classTeacher": teacher,
                    "studentCount": r.get::<_, i64>(9)?,
                    "subjectCount": r.get::<_, i64>(10)?,
                    "batchCount": r.get::<_, i64>(11)?,
                }))
            },
        )
        .optional()?;
    row.ok_or_else(|| HandlerErr::not_found("class not found"))
}

fn batches_json(conn: &Connection, class_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT b.id, b.name, b.roll_from, b.roll_to,
                (SELECT COUNT(*) FROM students s WHERE s.batch_id = b.id)
         FROM batches b
         WHERE b.class_id = ?
         ORDER BY b.name",
    )?;
    let batches = stmt
        .query_map([class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut faculty_stmt = conn.prepare(
        "SELECT sf.subject_id, s.code, sf.faculty_id, u.name
         FROM subject_faculty sf
         JOIN subjects s ON s.id = sf.subject_id
         LEFT JOIN users u ON u.id = sf.faculty_id
         WHERE sf.batch_id = ?
         ORDER BY s.code",
    )?;
    let mut out = Vec::with_capacity(batches.len());
    for (id, name, roll_from, roll_to, student_count) in batches {
        let faculty = faculty_stmt
            .query_map([&id], |r| {
                Ok(json!({
                    "subjectId": r.get::<_, String>(0)?,
                    "subjectCode": r.get::<_, String>(1)?,
                    "facultyId": r.get::<_, String>(2)?,
                    "facultyName": r.get::<_, Option<String>>(3)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        out.push(json!({
            "id": id,
            "name": name,
            "rollFrom": roll_from,
            "rollTo": roll_to,
            "studentCount": student_count,
            "faculty": faculty,
        }));
    }
    Ok(out)
}

/// Full class export: metadata, subjects with their faculty, batches, and the
/// per-student submission matrix.
fn class_data(
    conn: &Connection,
    class_id: &str,
) -> Result<(serde_json::Value, Vec<MatrixRow>), HandlerErr> {
    let class = class_info_json(conn, class_id)?;
    let snapshot = RosterSnapshot::load_class(conn, class_id)?;
    let batches = batch_names(conn)?;
    let users = user_names(conn)?;

    let subjects: Vec<serde_json::Value> = snapshot
        .subjects
        .iter()
        .filter(|s| s.class_id == class_id)
        .map(|s| {
            let mut v = subject_json(s);
            let faculty: Vec<serde_json::Value> = snapshot
                .assignments_for_subject(&s.id)
                .map(|a| {
                    json!({
                        "facultyId": a.faculty_id,
                        "facultyName": users.get(&a.faculty_id),
                        "batchId": a.batch_id,
                    })
                })
                .collect();
            v["faculty"] = json!(faculty);
            v
        })
        .collect();

    let mut matrix: Vec<MatrixRow> = Vec::new();
    let mut students: Vec<serde_json::Value> = Vec::with_capacity(snapshot.students.len());
    for student in &snapshot.students {
        students.push(roster_entry_json(&snapshot, student, &batches, &users, true));
        for subject in snapshot.applicable_subjects(student) {
            let p = snapshot.subject_progress_for(student, subject);
            matrix.push(MatrixRow {
                roll_no: student.roll_no.clone(),
                student_name: student.name.clone(),
                batch: student
                    .batch_id
                    .as_ref()
                    .and_then(|b| batches.get(b).cloned())
                    .unwrap_or_default(),
                defaulter: student.defaulter,
                subject_code: subject.code.clone(),
                subject_name: subject.name.clone(),
                subject_type: subject.kind.as_str().to_string(),
                ta: p.ta.as_str().to_string(),
                cie: p.cie.as_str().to_string(),
                defaulter_work: p.defaulter.as_str().to_string(),
                submission_percentage: p.submission_percentage,
            });
        }
    }

    let types: Vec<serde_json::Value> = load_submission_types(conn)?
        .into_iter()
        .map(|t| json!({ "id": t.id, "name": t.name, "kind": t.kind }))
        .collect();

    let data = json!({
        "class": class,
        "subjects": subjects,
        "batches": batches_json(conn, class_id)?,
        "students": students,
        "submissionTypes": types,
    });
    Ok((data, matrix))
}

fn class_data_get(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, &[Role::ClassTeacher])?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    let (data, _) = class_data(conn, &class_id)?;
    Ok(data)
}

fn class_data_export_bundle(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, &[Role::ClassTeacher])?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    let out_path = PathBuf::from(get_required_str(&req.params, "outPath")?);
    let (data, matrix) = class_data(conn, &class_id)?;
    let summary = bundle::export_class_bundle(&out_path, &class_id, &data, &matrix)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "matrixRows": summary.matrix_rows,
    }))
}

fn class_info(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, &[Role::ClassTeacher])?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    Ok(json!({ "class": class_info_json(conn, &class_id)? }))
}

fn faculties_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_role(req, STAFF)?;
    let mut stmt = conn.prepare(
        "SELECT id, name, email, role
         FROM users
         WHERE role <> 'director'
         ORDER BY name, email",
    )?;
    let faculties = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "role": r.get::<_, String>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "faculties": faculties }))
}

fn students_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    let batch_filter = get_optional_str(&req.params, "batchId")?;
    let with_subjects = req
        .params
        .get("includeSubjects")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let snapshot = RosterSnapshot::load_class(conn, &class_id)?;
    let batches = batch_names(conn)?;
    let users = user_names(conn)?;
    let students: Vec<serde_json::Value> = snapshot
        .students
        .iter()
        .filter(|s| batch_filter.is_none() || s.batch_id == batch_filter)
        .map(|s| roster_entry_json(&snapshot, s, &batches, &users, with_subjects))
        .collect();

    Ok(json!({ "classId": class_id, "students": students }))
}

fn batches_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, STAFF)?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    Ok(json!({ "classId": class_id, "batches": batches_json(conn, &class_id)? }))
}

struct BatchLink {
    subject_id: String,
    faculty_id: String,
}

fn parse_batch_links(params: &serde_json::Value) -> Result<Vec<BatchLink>, HandlerErr> {
    let Some(raw) = params.get("links") else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("links must be an array"));
    };
    items
        .iter()
        .map(|item| {
            Ok(BatchLink {
                subject_id: get_required_str(item, "subjectId")?,
                faculty_id: get_required_str(item, "facultyId")?,
            })
        })
        .collect()
}

fn batches_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_role(req, &[Role::ClassTeacher, Role::Hod])?;
    let class_id = resolve_class(conn, caller, &req.params)?;
    let name = get_required_str(&req.params, "name")?;
    let roll_from = get_roll(&req.params, "rollFrom")?;
    let roll_to = get_roll(&req.params, "rollTo")?;
    let links = parse_batch_links(&req.params)?;

    for link in &links {
        let subject = subject_in_class(conn, &link.subject_id, &class_id)?;
        if subject.kind.is_elective() {
            return Err(HandlerErr::bad_params(
                "elective subjects are graded per selection, not per batch",
            ));
        }
        match staff_role(conn, &link.faculty_id)? {
            Some(Role::Director) => {
                return Err(HandlerErr::bad_params("directors cannot be linked to a batch"))
            }
            Some(_) => {}
            None => return Err(HandlerErr::not_found("faculty not found")),
        }
    }

    let in_range: Vec<String> = {
        let mut stmt = conn.prepare("SELECT id, roll_no FROM students WHERE class_id = ?")?;
        let rows = stmt
            .query_map([&class_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .filter(|(_, roll)| roll_in_range(roll, &roll_from, &roll_to))
            .map(|(id, _)| id)
            .collect()
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let batch_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO batches(id, class_id, name, roll_from, roll_to) VALUES(?, ?, ?, ?, ?)",
        (&batch_id, &class_id, &name, &roll_from, &roll_to),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "batches", e))?;

    for student_id in &in_range {
        tx.execute(
            "UPDATE students
             SET batch_id = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            (&batch_id, student_id),
        )
        .map_err(|e| HandlerErr::write_failed("db_update_failed", "students", e))?;
    }

    for link in &links {
        tx.execute(
            "INSERT INTO subject_faculty(id, subject_id, faculty_id, batch_id) VALUES(?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &link.subject_id,
                &link.faculty_id,
                &batch_id,
            ),
        )
        .map_err(|e| HandlerErr::write_failed("db_insert_failed", "subject_faculty", e))?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        class_id = %class_id,
        batch = %name,
        moved = in_range.len(),
        "batch created"
    );

    Ok(json!({
        "batch": {
            "id": batch_id,
            "classId": class_id,
            "name": name,
            "rollFrom": roll_from,
            "rollTo": roll_to,
        },
        "movedStudents": in_range.len(),
        "linkedFaculty": links.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classData.get" => Some(with_db(state, req, |conn| class_data_get(conn, req))),
        "classData.exportBundle" => Some(with_db(state, req, |conn| {
            class_data_export_bundle(conn, req)
        })),
        "class.info" => Some(with_db(state, req, |conn| class_info(conn, req))),
        "faculties.list" => Some(with_db(state, req, |conn| faculties_list(conn, req))),
        "students.list" => Some(with_db(state, req, |conn| students_list(conn, req))),
        "batches.list" => Some(with_db(state, req, |conn| batches_list(conn, req))),
        "batches.create" => Some(with_db(state, req, |conn| batches_create(conn, req))),
        _ => None,
    }
}
