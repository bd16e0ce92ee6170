use crate::db::now_timestamp;
use crate::ipc::access::{require_role, staff_role};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_i64, get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request, Role};
use crate::password::hash_password;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ADMINS: &[Role] = &[Role::Hod, Role::Director];

fn users_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_role(req, ADMINS)?;
    let params = &req.params;
    let name = get_required_str(params, "name")?;
    let email = get_required_str(params, "email")?.to_ascii_lowercase();
    let raw_role = get_required_str(params, "role")?;
    let Some(role) = Role::parse_staff(&raw_role) else {
        return Err(HandlerErr::bad_params(
            "role must be one of class_teacher, faculty, hod, director",
        ));
    };
    let password = get_required_str(params, "password")?;

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, name, email, role, password_hash, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &name,
            &email,
            role.as_str(),
            hash_password(&password),
            now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "users", e))?;

    Ok(json!({
        "user": {
            "id": user_id,
            "name": name,
            "email": email,
            "role": role.as_str(),
        }
    }))
}

fn classes_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_role(req, ADMINS)?;
    let params = &req.params;
    let name = get_required_str(params, "name")?;
    let department = get_optional_str(params, "department")?;
    let section = get_optional_str(params, "section")?;
    let year = get_optional_i64(params, "year")?;
    let semester = get_optional_i64(params, "semester")?;
    let class_teacher_id = get_optional_str(params, "classTeacherId")?;

    if let Some(teacher_id) = class_teacher_id.as_deref() {
        match staff_role(conn, teacher_id)? {
            Some(Role::ClassTeacher) => {
                let owned: Option<String> = conn
                    .query_row(
                        "SELECT name FROM classes WHERE class_teacher_id = ? LIMIT 1",
                        [teacher_id],
                        |r| r.get(0),
                    )
                    .optional()?;
                if let Some(existing) = owned {
                    return Err(HandlerErr::new(
                        "conflict",
                        format!("class teacher already owns class {}", existing),
                    ));
                }
            }
            Some(_) => {
                return Err(HandlerErr::bad_params(
                    "classTeacherId must refer to a class_teacher user",
                ))
            }
            None => return Err(HandlerErr::not_found("class teacher not found")),
        }
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, department, year, semester, section, class_teacher_id)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &class_id,
            &name,
            &department,
            year,
            semester,
            &section,
            &class_teacher_id,
        ),
    )
    .map_err(|e| HandlerErr::write_failed("db_insert_failed", "classes", e))?;

    Ok(json!({
        "class": {
            "id": class_id,
            "name": name,
            "department": department,
            "year": year,
            "semester": semester,
            "section": section,
            "classTeacherId": class_teacher_id,
        }
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(with_db(state, req, |conn| users_create(conn, req))),
        "classes.create" => Some(with_db(state, req, |conn| classes_create(conn, req))),
        _ => None,
    }
}
