use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

use crate::progress::SubmissionKind;

pub const DB_FILE_NAME: &str = "classtrack.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL CHECK(role IN ('class_teacher', 'faculty', 'hod', 'director')),
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            department TEXT,
            year INTEGER,
            semester INTEGER,
            section TEXT,
            class_teacher_id TEXT,
            FOREIGN KEY(class_teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(class_teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            roll_from TEXT,
            roll_to TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            batch_id TEXT,
            name TEXT NOT NULL,
            roll_no TEXT NOT NULL,
            hall_ticket_no TEXT,
            email TEXT,
            password_hash TEXT NOT NULL,
            attendance REAL,
            defaulter INTEGER NOT NULL DEFAULT 0,
            selections_locked INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            UNIQUE(class_id, roll_no)
        )",
        [],
    )?;
    ensure_students_selections_locked(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_batch ON students(batch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            type TEXT NOT NULL CHECK(type IN ('theory', 'practical', 'MDM', 'OE', 'PE')),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_faculty(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            batch_id TEXT,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(faculty_id) REFERENCES users(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_faculty_subject ON subject_faculty(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_faculty_faculty ON subject_faculty(faculty_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS elective_selections(
            student_id TEXT NOT NULL,
            slot TEXT NOT NULL CHECK(slot IN ('MDM', 'OE', 'PE')),
            subject_id TEXT,
            faculty_id TEXT,
            PRIMARY KEY(student_id, slot),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(faculty_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_elective_selections_faculty ON elective_selections(faculty_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submission_types(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    ensure_submission_types_kind(&conn)?;
    seed_submission_types(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            submission_type_id TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(submission_type_id) REFERENCES submission_types(id),
            UNIQUE(student_id, subject_id, submission_type_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_student ON submissions(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_subject ON submissions(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty_availability(
            faculty_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            available INTEGER NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(faculty_id, subject_id),
            FOREIGN KEY(faculty_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_selections_locked(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "selections_locked")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN selections_locked INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_submission_types_kind(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "submission_types", "kind")? {
        conn.execute("ALTER TABLE submission_types ADD COLUMN kind TEXT", [])?;
    }
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_submission_types_kind
         ON submission_types(kind) WHERE kind IS NOT NULL",
        [],
    )?;

    // Older workspaces identified types by display name only. Tag the exact
    // matches so lookups stop depending on the name.
    for kind in [
        SubmissionKind::Ta,
        SubmissionKind::Cie,
        SubmissionKind::Defaulter,
    ] {
        let tagged: i64 = conn.query_row(
            "SELECT COUNT(*) FROM submission_types WHERE kind = ?",
            [kind.as_str()],
            |r| r.get(0),
        )?;
        if tagged > 0 {
            continue;
        }
        conn.execute(
            "UPDATE submission_types SET kind = ?
             WHERE id = (
               SELECT id FROM submission_types
               WHERE kind IS NULL AND name = ?
               ORDER BY rowid LIMIT 1
             )",
            (kind.as_str(), kind.legacy_name()),
        )?;
    }
    Ok(())
}

fn seed_submission_types(conn: &Connection) -> anyhow::Result<()> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM submission_types", [], |r| r.get(0))?;
    if existing > 0 {
        return Ok(());
    }
    for kind in [
        SubmissionKind::Ta,
        SubmissionKind::Cie,
        SubmissionKind::Defaulter,
    ] {
        conn.execute(
            "INSERT INTO submission_types(id, name, kind) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), kind.legacy_name(), kind.as_str()),
        )?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
