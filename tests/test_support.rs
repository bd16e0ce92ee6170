#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const HOD: (&str, &str) = ("hod-1", "hod");

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_classtrackd");
        let mut child = Command::new(exe)
            .env_remove("CLASSTRACK_WORKSPACE")
            .env("CLASSTRACK_DEFAULT_PASSWORD", "welcome123")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn classtrackd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    /// Sends one request as `caller` (`(userId, role)`) and returns the raw
    /// response envelope.
    pub fn call(
        &mut self,
        caller: Option<(&str, &str)>,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({ "id": id, "method": method, "params": params });
        if let Some((user_id, role)) = caller {
            payload["caller"] = json!({ "userId": user_id, "role": role });
        }
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(
        &mut self,
        caller: Option<(&str, &str)>,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        let value = self.call(caller, method, params);
        assert_eq!(
            value.get("success").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value
    }

    /// Asserts the call failed with `code` and returns the envelope.
    pub fn fails(
        &mut self,
        caller: Option<(&str, &str)>,
        method: &str,
        params: serde_json::Value,
        code: &str,
    ) -> serde_json::Value {
        let value = self.call(caller, method, params);
        assert_eq!(
            value.get("success").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        assert_eq!(
            value.get("code").and_then(|v| v.as_str()),
            Some(code),
            "{}: {}",
            method,
            value
        );
        value
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_at<'a>(v: &'a serde_json::Value, pointer: &str) -> &'a str {
    v.pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", pointer, v))
}

/// A workspace with one class, its class teacher, and two faculty members.
pub struct Fixture {
    pub sidecar: Sidecar,
    pub workspace: PathBuf,
    pub class_id: String,
    pub teacher_id: String,
    pub faculty: Vec<String>,
}

impl Fixture {
    pub fn new(prefix: &str) -> Self {
        let workspace = temp_dir(prefix);
        let mut sidecar = Sidecar::spawn();
        sidecar.ok(
            None,
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );

        let teacher_id = create_user(&mut sidecar, "Priya Teacher", "priya@example.edu", "class_teacher");
        let faculty = vec![
            create_user(&mut sidecar, "Arun Faculty", "arun@example.edu", "faculty"),
            create_user(&mut sidecar, "Bela Faculty", "bela@example.edu", "faculty"),
        ];
        let class = sidecar.ok(
            Some(HOD),
            "classes.create",
            json!({
                "name": "CSE 3A",
                "department": "CSE",
                "year": 3,
                "semester": 5,
                "section": "A",
                "classTeacherId": teacher_id,
            }),
        );
        let class_id = str_at(&class, "/class/id").to_string();

        Self {
            sidecar,
            workspace,
            class_id,
            teacher_id,
            faculty,
        }
    }

    pub fn as_teacher(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.teacher_id.clone();
        self.sidecar.call(Some((id.as_str(), "class_teacher")), method, params)
    }

    pub fn teacher_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.teacher_id.clone();
        self.sidecar.ok(Some((id.as_str(), "class_teacher")), method, params)
    }

    pub fn teacher_fails(
        &mut self,
        method: &str,
        params: serde_json::Value,
        code: &str,
    ) -> serde_json::Value {
        let id = self.teacher_id.clone();
        self.sidecar
            .fails(Some((id.as_str(), "class_teacher")), method, params, code)
    }

    pub fn as_faculty(&mut self, i: usize, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.faculty[i].clone();
        self.sidecar.call(Some((id.as_str(), "faculty")), method, params)
    }

    pub fn faculty_ok(&mut self, i: usize, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.faculty[i].clone();
        self.sidecar.ok(Some((id.as_str(), "faculty")), method, params)
    }

    pub fn db_path(&self) -> PathBuf {
        self.workspace.join("classtrack.sqlite3")
    }

    /// Creates a subject as the class teacher and returns its id.
    pub fn add_subject(&mut self, name: &str, code: &str, kind: &str, faculty: serde_json::Value) -> String {
        let resp = self.teacher_ok(
            "subjects.assign",
            json!({ "name": name, "code": code, "type": kind, "faculty": faculty }),
        );
        str_at(&resp, "/subject/id").to_string()
    }

    /// Imports students from CSV text as the class teacher; returns their ids
    /// in file order.
    pub fn import(&mut self, csv: &str) -> Vec<String> {
        let resp = self.teacher_ok("students.import", json!({ "csvText": csv }));
        resp["studentIds"]
            .as_array()
            .expect("studentIds")
            .iter()
            .map(|v| v.as_str().expect("id").to_string())
            .collect()
    }
}

pub fn create_user(sidecar: &mut Sidecar, name: &str, email: &str, role: &str) -> String {
    let resp = sidecar.ok(
        Some(HOD),
        "users.create",
        json!({ "name": name, "email": email, "role": role, "password": "pw" }),
    );
    str_at(&resp, "/user/id").to_string()
}
