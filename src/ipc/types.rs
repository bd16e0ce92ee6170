use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Identity forwarded by the gateway after it validated the session.
    #[serde(default)]
    pub caller: Option<Caller>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ClassTeacher,
    Faculty,
    Hod,
    Director,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::ClassTeacher => "class_teacher",
            Role::Faculty => "faculty",
            Role::Hod => "hod",
            Role::Director => "director",
            Role::Student => "student",
        }
    }

    /// Roles that live in the `users` table.
    pub fn parse_staff(raw: &str) -> Option<Self> {
        match raw.trim() {
            "class_teacher" => Some(Role::ClassTeacher),
            "faculty" => Some(Role::Faculty),
            "hod" => Some(Role::Hod),
            "director" => Some(Role::Director),
            _ => None,
        }
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Config,
}
