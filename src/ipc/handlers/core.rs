use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::progress::{SubmissionKind, SubmissionTypeIds};
use crate::roster::load_submission_types;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

/// Class count and, per submission kind, whether a configured type backs it.
fn workspace_summary(conn: &Connection) -> rusqlite::Result<serde_json::Value> {
    let classes: i64 = conn.query_row("SELECT COUNT(*) FROM classes", [], |r| r.get(0))?;
    let ids = SubmissionTypeIds::resolve(&load_submission_types(conn)?);
    let resolved: serde_json::Map<String, serde_json::Value> = [
        SubmissionKind::Ta,
        SubmissionKind::Cie,
        SubmissionKind::Defaulter,
    ]
    .into_iter()
    .map(|kind| (kind.as_str().to_string(), json!(ids.get(kind).is_some())))
    .collect();
    Ok(json!({ "classes": classes, "submissionTypes": resolved }))
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace_path = state
        .workspace
        .as_ref()
        .map(|p| p.to_string_lossy().to_string());
    let summary = match state.db.as_ref().map(workspace_summary).transpose() {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": workspace_path,
            "workspace": summary,
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            tracing::info!(workspace = %path.display(), "workspace selected");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
