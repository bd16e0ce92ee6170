use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::{err, http_status};

type Handler = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[Handler] = &[
    handlers::core::try_handle,
    handlers::admin::try_handle,
    handlers::class::try_handle,
    handlers::faculty::try_handle,
    handlers::students::try_handle,
    handlers::subjects::try_handle,
    handlers::submissions::try_handle,
];

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    for handler in HANDLERS {
        if let Some(resp) = handler(state, req) {
            return resp;
        }
    }
    err(&req.id, "not_implemented", format!("unknown method {}", req.method), None)
}

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let role = req.caller.as_ref().map(|c| c.role.as_str()).unwrap_or("-");
    tracing::debug!(id = %req.id, method = %req.method, role, "request");

    let resp = dispatch(state, &req);

    if resp.get("success").and_then(|v| v.as_bool()) == Some(false) {
        let code = resp.get("code").and_then(|v| v.as_str()).unwrap_or("");
        let message = resp.get("error").and_then(|v| v.as_str()).unwrap_or("");
        if http_status(code) >= 500 {
            tracing::error!(id = %req.id, method = %req.method, code, message, "request failed");
        } else {
            tracing::warn!(id = %req.id, method = %req.method, code, message, "request rejected");
        }
    }
    resp
}
