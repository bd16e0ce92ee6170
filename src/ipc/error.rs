use serde_json::json;

/// Success envelope: `{ id, success: true, ...payload }`.
pub fn ok(id: &str, payload: serde_json::Value) -> serde_json::Value {
    let mut out = json!({
        "id": id,
        "success": true,
    });
    if let (serde_json::Value::Object(dst), serde_json::Value::Object(src)) = (&mut out, payload) {
        for (k, v) in src {
            if k != "id" && k != "success" {
                dst.insert(k, v);
            }
        }
    }
    out
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut out = json!({
        "id": id,
        "success": false,
        "error": message.into(),
        "code": code,
        "status": http_status(code),
    });
    if let Some(d) = details {
        out["details"] = d;
    }
    out
}

/// HTTP status the gateway answers with for an error code.
pub fn http_status(code: &str) -> u16 {
    match code {
        "bad_params" | "bad_json" => 400,
        "unauthenticated" => 401,
        "forbidden" => 403,
        "not_found" | "not_implemented" => 404,
        "conflict" => 409,
        "no_workspace" => 503,
        _ => 500,
    }
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    /// A failed write, tagged with the table it touched.
    pub fn write_failed(code: &'static str, table: &str, e: rusqlite::Error) -> Self {
        if is_unique_violation(&e) {
            return Self {
                code: "conflict",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            };
        }
        Self {
            code,
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(f, _) => {
            f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_merges_payload_without_overriding_envelope_keys() {
        let out = ok("7", json!({ "students": [], "success": false, "id": "x" }));
        assert_eq!(out["id"], json!("7"));
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["students"], json!([]));
    }

    #[test]
    fn error_codes_carry_gateway_status() {
        let out = HandlerErr::forbidden("nope").response("3");
        assert_eq!(out["success"], json!(false));
        assert_eq!(out["code"], json!("forbidden"));
        assert_eq!(out["status"], json!(403));
        assert_eq!(http_status("db_query_failed"), 500);
        assert_eq!(http_status("no_workspace"), 503);
    }
}
