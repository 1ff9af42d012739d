use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const EMAIL_DOMAIN_KEY: &str = "email.domain";
const DEFAULT_EMAIL_DOMAIN: &str = "students.example.edu";

fn handle_email_domain_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let domain = match db::settings_get_json(conn, EMAIL_DOMAIN_KEY) {
        Ok(v) => v
            .and_then(|v| v.get("domain").and_then(|d| d.as_str()).map(String::from))
            .unwrap_or_else(|| DEFAULT_EMAIL_DOMAIN.to_string()),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "domain": domain }))
}

fn handle_email_domain_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let domain = match req.params.get("domain").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_lowercase(),
        None => return err(&req.id, "bad_params", "missing domain", None),
    };
    if domain.is_empty() || !domain.contains('.') {
        return err(&req.id, "bad_params", "domain must look like a hostname", None);
    }

    if let Err(e) = db::settings_set_json(conn, EMAIL_DOMAIN_KEY, &json!({ "domain": domain })) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "domain": domain }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.emailDomain.get" => Some(handle_email_domain_get(state, req)),
        "settings.emailDomain.set" => Some(handle_email_domain_set(state, req)),
        _ => None,
    }
}
