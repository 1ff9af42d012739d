use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_guides_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Counts use correlated subqueries so a guide with several allocations
    // is not double-counted through joins.
    let mut stmt = match conn.prepare(
        "SELECT
           g.id,
           g.username,
           g.guide_name,
           g.email,
           (SELECT COUNT(*) FROM guide_allocations ga
             WHERE ga.guide_id = g.id AND ga.is_deleted = 0) AS allocation_count,
           (SELECT COUNT(*) FROM student_internships si
             WHERE si.guide_id = g.id AND si.is_deleted = 0) AS student_count
         FROM guides g
         WHERE g.is_deleted = 0
         ORDER BY g.guide_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let username: String = row.get(1)?;
            let guide_name: String = row.get(2)?;
            let email: String = row.get(3)?;
            let allocation_count: i64 = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "username": username,
                "guideName": guide_name,
                "email": email,
                "allocationCount": allocation_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(guides) => ok(&req.id, json!({ "guides": guides })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_guides_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let username = match req.params.get("username").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_lowercase(),
        None => return err(&req.id, "bad_params", "missing username", None),
    };
    let guide_name = match req.params.get("guideName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing guideName", None),
    };
    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing email", None),
    };
    if username.is_empty() || guide_name.is_empty() || email.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "username/guideName/email must not be empty",
            None,
        );
    }

    let taken: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM guides WHERE username = ? AND is_deleted = 0",
            [&username],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "duplicate_username",
            "an active guide already uses that username",
            Some(json!({ "username": username })),
        );
    }

    let guide_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO guides(id, username, guide_name, email) VALUES(?, ?, ?, ?)",
        (&guide_id, &username, &guide_name, &email),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "guides" })),
        );
    }

    ok(
        &req.id,
        json!({ "guideId": guide_id, "username": username }),
    )
}

fn handle_guides_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let guide_id = match req.params.get("guideId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing guideId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("guideName") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.guideName must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "guideName must not be empty", None);
        }
        set_parts.push("guide_name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("email") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.email must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "email must not be empty", None);
        }
        set_parts.push("email = ?".into());
        bind_values.push(Value::Text(s));
    }
    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    let sql = format!(
        "UPDATE guides SET {} WHERE id = ? AND is_deleted = 0",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(guide_id.clone()));

    match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(0) => err(&req.id, "not_found", "guide not found", None),
        Ok(_) => ok(&req.id, json!({ "guideId": guide_id })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "guides" })),
        ),
    }
}

fn handle_guides_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let guide_id = match req.params.get("guideId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing guideId", None),
    };

    match conn.execute(
        "UPDATE guides
         SET is_deleted = 1,
             deleted_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND is_deleted = 0",
        [&guide_id],
    ) {
        Ok(0) => err(&req.id, "not_found", "guide not found", None),
        Ok(_) => ok(&req.id, json!({ "guideId": guide_id })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "guides" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "guides.list" => Some(handle_guides_list(state, req)),
        "guides.create" => Some(handle_guides_create(state, req)),
        "guides.update" => Some(handle_guides_update(state, req)),
        "guides.delete" => Some(handle_guides_delete(state, req)),
        _ => None,
    }
}
