use crate::allocation;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::range;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const DEFAULT_EMAIL_DOMAIN: &str = "students.example.edu";

fn email_domain(conn: &rusqlite::Connection) -> String {
    db::settings_get_json(conn, "email.domain")
        .ok()
        .flatten()
        .and_then(|v| v.get("domain").and_then(|d| d.as_str()).map(String::from))
        .unwrap_or_else(|| DEFAULT_EMAIL_DOMAIN.to_string())
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let raw_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let parts = match range::parse_student_id(&raw_id) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "bad_params", e.message(), None),
    };
    let student_id = range::format_student_id(&parts.cohort_year, &parts.department, parts.sequence);

    let student_name = match req.params.get("studentName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing studentName", None),
    };
    if student_name.is_empty() {
        return err(&req.id, "bad_params", "studentName must not be empty", None);
    }

    let Some(semester) = req.params.get("semester").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing semester", None);
    };
    if !allocation::is_allowed_semester(semester) {
        return err(
            &req.id,
            "invalid_semester",
            format!("semester must be one of {:?}", allocation::ALLOWED_SEMESTERS),
            Some(json!({ "semester": semester })),
        );
    }

    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("{}@{}", student_id, email_domain(conn)));

    let existing: Option<(String, i64)> = match conn
        .query_row(
            "SELECT id, is_deleted FROM students WHERE student_id = ? AND semester = ?",
            (&student_id, semester),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let student_ref = match existing {
        Some((_, 0)) => {
            return err(
                &req.id,
                "duplicate_student",
                "a student with that id already exists for the semester",
                Some(json!({ "studentId": student_id, "semester": semester })),
            );
        }
        Some((row_id, _)) => {
            // Re-provisioning a removed student revives the row; the
            // internship restarts unassigned.
            if let Err(e) = tx.execute(
                "UPDATE students
                 SET student_name = ?, email = ?, is_deleted = 0, deleted_at = NULL,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
                 WHERE id = ?",
                (&student_name, &email, &row_id),
            ) {
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "students" })),
                );
            }
            if let Err(e) = tx.execute(
                "UPDATE student_internships
                 SET guide_id = NULL, guide_manually_assigned = 0,
                     is_deleted = 0, deleted_at = NULL,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
                 WHERE student_ref = ? AND semester = ?",
                (&row_id, semester),
            ) {
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "student_internships" })),
                );
            }
            row_id
        }
        None => {
            let row_id = Uuid::new_v4().to_string();
            if let Err(e) = tx.execute(
                "INSERT INTO students(id, student_id, student_name, email, semester, updated_at)
                 VALUES(?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
                (&row_id, &student_id, &student_name, &email, semester),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "students" })),
                );
            }
            if let Err(e) = tx.execute(
                "INSERT INTO student_internships(id, student_ref, guide_id, semester)
                 VALUES(?, ?, NULL, ?)",
                (Uuid::new_v4().to_string(), &row_id, semester),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "student_internships" })),
                );
            }
            row_id
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    // Auto-assignment is an explicit provisioning step, not a save hook.
    let assigned_guide =
        match allocation::try_auto_assign(conn, &student_ref, &student_id, semester) {
            Ok(v) => v,
            Err(e) => return crate::ipc::error::engine_err(&req.id, e),
        };

    ok(
        &req.id,
        json!({
            "id": student_ref,
            "studentId": student_id,
            "studentName": student_name,
            "email": email,
            "semester": semester,
            "guideId": assigned_guide,
        }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let semester = req.params.get("semester").and_then(|v| v.as_i64());

    let mut sql = String::from(
        "SELECT s.id, s.student_id, s.student_name, s.email, s.semester,
                si.guide_id, g.guide_name, COALESCE(si.guide_manually_assigned, 0)
         FROM students s
         LEFT JOIN student_internships si
           ON si.student_ref = s.id AND si.semester = s.semester AND si.is_deleted = 0
         LEFT JOIN guides g ON g.id = si.guide_id AND g.is_deleted = 0
         WHERE s.is_deleted = 0",
    );
    let mut params: Vec<Value> = Vec::new();
    if let Some(sem) = semester {
        sql.push_str(" AND s.semester = ?");
        params.push(Value::Integer(sem));
    }
    sql.push_str(" ORDER BY s.student_id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            let id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let student_name: String = row.get(2)?;
            let email: String = row.get(3)?;
            let sem: i64 = row.get(4)?;
            let guide_id: Option<String> = row.get(5)?;
            let guide_name: Option<String> = row.get(6)?;
            let manual: i64 = row.get(7)?;
            let guide = match (&guide_id, &guide_name) {
                (Some(gid), Some(name)) => json!({ "id": gid, "guideName": name }),
                _ => serde_json::Value::Null,
            };
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": student_name,
                "email": email,
                "semester": sem,
                "guide": guide,
                "guideManuallyAssigned": manual != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_lowercase(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let Some(semester) = req.params.get("semester").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing semester", None);
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("studentName") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.studentName must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "studentName must not be empty", None);
        }
        set_parts.push("student_name = ?".into());
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

    set_parts.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".into());
    let sql = format!(
        "UPDATE students SET {} WHERE student_id = ? AND semester = ? AND is_deleted = 0",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(student_id.clone()));
    bind_values.push(Value::Integer(semester));

    match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "studentId": student_id })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        ),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_lowercase(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let Some(semester) = req.params.get("semester").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing semester", None);
    };

    let row_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM students WHERE student_id = ? AND semester = ? AND is_deleted = 0",
            (&student_id, semester),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(row_id) = row_id else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "UPDATE student_internships
         SET is_deleted = 1, deleted_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE student_ref = ? AND is_deleted = 0",
        [&row_id],
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "student_internships" })),
        );
    }
    if let Err(e) = tx.execute(
        "UPDATE students
         SET is_deleted = 1, deleted_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        [&row_id],
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
