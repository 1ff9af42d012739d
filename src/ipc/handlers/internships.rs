use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;

fn handle_internships_list_by_guide(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let guide_id = match req.params.get("guideId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing guideId", None),
    };
    let semester = req.params.get("semester").and_then(|v| v.as_i64());

    let mut sql = String::from(
        "SELECT si.id, s.student_id, s.student_name, s.email, si.semester,
                si.guide_manually_assigned
         FROM student_internships si
         JOIN students s ON s.id = si.student_ref
         WHERE si.guide_id = ? AND si.is_deleted = 0 AND s.is_deleted = 0",
    );
    let mut params: Vec<Value> = vec![Value::Text(guide_id)];
    if let Some(sem) = semester {
        sql.push_str(" AND si.semester = ?");
        params.push(Value::Integer(sem));
    }
    sql.push_str(" ORDER BY si.semester, s.student_id");

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
            let manual: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": student_name,
                "email": email,
                "semester": sem,
                "guideManuallyAssigned": manual != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(internships) => ok(&req.id, json!({ "internships": internships })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_internships_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let row = conn
        .query_row(
            "SELECT si.id, s.student_id, s.student_name, si.semester,
                    si.guide_id, g.guide_name, si.guide_manually_assigned
             FROM student_internships si
             JOIN students s ON s.id = si.student_ref
             LEFT JOIN guides g ON g.id = si.guide_id AND g.is_deleted = 0
             WHERE s.student_id = ? AND si.semester = ?
               AND si.is_deleted = 0 AND s.is_deleted = 0",
            (&student_id, semester),
            |row| {
                let id: String = row.get(0)?;
                let student_id: String = row.get(1)?;
                let student_name: String = row.get(2)?;
                let sem: i64 = row.get(3)?;
                let guide_id: Option<String> = row.get(4)?;
                let guide_name: Option<String> = row.get(5)?;
                let manual: i64 = row.get(6)?;
                let guide = match (&guide_id, &guide_name) {
                    (Some(gid), Some(name)) => json!({ "id": gid, "guideName": name }),
                    _ => serde_json::Value::Null,
                };
                Ok(json!({
                    "id": id,
                    "studentId": student_id,
                    "studentName": student_name,
                    "semester": sem,
                    "guide": guide,
                    "guideManuallyAssigned": manual != 0
                }))
            },
        )
        .optional();

    match row {
        Ok(Some(internship)) => ok(&req.id, json!({ "internship": internship })),
        Ok(None) => err(&req.id, "not_found", "internship not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// The explicit admin override. Once applied, range allocation never
/// touches this record again.
fn handle_internships_update_guide(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_lowercase(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let guide_id = match req.params.get("guideId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing guideId", None),
    };
    let Some(semester) = req.params.get("semester").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing semester", None);
    };

    let guide_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM guides WHERE id = ? AND is_deleted = 0",
            [&guide_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if guide_exists.is_none() {
        return err(&req.id, "guide_not_found", "guide not found", None);
    }

    match conn.execute(
        "UPDATE student_internships
         SET guide_id = ?, guide_manually_assigned = 1,
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE semester = ? AND is_deleted = 0
           AND student_ref IN (
             SELECT id FROM students WHERE student_id = ? AND is_deleted = 0
           )",
        (&guide_id, semester, &student_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "internship not found", None),
        Ok(_) => ok(
            &req.id,
            json!({ "studentId": student_id, "guideId": guide_id }),
        ),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "student_internships" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "internships.listByGuide" => Some(handle_internships_list_by_guide(state, req)),
        "internships.get" => Some(handle_internships_get(state, req)),
        "internships.updateGuide" => Some(handle_internships_update_guide(state, req)),
        _ => None,
    }
}
