use crate::allocation;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::params_from_iter;
use serde_json::json;

struct AllocateParams {
    range: String,
    guide_id: String,
    semester: i64,
}

fn allocate_params(req: &Request) -> Result<AllocateParams, serde_json::Value> {
    let range = req
        .params
        .get("range")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| err(&req.id, "bad_params", "missing range", None))?;
    let guide_id = req
        .params
        .get("guideId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| err(&req.id, "bad_params", "missing guideId", None))?;
    let semester = req
        .params
        .get("semester")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", "missing semester", None))?;
    Ok(AllocateParams {
        range,
        guide_id,
        semester,
    })
}

fn handle_allocations_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let p = match allocate_params(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match allocation::allocate_guide_to_range(conn, &p.range, &p.guide_id, p.semester) {
        Ok(outcome) => ok(
            &req.id,
            json!({
                "allocation": outcome.allocation.to_json(),
                "missingStudents": outcome.missing_student_ids,
                "assignedCount": outcome.assigned_count,
                "skippedManuallyAssigned": outcome.skipped_manually_assigned,
            }),
        ),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_allocations_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let p = match allocate_params(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match allocation::validate_range_overlap(conn, &p.range, p.semester, &p.guide_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => engine_err(&req.id, e),
    }
}

fn handle_allocations_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let semester = req.params.get("semester").and_then(|v| v.as_i64());

    let mut sql = String::from(
        "SELECT ga.id, ga.range_text, ga.semester, g.id, g.username, g.guide_name
         FROM guide_allocations ga
         JOIN guides g ON g.id = ga.guide_id
         WHERE ga.is_deleted = 0",
    );
    let mut params: Vec<Value> = Vec::new();
    if let Some(sem) = semester {
        sql.push_str(" AND ga.semester = ?");
        params.push(Value::Integer(sem));
    }
    sql.push_str(" ORDER BY ga.semester, ga.range_text");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            let id: String = row.get(0)?;
            let range_text: String = row.get(1)?;
            let sem: i64 = row.get(2)?;
            let guide_id: String = row.get(3)?;
            let username: String = row.get(4)?;
            let guide_name: String = row.get(5)?;
            Ok(json!({
                "id": id,
                "range": range_text,
                "semester": sem,
                "guide": {
                    "id": guide_id,
                    "username": username,
                    "guideName": guide_name
                }
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(allocations) => ok(&req.id, json!({ "allocations": allocations })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_allocations_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let range = match req.params.get("range").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing range", None),
    };
    let Some(semester) = req.params.get("semester").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing semester", None);
    };

    match allocation::delete_guide_allocation(conn, &range, semester) {
        Ok(deleted) => ok(&req.id, json!({ "allocation": deleted.to_json() })),
        Err(e) => engine_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "allocations.create" => Some(handle_allocations_create(state, req)),
        "allocations.validate" => Some(handle_allocations_validate(state, req)),
        "allocations.list" => Some(handle_allocations_list(state, req)),
        "allocations.delete" => Some(handle_allocations_delete(state, req)),
        _ => None,
    }
}
