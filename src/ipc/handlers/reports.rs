use chrono::{Duration, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

const MAX_MARKS: f64 = 10.0;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

fn resolve_internship(
    conn: &Connection,
    student_id: &str,
    semester: i64,
) -> Result<String, HandlerErr> {
    let internship_id: Option<String> = conn
        .query_row(
            "SELECT si.id FROM student_internships si
             JOIN students s ON s.id = si.student_ref
             WHERE s.student_id = ? AND si.semester = ?
               AND si.is_deleted = 0 AND s.is_deleted = 0",
            (student_id, semester),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    internship_id.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "internship not found".to_string(),
        details: Some(json!({ "studentId": student_id, "semester": semester })),
    })
}

fn handle_reports_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let week = match req.params.get("week").and_then(|v| v.as_i64()) {
        Some(v) if v >= 1 => v,
        Some(_) => return err(&req.id, "bad_params", "week must be >= 1", None),
        None => return err(&req.id, "bad_params", "missing week", None),
    };
    let week_start_raw = match req.params.get("weekStart").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing weekStart", None),
    };
    let week_start = match NaiveDate::parse_from_str(&week_start_raw, "%Y-%m-%d") {
        Ok(d) => d,
        Err(_) => {
            return err(
                &req.id,
                "bad_params",
                "weekStart must be an ISO date (YYYY-MM-DD)",
                None,
            )
        }
    };
    let content = match req.params.get("content").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing content", None),
    };
    if content.is_empty() {
        return err(&req.id, "bad_params", "content must not be empty", None);
    }

    let internship_id = match resolve_internship(conn, &student_id, semester) {
        Ok(v) => v,
        Err(e) => return err(&req.id, e.code, e.message, e.details),
    };

    // A graded report is frozen; resubmission before grading replaces it.
    let report_id = Uuid::new_v4().to_string();
    let changed = conn.execute(
        "INSERT INTO weekly_reports(
           id, internship_ref, week, week_start, content, submitted_at
         ) VALUES(?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(internship_ref, week) DO UPDATE SET
           week_start = excluded.week_start,
           content = excluded.content,
           submitted_at = excluded.submitted_at
         WHERE weekly_reports.graded_at IS NULL",
        (
            &report_id,
            &internship_id,
            week,
            week_start.format("%Y-%m-%d").to_string(),
            &content,
        ),
    );
    match changed {
        Ok(0) => {
            return err(
                &req.id,
                "already_graded",
                "report for that week has been graded and is frozen",
                Some(json!({ "week": week })),
            )
        }
        Ok(_) => {}
        Err(e) => {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "weekly_reports" })),
            )
        }
    }

    let week_end = week_start + Duration::days(6);
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "week": week,
            "weekStart": week_start.format("%Y-%m-%d").to_string(),
            "weekEnd": week_end.format("%Y-%m-%d").to_string(),
        }),
    )
}

fn report_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let week: i64 = row.get(0)?;
    let week_start: String = row.get(1)?;
    let content: String = row.get(2)?;
    let submitted_at: Option<String> = row.get(3)?;
    let marks: Option<f64> = row.get(4)?;
    let remarks: Option<String> = row.get(5)?;
    let graded_at: Option<String> = row.get(6)?;
    Ok(json!({
        "week": week,
        "weekStart": week_start,
        "content": content,
        "submittedAt": submitted_at,
        "marks": marks,
        "remarks": remarks,
        "gradedAt": graded_at,
    }))
}

fn handle_reports_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let internship_id = match resolve_internship(conn, &student_id, semester) {
        Ok(v) => v,
        Err(e) => return err(&req.id, e.code, e.message, e.details),
    };

    let mut stmt = match conn.prepare(
        "SELECT week, week_start, content, submitted_at, marks, remarks, graded_at
         FROM weekly_reports
         WHERE internship_ref = ?
         ORDER BY week",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&internship_id], report_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(reports) => ok(&req.id, json!({ "reports": reports })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_list_by_guide(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let guide_id = match req.params.get("guideId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing guideId", None),
    };
    let Some(semester) = req.params.get("semester").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing semester", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.student_id, s.student_name, wr.week, wr.week_start,
                wr.submitted_at, wr.marks, wr.graded_at
         FROM weekly_reports wr
         JOIN student_internships si ON si.id = wr.internship_ref
         JOIN students s ON s.id = si.student_ref
         WHERE si.guide_id = ? AND si.semester = ?
           AND si.is_deleted = 0 AND s.is_deleted = 0
         ORDER BY s.student_id, wr.week",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&guide_id, semester), |row| {
            let student_id: String = row.get(0)?;
            let student_name: String = row.get(1)?;
            let week: i64 = row.get(2)?;
            let week_start: String = row.get(3)?;
            let submitted_at: Option<String> = row.get(4)?;
            let marks: Option<f64> = row.get(5)?;
            let graded_at: Option<String> = row.get(6)?;
            Ok(json!({
                "studentId": student_id,
                "studentName": student_name,
                "week": week,
                "weekStart": week_start,
                "submittedAt": submitted_at,
                "marks": marks,
                "gradedAt": graded_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(reports) => ok(&req.id, json!({ "reports": reports })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(week) = req.params.get("week").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing week", None);
    };
    let marks = match req.params.get("marks").and_then(|v| v.as_f64()) {
        Some(v) if (0.0..=MAX_MARKS).contains(&v) => v,
        Some(_) => {
            return err(
                &req.id,
                "bad_params",
                format!("marks must be between 0 and {}", MAX_MARKS),
                None,
            )
        }
        None => return err(&req.id, "bad_params", "missing marks", None),
    };
    let remarks = req
        .params
        .get("remarks")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let internship_id = match resolve_internship(conn, &student_id, semester) {
        Ok(v) => v,
        Err(e) => return err(&req.id, e.code, e.message, e.details),
    };

    match conn.execute(
        "UPDATE weekly_reports
         SET marks = ?, remarks = ?,
             graded_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE internship_ref = ? AND week = ?",
        (marks, remarks.as_deref(), &internship_id, week),
    ) {
        Ok(0) => err(
            &req.id,
            "not_found",
            "no report submitted for that week",
            Some(json!({ "week": week })),
        ),
        Ok(_) => ok(
            &req.id,
            json!({ "studentId": student_id, "week": week, "marks": marks }),
        ),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "weekly_reports" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.submit" => Some(handle_reports_submit(state, req)),
        "reports.list" => Some(handle_reports_list(state, req)),
        "reports.listByGuide" => Some(handle_reports_list_by_guide(state, req)),
        "reports.grade" => Some(handle_reports_grade(state, req)),
        _ => None,
    }
}
