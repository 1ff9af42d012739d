use std::collections::HashSet;

use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::range;

pub const ALLOWED_SEMESTERS: [i64; 2] = [5, 7];

pub fn is_allowed_semester(semester: i64) -> bool {
    ALLOWED_SEMESTERS.contains(&semester)
}

/// Engine-level failure with a stable wire code. Handlers pass these
/// straight into the error envelope.
#[derive(Debug)]
pub struct EngineErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl EngineErr {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        EngineErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        EngineErr {
            code,
            message: message.into(),
            details: Some(details),
        }
    }
}

impl From<range::RangeError> for EngineErr {
    fn from(e: range::RangeError) -> Self {
        EngineErr::new(e.code(), e.message())
    }
}

impl From<rusqlite::Error> for EngineErr {
    fn from(e: rusqlite::Error) -> Self {
        EngineErr::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AllocationRow {
    pub id: String,
    pub guide_id: String,
    pub range: String,
    pub semester: i64,
}

impl AllocationRow {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "guideId": self.guide_id,
            "range": self.range,
            "semester": self.semester,
        })
    }
}

#[derive(Debug)]
pub struct AllocationOutcome {
    pub allocation: AllocationRow,
    /// Requested ids with no matching student record. A visibility signal,
    /// not an error.
    pub missing_student_ids: Vec<String>,
    pub assigned_count: usize,
    /// Students left on their manually assigned guide.
    pub skipped_manually_assigned: Vec<String>,
}

struct StudentRow {
    row_id: String,
    student_id: String,
}

/// Assign a guide to every student in the range for a semester.
///
/// All-or-nothing with respect to conflicts: if any student in the range is
/// already auto-bound to a different guide the whole call fails and nothing
/// is written. Manual assignments are not conflicts; their rows are skipped
/// by the upsert. Repeat calls with identical arguments are idempotent.
pub fn allocate_guide_to_range(
    conn: &Connection,
    range_str: &str,
    guide_id: &str,
    semester: i64,
) -> Result<AllocationOutcome, EngineErr> {
    check_semester(semester)?;
    let spec = range::parse_range(range_str)?;
    let candidate_ids = spec.expand();
    let canonical = spec.canonical();

    let resolved = load_students_in_range(conn, &candidate_ids, semester)?;
    let found: HashSet<&str> = resolved.iter().map(|r| r.student_id.as_str()).collect();
    let missing_student_ids: Vec<String> = candidate_ids
        .iter()
        .filter(|id| !found.contains(id.as_str()))
        .cloned()
        .collect();

    if !guide_exists(conn, guide_id)? {
        return Err(EngineErr::new("guide_not_found", "guide not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| EngineErr::new("db_tx_failed", e.to_string()))?;

    let conflicts = find_conflicts(&tx, &resolved, semester, guide_id)?;
    if !conflicts.is_empty() {
        return Err(overlap_err(conflicts));
    }

    let mut assigned_count = 0usize;
    let mut skipped_manually_assigned: Vec<String> = Vec::new();
    for row in &resolved {
        let internship_id = Uuid::new_v4().to_string();
        let changed = tx
            .execute(
                "INSERT INTO student_internships(
                   id, student_ref, guide_id, semester, guide_manually_assigned, updated_at
                 ) VALUES(?, ?, ?, ?, 0, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
                 ON CONFLICT(student_ref, semester) DO UPDATE SET
                   guide_id = excluded.guide_id,
                   is_deleted = 0,
                   deleted_at = NULL,
                   updated_at = excluded.updated_at
                 WHERE student_internships.guide_manually_assigned = 0",
                (&internship_id, &row.row_id, guide_id, semester),
            )
            .map_err(|e| {
                EngineErr::with_details(
                    "db_insert_failed",
                    e.to_string(),
                    json!({ "table": "student_internships" }),
                )
            })?;
        if changed > 0 {
            assigned_count += 1;
        } else {
            skipped_manually_assigned.push(row.student_id.clone());
        }
    }

    // One active allocation per (guide, semester, range); a soft-deleted
    // row under the identical triple comes back instead of duplicating.
    let existing: Option<(String, i64)> = tx
        .query_row(
            "SELECT id, is_deleted FROM guide_allocations
             WHERE guide_id = ? AND semester = ? AND range_text = ?",
            (guide_id, semester, canonical.as_str()),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let allocation_id = match existing {
        Some((id, is_deleted)) => {
            if is_deleted != 0 {
                tx.execute(
                    "UPDATE guide_allocations SET is_deleted = 0, deleted_at = NULL WHERE id = ?",
                    [&id],
                )
                .map_err(|e| EngineErr::new("db_update_failed", e.to_string()))?;
            }
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO guide_allocations(id, guide_id, range_text, semester)
                 VALUES(?, ?, ?, ?)",
                (&id, guide_id, canonical.as_str(), semester),
            )
            .map_err(|e| {
                EngineErr::with_details(
                    "db_insert_failed",
                    e.to_string(),
                    json!({ "table": "guide_allocations" }),
                )
            })?;
            id
        }
    };

    tx.commit()
        .map_err(|e| EngineErr::new("db_commit_failed", e.to_string()))?;

    Ok(AllocationOutcome {
        allocation: AllocationRow {
            id: allocation_id,
            guide_id: guide_id.to_string(),
            range: canonical,
            semester,
        },
        missing_student_ids,
        assigned_count,
        skipped_manually_assigned,
    })
}

/// Standalone conflict check: does any student in the range already carry an
/// automatic binding to a guide other than `exclude_guide_id`?
pub fn validate_range_overlap(
    conn: &Connection,
    range_str: &str,
    semester: i64,
    exclude_guide_id: &str,
) -> Result<(), EngineErr> {
    check_semester(semester)?;
    let spec = range::parse_range(range_str)?;
    let resolved = load_students_in_range(conn, &spec.expand(), semester)?;
    let conflicts = find_conflicts(conn, &resolved, semester, exclude_guide_id)?;
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(overlap_err(conflicts))
    }
}

/// Soft-delete the active allocation matching (range, semester) together
/// with the internship records of every student the range resolves to.
/// Matches on range and semester alone; the caller is the admin surface.
pub fn delete_guide_allocation(
    conn: &Connection,
    range_str: &str,
    semester: i64,
) -> Result<AllocationRow, EngineErr> {
    check_semester(semester)?;
    let spec = range::parse_range(range_str)?;
    let canonical = spec.canonical();

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, guide_id FROM guide_allocations
             WHERE range_text = ? AND semester = ? AND is_deleted = 0",
            (canonical.as_str(), semester),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((allocation_id, guide_id)) = row else {
        return Err(EngineErr::new(
            "allocation_not_found",
            "no active allocation for that range and semester",
        ));
    };

    let candidate_ids = spec.expand();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| EngineErr::new("db_tx_failed", e.to_string()))?;

    let placeholders = vec!["?"; candidate_ids.len()].join(", ");
    let sql = format!(
        "UPDATE student_internships
         SET is_deleted = 1,
             deleted_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE semester = ?
           AND is_deleted = 0
           AND student_ref IN (
             SELECT id FROM students WHERE semester = ? AND student_id IN ({})
           )",
        placeholders
    );
    let mut params: Vec<Value> = Vec::with_capacity(candidate_ids.len() + 2);
    params.push(Value::Integer(semester));
    params.push(Value::Integer(semester));
    params.extend(candidate_ids.iter().map(|id| Value::Text(id.clone())));
    tx.execute(&sql, params_from_iter(params)).map_err(|e| {
        EngineErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "student_internships" }),
        )
    })?;

    tx.execute(
        "UPDATE guide_allocations
         SET is_deleted = 1,
             deleted_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        [&allocation_id],
    )
    .map_err(|e| {
        EngineErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "guide_allocations" }),
        )
    })?;

    tx.commit()
        .map_err(|e| EngineErr::new("db_commit_failed", e.to_string()))?;

    Ok(AllocationRow {
        id: allocation_id,
        guide_id,
        range: canonical,
        semester,
    })
}

/// Provisioning step: look for an active allocation covering a freshly
/// created student and apply it. Called explicitly by `students.create`,
/// never from inside the entity layer.
pub fn try_auto_assign(
    conn: &Connection,
    student_row_id: &str,
    student_id: &str,
    semester: i64,
) -> Result<Option<String>, EngineErr> {
    let Ok(parts) = range::parse_student_id(student_id) else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT ga.range_text, ga.guide_id
         FROM guide_allocations ga
         JOIN guides g ON g.id = ga.guide_id
         WHERE ga.semester = ? AND ga.is_deleted = 0 AND g.is_deleted = 0
         ORDER BY ga.rowid",
    )?;
    let allocations = stmt
        .query_map([semester], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (range_text, guide_id) in allocations {
        let Ok(spec) = range::parse_range(&range_text) else {
            continue;
        };
        if !spec.covers(&parts) {
            continue;
        }
        let changed = conn
            .execute(
                "UPDATE student_internships
                 SET guide_id = ?,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
                 WHERE student_ref = ?
                   AND semester = ?
                   AND is_deleted = 0
                   AND guide_manually_assigned = 0",
                (&guide_id, student_row_id, semester),
            )
            .map_err(|e| EngineErr::new("db_update_failed", e.to_string()))?;
        return Ok(if changed > 0 { Some(guide_id) } else { None });
    }
    Ok(None)
}

fn check_semester(semester: i64) -> Result<(), EngineErr> {
    if is_allowed_semester(semester) {
        Ok(())
    } else {
        Err(EngineErr::with_details(
            "invalid_semester",
            format!("semester must be one of {:?}", ALLOWED_SEMESTERS),
            json!({ "semester": semester }),
        ))
    }
}

fn guide_exists(conn: &Connection, guide_id: &str) -> Result<bool, EngineErr> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM guides WHERE id = ? AND is_deleted = 0",
            [guide_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn load_students_in_range(
    conn: &Connection,
    candidate_ids: &[String],
    semester: i64,
) -> Result<Vec<StudentRow>, EngineErr> {
    if candidate_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; candidate_ids.len()].join(", ");
    let sql = format!(
        "SELECT id, student_id FROM students
         WHERE is_deleted = 0 AND semester = ? AND student_id IN ({})
         ORDER BY student_id",
        placeholders
    );
    let mut params: Vec<Value> = Vec::with_capacity(candidate_ids.len() + 1);
    params.push(Value::Integer(semester));
    params.extend(candidate_ids.iter().map(|id| Value::Text(id.clone())));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), |r| {
            Ok(StudentRow {
                row_id: r.get(0)?,
                student_id: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Conflicts are automatic bindings to another guide. Manual assignments are
/// skipped by the upsert rather than reported here; treating them as
/// conflicts would make every admin override block future allocations.
fn find_conflicts(
    conn: &Connection,
    resolved: &[StudentRow],
    semester: i64,
    exclude_guide_id: &str,
) -> Result<Vec<String>, EngineErr> {
    if resolved.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; resolved.len()].join(", ");
    let sql = format!(
        "SELECT s.student_id
         FROM student_internships si
         JOIN students s ON s.id = si.student_ref
         WHERE si.semester = ?
           AND si.is_deleted = 0
           AND si.guide_manually_assigned = 0
           AND si.guide_id IS NOT NULL
           AND si.guide_id != ?
           AND si.student_ref IN ({})
         ORDER BY s.student_id",
        placeholders
    );
    let mut params: Vec<Value> = Vec::with_capacity(resolved.len() + 2);
    params.push(Value::Integer(semester));
    params.push(Value::Text(exclude_guide_id.to_string()));
    params.extend(resolved.iter().map(|r| Value::Text(r.row_id.clone())));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn overlap_err(conflicts: Vec<String>) -> EngineErr {
    EngineErr::with_details(
        "range_overlap",
        "range overlaps an existing allocation under a different guide",
        json!({ "overlappingStudents": conflicts }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute("PRAGMA foreign_keys = ON", [])
            .expect("foreign keys");
        db::apply_schema(&conn).expect("apply schema");
        conn
    }

    fn add_guide(conn: &Connection, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO guides(id, username, guide_name, email) VALUES(?, ?, ?, ?)",
            (
                &id,
                username,
                format!("Guide {}", username),
                format!("{}@faculty.example.edu", username),
            ),
        )
        .expect("insert guide");
        id
    }

    // Mirrors provisioning: the student row plus its unassigned internship.
    fn add_student(conn: &Connection, student_id: &str, semester: i64) -> String {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO students(id, student_id, student_name, email, semester)
             VALUES(?, ?, ?, ?, ?)",
            (
                &id,
                student_id,
                format!("Student {}", student_id),
                format!("{}@students.example.edu", student_id),
                semester,
            ),
        )
        .expect("insert student");
        conn.execute(
            "INSERT INTO student_internships(id, student_ref, guide_id, semester)
             VALUES(?, ?, NULL, ?)",
            (Uuid::new_v4().to_string(), &id, semester),
        )
        .expect("insert internship");
        id
    }

    fn guide_of(conn: &Connection, student_id: &str, semester: i64) -> Option<String> {
        conn.query_row(
            "SELECT si.guide_id FROM student_internships si
             JOIN students s ON s.id = si.student_ref
             WHERE s.student_id = ? AND si.semester = ?",
            (student_id, semester),
            |r| r.get(0),
        )
        .expect("query guide")
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).expect("count")
    }

    #[test]
    fn allocation_assigns_every_resolved_student() {
        let conn = test_conn();
        let guide = add_guide(&conn, "amith");
        for seq in 1..=3 {
            add_student(&conn, &format!("22cs{:03}", seq), 5);
        }

        let outcome = allocate_guide_to_range(&conn, "22cs001-22cs003", &guide, 5).expect("allocate");
        assert_eq!(outcome.assigned_count, 3);
        assert!(outcome.missing_student_ids.is_empty());
        assert!(outcome.skipped_manually_assigned.is_empty());
        assert_eq!(outcome.allocation.range, "22cs001-22cs003");
        for seq in 1..=3 {
            assert_eq!(
                guide_of(&conn, &format!("22cs{:03}", seq), 5).as_deref(),
                Some(guide.as_str())
            );
        }
    }

    #[test]
    fn repeat_allocation_is_idempotent() {
        let conn = test_conn();
        let guide = add_guide(&conn, "amith");
        for seq in 10..=12 {
            add_student(&conn, &format!("22cs{:03}", seq), 7);
        }

        let first = allocate_guide_to_range(&conn, "22cs010-22cs012", &guide, 7).expect("first");
        let second = allocate_guide_to_range(&conn, "22cs010-22cs012", &guide, 7).expect("second");

        assert_eq!(first.allocation.id, second.allocation.id);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM guide_allocations"),
            1
        );
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM student_internships"),
            3
        );
        for seq in 10..=12 {
            assert_eq!(
                guide_of(&conn, &format!("22cs{:03}", seq), 7).as_deref(),
                Some(guide.as_str())
            );
        }
    }

    #[test]
    fn missing_students_are_reported_not_fatal() {
        let conn = test_conn();
        let guide = add_guide(&conn, "amith");
        add_student(&conn, "22cs078", 5);
        add_student(&conn, "22cs080", 5);

        let outcome = allocate_guide_to_range(&conn, "22cs078-22cs082", &guide, 5).expect("allocate");
        assert_eq!(
            outcome.missing_student_ids,
            vec!["22cs079", "22cs081", "22cs082"]
        );
        assert_eq!(outcome.assigned_count, 2);
        assert_eq!(guide_of(&conn, "22cs078", 5).as_deref(), Some(guide.as_str()));
        assert_eq!(guide_of(&conn, "22cs080", 5).as_deref(), Some(guide.as_str()));
    }

    #[test]
    fn manual_assignment_survives_reallocation() {
        let conn = test_conn();
        let g1 = add_guide(&conn, "manual");
        let g2 = add_guide(&conn, "auto");
        for seq in 78..=80 {
            add_student(&conn, &format!("22cs{:03}", seq), 5);
        }
        conn.execute(
            "UPDATE student_internships SET guide_id = ?, guide_manually_assigned = 1
             WHERE student_ref IN (SELECT id FROM students WHERE student_id = '22cs079')",
            [&g1],
        )
        .expect("manual assign");

        let outcome = allocate_guide_to_range(&conn, "22cs078-22cs080", &g2, 5).expect("allocate");
        assert_eq!(outcome.assigned_count, 2);
        assert_eq!(outcome.skipped_manually_assigned, vec!["22cs079"]);
        assert_eq!(guide_of(&conn, "22cs078", 5).as_deref(), Some(g2.as_str()));
        assert_eq!(guide_of(&conn, "22cs079", 5).as_deref(), Some(g1.as_str()));
        assert_eq!(guide_of(&conn, "22cs080", 5).as_deref(), Some(g2.as_str()));
    }

    #[test]
    fn overlapping_auto_allocation_is_rejected_whole() {
        let conn = test_conn();
        let g1 = add_guide(&conn, "first");
        let g2 = add_guide(&conn, "second");
        for seq in 1..=5 {
            add_student(&conn, &format!("22cs{:03}", seq), 7);
        }
        allocate_guide_to_range(&conn, "22cs001-22cs003", &g1, 7).expect("first allocation");

        let err = allocate_guide_to_range(&conn, "22cs002-22cs005", &g2, 7)
            .expect_err("overlap must fail");
        assert_eq!(err.code, "range_overlap");
        let conflicting = err
            .details
            .as_ref()
            .and_then(|d| d.get("overlappingStudents"))
            .and_then(|v| v.as_array())
            .expect("conflict list")
            .iter()
            .map(|v| v.as_str().unwrap_or("").to_string())
            .collect::<Vec<_>>();
        assert_eq!(conflicting, vec!["22cs002", "22cs003"]);

        // Nothing moved: G1 keeps 1-3, 4-5 stay unassigned, no G2 allocation row.
        for seq in 1..=3 {
            assert_eq!(
                guide_of(&conn, &format!("22cs{:03}", seq), 7).as_deref(),
                Some(g1.as_str())
            );
        }
        assert_eq!(guide_of(&conn, "22cs004", 7), None);
        assert_eq!(guide_of(&conn, "22cs005", 7), None);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM guide_allocations"),
            1
        );
    }

    #[test]
    fn reallocation_by_same_guide_is_not_a_conflict() {
        let conn = test_conn();
        let guide = add_guide(&conn, "amith");
        for seq in 1..=4 {
            add_student(&conn, &format!("22cs{:03}", seq), 5);
        }
        allocate_guide_to_range(&conn, "22cs001-22cs003", &guide, 5).expect("first");
        // Widening the same guide's coverage registers a second range.
        allocate_guide_to_range(&conn, "22cs001-22cs004", &guide, 5).expect("widen");
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM guide_allocations WHERE is_deleted = 0"),
            2
        );
        assert_eq!(guide_of(&conn, "22cs004", 5).as_deref(), Some(guide.as_str()));
    }

    #[test]
    fn validate_range_overlap_flags_conflicts_without_writing() {
        let conn = test_conn();
        let g1 = add_guide(&conn, "first");
        let g2 = add_guide(&conn, "second");
        for seq in 1..=3 {
            add_student(&conn, &format!("22cs{:03}", seq), 5);
        }
        allocate_guide_to_range(&conn, "22cs001-22cs003", &g1, 5).expect("allocate");

        assert!(validate_range_overlap(&conn, "22cs001-22cs003", 5, &g1).is_ok());
        let err = validate_range_overlap(&conn, "22cs002-22cs003", 5, &g2)
            .expect_err("conflict expected");
        assert_eq!(err.code, "range_overlap");
    }

    #[test]
    fn unknown_guide_is_fatal() {
        let conn = test_conn();
        add_student(&conn, "22cs001", 5);
        let err = allocate_guide_to_range(&conn, "22cs001-22cs001", "no-such-guide", 5)
            .expect_err("must fail");
        assert_eq!(err.code, "guide_not_found");
    }

    #[test]
    fn soft_deleted_guide_is_not_found() {
        let conn = test_conn();
        let guide = add_guide(&conn, "gone");
        conn.execute(
            "UPDATE guides SET is_deleted = 1, deleted_at = '2026-01-01T00:00:00Z' WHERE id = ?",
            [&guide],
        )
        .expect("soft delete guide");
        add_student(&conn, "22cs001", 5);
        let err = allocate_guide_to_range(&conn, "22cs001-22cs001", &guide, 5)
            .expect_err("must fail");
        assert_eq!(err.code, "guide_not_found");
    }

    #[test]
    fn semester_outside_allowed_set_is_rejected() {
        let conn = test_conn();
        let guide = add_guide(&conn, "amith");
        let err =
            allocate_guide_to_range(&conn, "22cs001-22cs003", &guide, 6).expect_err("must fail");
        assert_eq!(err.code, "invalid_semester");
    }

    #[test]
    fn malformed_range_fails_before_any_write() {
        let conn = test_conn();
        let guide = add_guide(&conn, "amith");
        let err = allocate_guide_to_range(&conn, "22cs078", &guide, 5).expect_err("must fail");
        assert_eq!(err.code, "malformed_range");
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM guide_allocations"), 0);
    }

    #[test]
    fn delete_soft_deletes_allocation_and_internships() {
        let conn = test_conn();
        let guide = add_guide(&conn, "amith");
        for seq in 1..=3 {
            add_student(&conn, &format!("22cs{:03}", seq), 5);
        }
        allocate_guide_to_range(&conn, "22cs001-22cs003", &guide, 5).expect("allocate");

        let deleted = delete_guide_allocation(&conn, "22cs001-22cs003", 5).expect("delete");
        assert_eq!(deleted.range, "22cs001-22cs003");
        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM guide_allocations WHERE is_deleted = 1 AND deleted_at IS NOT NULL"
            ),
            1
        );
        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM student_internships WHERE is_deleted = 1 AND deleted_at IS NOT NULL"
            ),
            3
        );

        let err = delete_guide_allocation(&conn, "22cs001-22cs003", 5).expect_err("second delete");
        assert_eq!(err.code, "allocation_not_found");
    }

    #[test]
    fn reallocating_after_delete_revives_the_same_rows() {
        let conn = test_conn();
        let guide = add_guide(&conn, "amith");
        for seq in 1..=2 {
            add_student(&conn, &format!("22cs{:03}", seq), 5);
        }
        let first = allocate_guide_to_range(&conn, "22cs001-22cs002", &guide, 5).expect("allocate");
        delete_guide_allocation(&conn, "22cs001-22cs002", 5).expect("delete");
        let second =
            allocate_guide_to_range(&conn, "22cs001-22cs002", &guide, 5).expect("reallocate");

        assert_eq!(first.allocation.id, second.allocation.id);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM guide_allocations"),
            1
        );
        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM student_internships WHERE is_deleted = 0"
            ),
            2
        );
    }

    #[test]
    fn auto_assign_applies_covering_allocation() {
        let conn = test_conn();
        let guide = add_guide(&conn, "amith");
        add_student(&conn, "22cs001", 5);
        allocate_guide_to_range(&conn, "22cs001-22cs005", &guide, 5).expect("allocate");

        // Student onboarded after the allocation was registered.
        let late = add_student(&conn, "22cs003", 5);
        let assigned = try_auto_assign(&conn, &late, "22cs003", 5).expect("auto assign");
        assert_eq!(assigned.as_deref(), Some(guide.as_str()));
        assert_eq!(guide_of(&conn, "22cs003", 5).as_deref(), Some(guide.as_str()));
    }

    #[test]
    fn auto_assign_leaves_uncovered_and_manual_students_alone() {
        let conn = test_conn();
        let g1 = add_guide(&conn, "manual");
        let g2 = add_guide(&conn, "auto");
        add_student(&conn, "22cs001", 5);
        allocate_guide_to_range(&conn, "22cs001-22cs005", &g2, 5).expect("allocate");

        let outside = add_student(&conn, "22ce003", 5);
        assert_eq!(
            try_auto_assign(&conn, &outside, "22ce003", 5).expect("no match"),
            None
        );

        let covered = add_student(&conn, "22cs004", 5);
        conn.execute(
            "UPDATE student_internships SET guide_id = ?, guide_manually_assigned = 1
             WHERE student_ref = ?",
            (&g1, &covered),
        )
        .expect("manual assign");
        assert_eq!(
            try_auto_assign(&conn, &covered, "22cs004", 5).expect("manual wins"),
            None
        );
        assert_eq!(guide_of(&conn, "22cs004", 5).as_deref(), Some(g1.as_str()));
    }
}
