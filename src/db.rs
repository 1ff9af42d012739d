use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "internship.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    apply_schema(&conn)?;
    Ok(conn)
}

/// Schema creation is separated from file handling so engine tests can run
/// against an in-memory connection.
pub fn apply_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS guides(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            guide_name TEXT NOT NULL,
            email TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_guides_username ON guides(username)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            email TEXT NOT NULL,
            semester INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            updated_at TEXT,
            UNIQUE(student_id, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_semester ON students(semester)",
        [],
    )?;

    // One internship record per student per semester. The guide pointer is
    // nullable until an allocation or a manual assignment fills it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_internships(
            id TEXT PRIMARY KEY,
            student_ref TEXT NOT NULL,
            guide_id TEXT,
            semester INTEGER NOT NULL,
            guide_manually_assigned INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_ref) REFERENCES students(id),
            FOREIGN KEY(guide_id) REFERENCES guides(id),
            UNIQUE(student_ref, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_internships_guide ON student_internships(guide_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_internships_semester ON student_internships(semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS guide_allocations(
            id TEXT PRIMARY KEY,
            guide_id TEXT NOT NULL,
            range_text TEXT NOT NULL,
            semester INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            FOREIGN KEY(guide_id) REFERENCES guides(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_guide_allocations_guide ON guide_allocations(guide_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_guide_allocations_semester ON guide_allocations(semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS weekly_reports(
            id TEXT PRIMARY KEY,
            internship_ref TEXT NOT NULL,
            week INTEGER NOT NULL,
            week_start TEXT NOT NULL,
            content TEXT NOT NULL,
            submitted_at TEXT,
            marks REAL,
            remarks TEXT,
            graded_at TEXT,
            FOREIGN KEY(internship_ref) REFERENCES student_internships(id),
            UNIQUE(internship_ref, week)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_reports_internship ON weekly_reports(internship_ref)",
        [],
    )?;

    // Grading remarks arrived after the first workspaces shipped.
    ensure_reports_remarks(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_reports_remarks(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "weekly_reports", "remarks")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE weekly_reports ADD COLUMN remarks TEXT", [])?;
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
