//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `schema_meta` and runs sequential migrations
//! to bring the database up to [`CURRENT_SCHEMA_VERSION`].

use rusqlite::Connection;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

/// Update the stored schema version.
fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// Run any pending forward-only migrations. Each migration runs in a transaction.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(
        schema_version = version,
        target = CURRENT_SCHEMA_VERSION,
        "checking migrations"
    );

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        conn.execute_batch("BEGIN")?;
        let step = match next {
            2 => migrate_v1_to_v2(conn),
            3 => migrate_v2_to_v3(conn),
            _ => {
                tracing::error!(version = next, "unknown migration target");
                conn.execute_batch("ROLLBACK")?;
                break;
            }
        };
        if let Err(e) = step.and_then(|_| update_schema_version(conn, next)) {
            conn.execute_batch("ROLLBACK")?;
            return Err(e);
        }
        conn.execute_batch("COMMIT")?;
        version = next;
    }

    Ok(())
}

/// Migration v1 → v2: distinguish edges seeded at story setup from edges
/// created during play, so rollback never removes seeded relationships.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "ALTER TABLE relationship_edges ADD COLUMN origin TEXT NOT NULL DEFAULT 'play' \
         CHECK(origin IN ('setup','play'))",
        [],
    )?;
    Ok(())
}

/// Migration v2 → v3: remember which scene came before each one and which
/// interaction moved the story there, so undoing a move restores the old
/// scene.
fn migrate_v2_to_v3(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "ALTER TABLE scenes ADD COLUMN previous_scene_id TEXT;
         ALTER TABLE scenes ADD COLUMN entered_by_memory TEXT;
         CREATE INDEX IF NOT EXISTS idx_scenes_entered_by ON scenes(entered_by_memory);",
    )
}
