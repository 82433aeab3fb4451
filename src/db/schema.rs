//! SQL DDL for all Taleweaver tables.
//!
//! Defines the entity tables (`characters`, `places`), the relationship graph
//! (`relationship_edges`, `edge_contributions`), the memory log (`memories`,
//! `memory_mentions`), scene state (`scenes`, `scene_presence`), the
//! `story_summary` singleton, the `story_log` audit table and `schema_meta`.
//! All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for the version-1 tables.
const SCHEMA_SQL: &str = r#"
-- Characters, including the narrator and the player
CREATE TABLE IF NOT EXISTS characters (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    role TEXT NOT NULL
        CHECK(role IN ('narrator-descriptive','narrator-sassy','character','player')),
    attributes TEXT NOT NULL DEFAULT '{}',
    aliases TEXT NOT NULL DEFAULT '[]',
    voice TEXT NOT NULL,
    favorite INTEGER NOT NULL DEFAULT 0,
    pending_identity INTEGER NOT NULL DEFAULT 0,
    last_seen_scene TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_characters_role ON characters(role);
CREATE UNIQUE INDEX IF NOT EXISTS idx_characters_single_player
    ON characters(role) WHERE role = 'player';

-- Places
CREATE TABLE IF NOT EXISTS places (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    attributes TEXT NOT NULL DEFAULT '{}',
    aliases TEXT NOT NULL DEFAULT '[]',
    first_mentioned_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Scenes: exactly one live row, older rows are the snapshots memories point at
CREATE TABLE IF NOT EXISTS scenes (
    id TEXT PRIMARY KEY,
    place_id TEXT REFERENCES places(id) ON DELETE SET NULL,
    time_of_day TEXT NOT NULL,
    atmosphere TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    initial_time_of_day TEXT NOT NULL,
    initial_atmosphere TEXT NOT NULL,
    initial_summary TEXT NOT NULL DEFAULT '',
    is_live INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_scenes_single_live ON scenes(is_live) WHERE is_live = 1;

CREATE TABLE IF NOT EXISTS scene_presence (
    scene_id TEXT NOT NULL REFERENCES scenes(id) ON DELETE CASCADE,
    character_id TEXT NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
    source_memory_id TEXT,
    PRIMARY KEY (scene_id, character_id)
);

-- Interaction log
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    character_id TEXT NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
    emotion TEXT NOT NULL,
    user_text TEXT NOT NULL,
    response_text TEXT NOT NULL,
    scene_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_character ON memories(character_id, created_at);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);

CREATE TABLE IF NOT EXISTS memory_mentions (
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    character_id TEXT NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
    PRIMARY KEY (memory_id, character_id)
);

-- Relationship graph
CREATE TABLE IF NOT EXISTS relationship_edges (
    id TEXT PRIMARY KEY,
    char_a TEXT NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
    char_b TEXT NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK(kind IN ('knows','spoke-with','present-with')),
    strength REAL NOT NULL CHECK(strength >= 0.0),
    baseline REAL NOT NULL CHECK(baseline >= 0.0),
    interaction_count INTEGER NOT NULL DEFAULT 0,
    last_interaction_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (char_a, char_b, kind)
);

CREATE INDEX IF NOT EXISTS idx_edges_a ON relationship_edges(char_a);
CREATE INDEX IF NOT EXISTS idx_edges_b ON relationship_edges(char_b);

CREATE TABLE IF NOT EXISTS edge_contributions (
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    edge_id TEXT NOT NULL REFERENCES relationship_edges(id) ON DELETE CASCADE,
    amount REAL NOT NULL,
    PRIMARY KEY (memory_id, edge_id)
);

-- Rolling synopsis
CREATE TABLE IF NOT EXISTS story_summary (
    slot INTEGER PRIMARY KEY CHECK(slot = 1),
    content TEXT NOT NULL,
    covered_until TEXT,
    turns_since INTEGER NOT NULL DEFAULT 0,
    generated_at TEXT,
    stale INTEGER NOT NULL DEFAULT 0
);

-- Audit log
CREATE TABLE IF NOT EXISTS story_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','update','identity','alias','favorite',
        'mention_dropped','rollback','reset','summary')),
    subject_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO story_summary (slot, content) VALUES (1, '')",
        [],
    )?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "characters",
            "places",
            "scenes",
            "scene_presence",
            "memories",
            "memory_mentions",
            "relationship_edges",
            "edge_contributions",
            "story_summary",
            "story_log",
            "schema_meta",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }

        let summary_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM story_summary", [], |r| r.get(0))
            .unwrap();
        assert_eq!(summary_rows, 1);
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn only_one_live_scene_allowed() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let insert = "INSERT INTO scenes (id, time_of_day, atmosphere, \
                      initial_time_of_day, initial_atmosphere, is_live, created_at) \
                      VALUES (?1, 'night', 'tense', 'night', 'tense', 1, \
                      '2026-01-01T00:00:00.000000Z')";
        conn.execute(insert, ["s1"]).unwrap();
        assert!(conn.execute(insert, ["s2"]).is_err());
    }
}
