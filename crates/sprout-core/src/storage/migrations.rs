//! Database schema migrations for sprout.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Current schema version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    }) {
        Ok(version) => Ok(version),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(err) => Err(err),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: profiles, the attempt log and derived caches.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS children (
            id            TEXT PRIMARY KEY,
            display_name  TEXT NOT NULL,
            age_years     INTEGER NOT NULL,
            language      TEXT NOT NULL DEFAULT 'en',
            subscription  TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS child_difficulty (
            child_id  TEXT NOT NULL REFERENCES children(id),
            subject   TEXT NOT NULL,
            tier      TEXT NOT NULL,
            PRIMARY KEY (child_id, subject)
        );

        CREATE TABLE IF NOT EXISTS attempts (
            seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
            id                  TEXT NOT NULL UNIQUE,
            child_id            TEXT NOT NULL REFERENCES children(id),
            activity_id         TEXT NOT NULL,
            subject_id          TEXT NOT NULL,
            tier                TEXT NOT NULL,
            completed_at        TEXT NOT NULL,
            error_count         INTEGER NOT NULL,
            time_spent_seconds  INTEGER NOT NULL,
            total_questions     INTEGER NOT NULL,
            correct_answers     INTEGER NOT NULL,
            stars               INTEGER NOT NULL,
            session_id          TEXT
        );

        CREATE TABLE IF NOT EXISTS unlocks (
            child_id     TEXT NOT NULL REFERENCES children(id),
            activity_id  TEXT NOT NULL,
            reason       TEXT NOT NULL,
            unlocked_at  TEXT NOT NULL,
            PRIMARY KEY (child_id, activity_id)
        );

        CREATE TABLE IF NOT EXISTS earned_achievements (
            child_id        TEXT NOT NULL REFERENCES children(id),
            achievement_id  TEXT NOT NULL,
            earned_at       TEXT NOT NULL,
            PRIMARY KEY (child_id, achievement_id)
        );

        CREATE TABLE IF NOT EXISTS streaks (
            child_id            TEXT PRIMARY KEY REFERENCES children(id),
            current             INTEGER NOT NULL,
            longest             INTEGER NOT NULL,
            start_date          TEXT,
            last_activity_date  TEXT
        );

        CREATE TABLE IF NOT EXISTS content_state (
            child_id     TEXT PRIMARY KEY REFERENCES children(id),
            fingerprint  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_attempts_child ON attempts(child_id, completed_at);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: client submission ids for idempotent resubmission.
///
/// Adds `attempts.submission_id` with a per-child unique index.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE attempts ADD COLUMN submission_id TEXT;
         CREATE UNIQUE INDEX IF NOT EXISTS idx_attempts_submission
             ON attempts(child_id, submission_id)
             WHERE submission_id IS NOT NULL;",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_from_scratch() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let has_submission: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('attempts') WHERE name = 'submission_id'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(has_submission, 1);
    }

    #[test]
    fn migrate_from_v1_keeps_attempts() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO children (id, display_name, age_years, subscription, created_at)
             VALUES ('kid', 'Kid', 5, 'trial', '2026-01-01T00:00:00+00:00');
             INSERT INTO attempts (id, child_id, activity_id, subject_id, tier, completed_at,
                                   error_count, time_spent_seconds, total_questions,
                                   correct_answers, stars)
             VALUES ('a1', 'kid', 'm1', 'math', 'easy', '2026-01-01T10:00:00+00:00',
                     0, 30, 5, 5, 3);",
        )
        .unwrap();

        migrate(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 2);
        let submission: Option<String> = conn
            .query_row("SELECT submission_id FROM attempts WHERE id = 'a1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(submission, None);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
