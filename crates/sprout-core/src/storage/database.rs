//! SQLite-backed progress store.
//!
//! Provides persistent storage for:
//! - Child profiles and their per-subject difficulty
//! - The append-only attempt log
//! - Derived caches: unlock entries, streak state and the content fingerprint
//!   they were computed against

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use super::{data_dir, migrations, CompletionCommit, DerivedState, ProgressStore};
use crate::achievements::EarnedAchievement;
use crate::attempt::AttemptRecord;
use crate::child::{Child, Subscription};
use crate::content::DifficultyTier;
use crate::error::StorageError;
use crate::scoring::StarRating;
use crate::streak::StreakState;
use crate::unlock::{UnlockEntry, UnlockReason};

const ATTEMPT_COLUMNS: &str = "id, child_id, activity_id, subject_id, tier, completed_at,
     error_count, time_spent_seconds, total_questions, correct_answers, stars,
     session_id, submission_id";

/// SQLite database for progression state.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database at `~/.config/sprout/sprout.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StorageError> {
        let path = data_dir()?.join("sprout.db");
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn).map_err(|e| StorageError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::QueryFailed("connection mutex poisoned".to_string()))
    }

    /// Run `f` inside `BEGIN IMMEDIATE`; any error rolls everything back.
    fn in_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE TRANSACTION;")?;
        let result = f(&conn).and_then(|value| {
            conn.execute_batch("COMMIT;")?;
            Ok(value)
        });
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if let Err(rollback) = conn.execute_batch("ROLLBACK;") {
                    warn!(
                        error = %rollback,
                        cause = %err,
                        "rollback failed, connection may still hold an open transaction"
                    );
                }
                Err(match err {
                    StorageError::Locked => StorageError::Locked,
                    other => StorageError::TransactionAborted(other.to_string()),
                })
            }
        }
    }

    fn load_difficulty(
        conn: &Connection,
        child_id: &str,
    ) -> Result<HashMap<String, DifficultyTier>, StorageError> {
        let mut stmt =
            conn.prepare("SELECT subject, tier FROM child_difficulty WHERE child_id = ?1")?;
        let rows = stmt.query_map(params![child_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (subject, tier) = row?;
            map.insert(subject, parse_tier("child_difficulty", &tier)?);
        }
        Ok(map)
    }

    fn load_children(
        conn: &Connection,
        filter: Option<&str>,
    ) -> Result<Vec<Child>, StorageError> {
        let mut stmt = conn.prepare(
            "SELECT id, display_name, age_years, language, subscription, created_at
             FROM children
             WHERE ?1 IS NULL OR id = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![filter], |row| {
            let subscription: String = row.get(4)?;
            let created_at: String = row.get(5)?;
            let id: String = row.get(0)?;
            let display_name: String = row.get(1)?;
            let age_years: u8 = row.get(2)?;
            let language: String = row.get(3)?;
            let decode = || -> Result<Child, StorageError> {
                Ok(Child {
                    id,
                    display_name,
                    age_years,
                    language,
                    subscription: Subscription::parse(&subscription).ok_or_else(|| {
                        corrupt("children", format!("unknown subscription '{subscription}'"))
                    })?,
                    difficulty: HashMap::new(),
                    created_at: parse_time("children", &created_at)?,
                })
            };
            Ok(decode())
        })?;
        let mut children = flatten_rows(rows)?;
        for child in &mut children {
            child.difficulty = Self::load_difficulty(conn, &child.id)?;
        }
        Ok(children)
    }
}

impl ProgressStore for SqliteStore {
    fn child(&self, child_id: &str) -> Result<Option<Child>, StorageError> {
        let conn = self.conn()?;
        Ok(Self::load_children(&conn, Some(child_id))?.into_iter().next())
    }

    fn save_child(&self, child: &Child) -> Result<(), StorageError> {
        self.in_transaction(|conn| {
            conn.execute(
                "INSERT INTO children (id, display_name, age_years, language, subscription, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    age_years = excluded.age_years,
                    language = excluded.language,
                    subscription = excluded.subscription",
                params![
                    child.id,
                    child.display_name,
                    child.age_years,
                    child.language,
                    child.subscription.as_str(),
                    format_time(child.created_at),
                ],
            )?;
            conn.execute(
                "DELETE FROM child_difficulty WHERE child_id = ?1",
                params![child.id],
            )?;
            for (subject, tier) in &child.difficulty {
                conn.execute(
                    "INSERT INTO child_difficulty (child_id, subject, tier) VALUES (?1, ?2, ?3)",
                    params![child.id, subject, tier.as_str()],
                )?;
            }
            Ok(())
        })
    }

    fn list_children(&self) -> Result<Vec<Child>, StorageError> {
        let conn = self.conn()?;
        Self::load_children(&conn, None)
    }

    fn set_difficulty(
        &self,
        child_id: &str,
        subject: &str,
        tier: DifficultyTier,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        upsert_difficulty(&conn, child_id, subject, tier)
    }

    fn attempts(&self, child_id: &str) -> Result<Vec<AttemptRecord>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE child_id = ?1 ORDER BY completed_at, seq"
        ))?;
        let rows = stmt.query_map(params![child_id], attempt_from_row)?;
        flatten_rows(rows)
    }

    fn find_submission(
        &self,
        child_id: &str,
        submission_id: &str,
    ) -> Result<Option<AttemptRecord>, StorageError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!(
                    "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE child_id = ?1 AND submission_id = ?2"
                ),
                params![child_id, submission_id],
                attempt_from_row,
            )
            .optional()?;
        found.transpose()
    }

    fn unlock_entries(&self, child_id: &str) -> Result<Vec<UnlockEntry>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT activity_id, reason, unlocked_at FROM unlocks
             WHERE child_id = ?1 ORDER BY unlocked_at, activity_id",
        )?;
        let rows = stmt.query_map(params![child_id], |row| {
            let activity_id: String = row.get(0)?;
            let reason: String = row.get(1)?;
            let unlocked_at: String = row.get(2)?;
            let decode = || -> Result<UnlockEntry, StorageError> {
                Ok(UnlockEntry {
                    activity_id,
                    reason: UnlockReason::parse(&reason)
                        .ok_or_else(|| corrupt("unlocks", format!("unknown reason '{reason}'")))?,
                    unlocked_at: parse_time("unlocks", &unlocked_at)?,
                })
            };
            Ok(decode())
        })?;
        flatten_rows(rows)
    }

    fn earned_achievements(&self, child_id: &str) -> Result<Vec<EarnedAchievement>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT achievement_id, earned_at FROM earned_achievements
             WHERE child_id = ?1 ORDER BY earned_at, achievement_id",
        )?;
        let rows = stmt.query_map(params![child_id], |row| {
            let achievement_id: String = row.get(0)?;
            let earned_at: String = row.get(1)?;
            Ok(parse_time("earned_achievements", &earned_at).map(|earned_at| {
                EarnedAchievement {
                    child_id: child_id.to_string(),
                    achievement_id,
                    earned_at,
                }
            }))
        })?;
        flatten_rows(rows)
    }

    fn streak(&self, child_id: &str) -> Result<Option<StreakState>, StorageError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT current, longest, start_date, last_activity_date FROM streaks
                 WHERE child_id = ?1",
                params![child_id],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(current, longest, start, last)| -> Result<StreakState, StorageError> {
            Ok(StreakState {
                current,
                longest,
                start_date: parse_date(start)?,
                last_activity_date: parse_date(last)?,
            })
        })
        .transpose()
    }

    fn content_fingerprint(&self, child_id: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT fingerprint FROM content_state WHERE child_id = ?1",
                params![child_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn commit_completion(&self, commit: &CompletionCommit) -> Result<(), StorageError> {
        self.in_transaction(|conn| {
            let attempt = &commit.attempt;
            conn.execute(
                &format!(
                    "INSERT INTO attempts ({ATTEMPT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    attempt.id,
                    attempt.child_id,
                    attempt.activity_id,
                    attempt.subject_id,
                    attempt.tier.as_str(),
                    format_time(attempt.completed_at),
                    attempt.error_count,
                    attempt.time_spent_seconds,
                    attempt.total_questions,
                    attempt.correct_answers,
                    attempt.stars.value(),
                    attempt.session_id,
                    attempt.submission_id,
                ],
            )?;

            if let Some((subject, tier)) = &commit.difficulty_change {
                upsert_difficulty(conn, &commit.child_id, subject, *tier)?;
            }

            if commit.reset_unlocks {
                conn.execute("DELETE FROM unlocks WHERE child_id = ?1", params![commit.child_id])?;
            }
            // Unlocks and achievements are monotone; existing rows win.
            for entry in &commit.new_unlocks {
                insert_unlock(conn, &commit.child_id, entry, "INSERT OR IGNORE")?;
            }
            for earned in &commit.new_achievements {
                conn.execute(
                    "INSERT OR IGNORE INTO earned_achievements (child_id, achievement_id, earned_at)
                     VALUES (?1, ?2, ?3)",
                    params![
                        commit.child_id,
                        earned.achievement_id,
                        format_time(earned.earned_at)
                    ],
                )?;
            }

            upsert_streak(conn, &commit.child_id, &commit.streak)?;
            upsert_fingerprint(conn, &commit.child_id, &commit.content_fingerprint)
        })
    }

    fn replace_derived_state(
        &self,
        child_id: &str,
        derived: &DerivedState,
    ) -> Result<(), StorageError> {
        self.in_transaction(|conn| {
            conn.execute("DELETE FROM unlocks WHERE child_id = ?1", params![child_id])?;
            for entry in &derived.unlocks {
                insert_unlock(conn, child_id, entry, "INSERT")?;
            }
            upsert_streak(conn, child_id, &derived.streak)?;
            upsert_fingerprint(conn, child_id, &derived.content_fingerprint)
        })
    }
}

fn upsert_difficulty(
    conn: &Connection,
    child_id: &str,
    subject: &str,
    tier: DifficultyTier,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO child_difficulty (child_id, subject, tier) VALUES (?1, ?2, ?3)
         ON CONFLICT(child_id, subject) DO UPDATE SET tier = excluded.tier",
        params![child_id, subject, tier.as_str()],
    )?;
    Ok(())
}

fn insert_unlock(
    conn: &Connection,
    child_id: &str,
    entry: &UnlockEntry,
    verb: &str,
) -> Result<(), StorageError> {
    conn.execute(
        &format!(
            "{verb} INTO unlocks (child_id, activity_id, reason, unlocked_at)
             VALUES (?1, ?2, ?3, ?4)"
        ),
        params![
            child_id,
            entry.activity_id,
            entry.reason.as_str(),
            format_time(entry.unlocked_at)
        ],
    )?;
    Ok(())
}

fn upsert_streak(conn: &Connection, child_id: &str, streak: &StreakState) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO streaks (child_id, current, longest, start_date, last_activity_date)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(child_id) DO UPDATE SET
            current = excluded.current,
            longest = excluded.longest,
            start_date = excluded.start_date,
            last_activity_date = excluded.last_activity_date",
        params![
            child_id,
            streak.current,
            streak.longest,
            streak.start_date.map(|d| d.to_string()),
            streak.last_activity_date.map(|d| d.to_string()),
        ],
    )?;
    Ok(())
}

fn upsert_fingerprint(conn: &Connection, child_id: &str, fingerprint: &str) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO content_state (child_id, fingerprint) VALUES (?1, ?2)
         ON CONFLICT(child_id) DO UPDATE SET fingerprint = excluded.fingerprint",
        params![child_id, fingerprint],
    )?;
    Ok(())
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<Result<AttemptRecord, StorageError>> {
    let id: String = row.get(0)?;
    let child_id: String = row.get(1)?;
    let activity_id: String = row.get(2)?;
    let subject_id: String = row.get(3)?;
    let tier: String = row.get(4)?;
    let completed_at: String = row.get(5)?;
    let error_count: u32 = row.get(6)?;
    let time_spent_seconds: u32 = row.get(7)?;
    let total_questions: u32 = row.get(8)?;
    let correct_answers: u32 = row.get(9)?;
    let stars: u8 = row.get(10)?;
    let session_id: Option<String> = row.get(11)?;
    let submission_id: Option<String> = row.get(12)?;

    let decode = || -> Result<AttemptRecord, StorageError> {
        Ok(AttemptRecord {
            id,
            child_id,
            activity_id,
            subject_id,
            tier: parse_tier("attempts", &tier)?,
            completed_at: parse_time("attempts", &completed_at)?,
            error_count,
            time_spent_seconds,
            total_questions,
            correct_answers,
            stars: StarRating::try_from(stars).map_err(|e| corrupt("attempts", e.to_string()))?,
            session_id,
            submission_id,
        })
    };
    Ok(decode())
}

fn flatten_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<Result<T, StorageError>>>,
) -> Result<Vec<T>, StorageError> {
    rows.map(|row| row.map_err(StorageError::from).and_then(|decoded| decoded))
        .collect()
}

fn corrupt(table: &str, message: impl Into<String>) -> StorageError {
    StorageError::Corrupt {
        table: table.to_string(),
        message: message.into(),
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(table: &str, value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(table, format!("bad timestamp '{value}': {e}")))
}

fn parse_date(value: Option<String>) -> Result<Option<NaiveDate>, StorageError> {
    value
        .map(|v| {
            v.parse::<NaiveDate>()
                .map_err(|e| corrupt("streaks", format!("bad date '{v}': {e}")))
        })
        .transpose()
}

fn parse_tier(table: &str, value: &str) -> Result<DifficultyTier, StorageError> {
    DifficultyTier::parse(value).ok_or_else(|| corrupt(table, format!("unknown tier '{value}'")))
}
