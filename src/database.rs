//! Submission store backed by SQLite
//!
//! Holds challenges and their test cases, submission records with per-case
//! verdicts, per-user completion state and reward totals. The completion
//! table's composite primary key is what makes the first-completion reward
//! grant at-most-once per (user, challenge) pair across concurrent requests.

use std::fs;
use std::path::{Path, PathBuf};

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::ChallengeSeed;
use crate::create_timestamp;

const DATABASE_NAME: &str = "codequest.sqlite3";

#[derive(Debug, Clone)]
pub struct ChallengeRecord {
    pub id: i64,
    pub title: String,
    pub instructions: String,
    pub difficulty: String,
    pub category: String,
    pub xp_reward: i64,
    pub coin_reward: i64,
    pub time_limit_ms: Option<i64>,
    pub memory_limit_mb: Option<i64>,
    pub success_rate: i64,
}

#[derive(Debug, Clone)]
pub struct TestCaseRecord {
    pub id: i64,
    pub challenge_id: i64,
    pub position: i64,
    pub input: String,
    pub expected_output: String,
    pub hidden: bool,
    pub time_limit_ms: Option<i64>,
    pub memory_limit_mb: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub xp: i64,
    pub coins: i64,
}

/// One persisted per-case verdict row
#[derive(Debug, Clone)]
pub struct SubmissionCaseRow {
    pub case_index: i64,
    pub test_case_id: i64,
    pub passed: bool,
    pub output: String,
    pub expected_output: String,
    pub execution_time_ms: i64,
    pub error: Option<String>,
    pub hidden: bool,
}

#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub id: i64,
    pub user_id: i64,
    pub challenge_id: i64,
    pub language: String,
    pub status: String,
    pub score: i64,
    pub execution_time_ms: i64,
    pub error: Option<String>,
    pub cases: Vec<SubmissionCaseRow>,
}

pub fn get_db_path() -> PathBuf {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "codequest").expect("Unable to find user directory");
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).expect("Failed to create local data dir");

    data_dir.join(DATABASE_NAME)
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .connect(&db_url)
        .await?;

    // PRAGMA statements cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;", // 2 seconds timeout for lock contention
        "PRAGMA journal_mode = WAL;",  // Write-Ahead Logging for better concurrency
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS users (
            id            INTEGER PRIMARY KEY,
            name          TEXT    NOT NULL UNIQUE,
            xp            INTEGER NOT NULL DEFAULT 0,
            coins         INTEGER NOT NULL DEFAULT 0
        );",
        r"
        CREATE TABLE IF NOT EXISTS challenges (
            id                      INTEGER PRIMARY KEY,
            title                   TEXT    NOT NULL,
            instructions            TEXT    NOT NULL DEFAULT '',
            difficulty              TEXT    NOT NULL DEFAULT 'easy',
            category                TEXT    NOT NULL DEFAULT 'general',
            xp_reward               INTEGER NOT NULL DEFAULT 0,
            coin_reward             INTEGER NOT NULL DEFAULT 0,
            time_limit_ms           INTEGER,
            memory_limit_mb         INTEGER,
            total_submissions       INTEGER NOT NULL DEFAULT 0,
            successful_submissions  INTEGER NOT NULL DEFAULT 0,
            success_rate            INTEGER NOT NULL DEFAULT 0
        );",
        r"
        CREATE TABLE IF NOT EXISTS test_cases (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            challenge_id    INTEGER NOT NULL,
            position        INTEGER NOT NULL,
            input           TEXT    NOT NULL,
            expected_output TEXT    NOT NULL,
            hidden          INTEGER NOT NULL DEFAULT 0,
            time_limit_ms   INTEGER,
            memory_limit_mb INTEGER,
            UNIQUE (challenge_id, position),
            FOREIGN KEY (challenge_id) REFERENCES challenges (id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS submissions (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id           INTEGER NOT NULL,
            challenge_id      INTEGER NOT NULL,
            language          TEXT    NOT NULL,
            source_code       TEXT    NOT NULL,
            status            TEXT    NOT NULL,
            score             INTEGER NOT NULL DEFAULT 0,
            execution_time_ms INTEGER NOT NULL DEFAULT 0,
            error             TEXT,
            created_time      TEXT    NOT NULL,
            updated_time      TEXT    NOT NULL,
            FOREIGN KEY (user_id)      REFERENCES users (id),
            FOREIGN KEY (challenge_id) REFERENCES challenges (id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS submission_case (
            submission_id     INTEGER NOT NULL,
            case_index        INTEGER NOT NULL,
            test_case_id      INTEGER NOT NULL,
            passed            INTEGER NOT NULL,
            output            TEXT    NOT NULL DEFAULT '',
            expected_output   TEXT    NOT NULL DEFAULT '',
            execution_time_ms INTEGER NOT NULL DEFAULT 0,
            error             TEXT,
            hidden            INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (submission_id, case_index),
            FOREIGN KEY (submission_id) REFERENCES submissions (id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS completions (
            user_id        INTEGER NOT NULL,
            challenge_id   INTEGER NOT NULL,
            completed_time TEXT    NOT NULL,
            PRIMARY KEY (user_id, challenge_id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS notifications (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id      INTEGER NOT NULL,
            message      TEXT    NOT NULL,
            created_time TEXT    NOT NULL
        );",
        "INSERT OR IGNORE INTO users (id, name) VALUES (0, 'root');",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // Remove WAL and SHM files (ignore errors as they might not exist)
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = std::fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

/// Upserts one seeded challenge and replaces its test cases
pub async fn upsert_challenge(pool: &SqlitePool, seed: &ChallengeSeed) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r"
        INSERT INTO challenges
            (id, title, instructions, difficulty, category, xp_reward, coin_reward,
             time_limit_ms, memory_limit_mb)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            title = excluded.title,
            instructions = excluded.instructions,
            difficulty = excluded.difficulty,
            category = excluded.category,
            xp_reward = excluded.xp_reward,
            coin_reward = excluded.coin_reward,
            time_limit_ms = excluded.time_limit_ms,
            memory_limit_mb = excluded.memory_limit_mb
        ",
    )
    .bind(seed.id)
    .bind(&seed.title)
    .bind(&seed.instructions)
    .bind(&seed.difficulty)
    .bind(&seed.category)
    .bind(seed.xp_reward)
    .bind(seed.coin_reward)
    .bind(seed.time_limit_ms)
    .bind(seed.memory_limit_mb)
    .execute(tx.as_mut())
    .await?;

    sqlx::query("DELETE FROM test_cases WHERE challenge_id = ?")
        .bind(seed.id)
        .execute(tx.as_mut())
        .await?;

    for (position, case) in seed.cases.iter().enumerate() {
        sqlx::query(
            r"
            INSERT INTO test_cases
                (challenge_id, position, input, expected_output, hidden,
                 time_limit_ms, memory_limit_mb)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(seed.id)
        .bind(position as i64)
        .bind(&case.input)
        .bind(&case.expected_output)
        .bind(case.hidden)
        .bind(case.time_limit_ms)
        .bind(case.memory_limit_mb)
        .execute(tx.as_mut())
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn fetch_challenge(
    pool: &SqlitePool,
    id: i64,
) -> sqlx::Result<Option<ChallengeRecord>> {
    let row = sqlx::query(
        r"
        SELECT id, title, instructions, difficulty, category, xp_reward, coin_reward,
               time_limit_ms, memory_limit_mb, success_rate
        FROM challenges
        WHERE id = ?
        ",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(ChallengeRecord {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            instructions: row.try_get("instructions")?,
            difficulty: row.try_get("difficulty")?,
            category: row.try_get("category")?,
            xp_reward: row.try_get("xp_reward")?,
            coin_reward: row.try_get("coin_reward")?,
            time_limit_ms: row.try_get("time_limit_ms")?,
            memory_limit_mb: row.try_get("memory_limit_mb")?,
            success_rate: row.try_get("success_rate")?,
        })
    })
    .transpose()
}

/// Fetches a challenge's test cases in ordinal order
pub async fn fetch_test_cases(
    pool: &SqlitePool,
    challenge_id: i64,
) -> sqlx::Result<Vec<TestCaseRecord>> {
    let rows = sqlx::query(
        r"
        SELECT id, challenge_id, position, input, expected_output, hidden,
               time_limit_ms, memory_limit_mb
        FROM test_cases
        WHERE challenge_id = ?
        ORDER BY position
        ",
    )
    .bind(challenge_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(TestCaseRecord {
                id: row.try_get("id")?,
                challenge_id: row.try_get("challenge_id")?,
                position: row.try_get("position")?,
                input: row.try_get("input")?,
                expected_output: row.try_get("expected_output")?,
                hidden: row.try_get("hidden")?,
                time_limit_ms: row.try_get("time_limit_ms")?,
                memory_limit_mb: row.try_get("memory_limit_mb")?,
            })
        })
        .collect()
}

pub async fn find_user(pool: &SqlitePool, id: i64) -> sqlx::Result<bool> {
    let result = sqlx::query("SELECT 1 FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(result.is_some())
}

pub async fn fetch_user(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<UserRecord>> {
    let row = sqlx::query("SELECT id, name, xp, coins FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(|row| {
        Ok(UserRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            xp: row.try_get("xp")?,
            coins: row.try_get("coins")?,
        })
    })
    .transpose()
}

/// Creates a user with the next free ID
pub async fn create_user(pool: &SqlitePool, name: &str) -> sqlx::Result<UserRecord> {
    let row = sqlx::query("SELECT COALESCE(MAX(id) + 1, 0) AS next_id FROM users")
        .fetch_one(pool)
        .await?;
    let new_id: i64 = row.try_get("next_id")?;

    sqlx::query("INSERT INTO users (id, name) VALUES (?, ?)")
        .bind(new_id)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(UserRecord {
        id: new_id,
        name: name.to_string(),
        xp: 0,
        coins: 0,
    })
}

/// Inserts the pending submission record evaluation will finalize
pub async fn create_submission(
    pool: &SqlitePool,
    user_id: i64,
    challenge_id: i64,
    language: &str,
    source_code: &str,
) -> sqlx::Result<i64> {
    let now = create_timestamp();
    let result = sqlx::query(
        r"
        INSERT INTO submissions
            (user_id, challenge_id, language, source_code, status, created_time, updated_time)
        VALUES (?, ?, ?, ?, 'pending', ?, ?)
        ",
    )
    .bind(user_id)
    .bind(challenge_id)
    .bind(language)
    .bind(source_code)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Writes the terminal status, score and per-case verdicts in one transaction
pub async fn save_verdict(
    pool: &SqlitePool,
    submission_id: i64,
    status: &str,
    score: i64,
    execution_time_ms: i64,
    error: Option<&str>,
    cases: &[SubmissionCaseRow],
) -> sqlx::Result<()> {
    let now = create_timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r"
        UPDATE submissions
        SET status = ?, score = ?, execution_time_ms = ?, error = ?, updated_time = ?
        WHERE id = ?
        ",
    )
    .bind(status)
    .bind(score)
    .bind(execution_time_ms)
    .bind(error)
    .bind(&now)
    .bind(submission_id)
    .execute(tx.as_mut())
    .await?;

    for case in cases {
        sqlx::query(
            r"
            INSERT INTO submission_case
                (submission_id, case_index, test_case_id, passed, output,
                 expected_output, execution_time_ms, error, hidden)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(submission_id)
        .bind(case.case_index)
        .bind(case.test_case_id)
        .bind(case.passed)
        .bind(&case.output)
        .bind(&case.expected_output)
        .bind(case.execution_time_ms)
        .bind(case.error.as_deref())
        .bind(case.hidden)
        .execute(tx.as_mut())
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Best-effort finalization when orchestration itself faults
pub async fn mark_system_error(
    pool: &SqlitePool,
    submission_id: i64,
    message: &str,
) -> sqlx::Result<()> {
    let now = create_timestamp();
    sqlx::query(
        "UPDATE submissions SET status = 'system_error', error = ?, updated_time = ? WHERE id = ?",
    )
    .bind(message)
    .bind(&now)
    .bind(submission_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_submission(
    pool: &SqlitePool,
    id: i64,
) -> sqlx::Result<Option<SubmissionRecord>> {
    let row = sqlx::query(
        r"
        SELECT id, user_id, challenge_id, language, status, score, execution_time_ms, error
        FROM submissions
        WHERE id = ?
        ",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let case_rows = sqlx::query(
        r"
        SELECT case_index, test_case_id, passed, output, expected_output,
               execution_time_ms, error, hidden
        FROM submission_case
        WHERE submission_id = ?
        ORDER BY case_index
        ",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let mut cases = Vec::with_capacity(case_rows.len());
    for case in case_rows {
        cases.push(SubmissionCaseRow {
            case_index: case.try_get("case_index")?,
            test_case_id: case.try_get("test_case_id")?,
            passed: case.try_get("passed")?,
            output: case.try_get("output")?,
            expected_output: case.try_get("expected_output")?,
            execution_time_ms: case.try_get("execution_time_ms")?,
            error: case.try_get("error")?,
            hidden: case.try_get("hidden")?,
        });
    }

    Ok(Some(SubmissionRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        challenge_id: row.try_get("challenge_id")?,
        language: row.try_get("language")?,
        status: row.try_get("status")?,
        score: row.try_get("score")?,
        execution_time_ms: row.try_get("execution_time_ms")?,
        error: row.try_get("error")?,
        cases,
    }))
}

pub async fn has_completed(
    pool: &SqlitePool,
    user_id: i64,
    challenge_id: i64,
) -> sqlx::Result<bool> {
    let result = sqlx::query("SELECT 1 FROM completions WHERE user_id = ? AND challenge_id = ?")
        .bind(user_id)
        .bind(challenge_id)
        .fetch_optional(pool)
        .await?;
    Ok(result.is_some())
}

/// Records a completion; returns whether this call inserted the row.
///
/// `INSERT OR IGNORE` against the composite primary key is the conditional
/// write that keeps reward granting at-most-once under concurrency.
pub async fn record_completion(
    pool: &SqlitePool,
    user_id: i64,
    challenge_id: i64,
) -> sqlx::Result<bool> {
    let now = create_timestamp();
    let result = sqlx::query(
        "INSERT OR IGNORE INTO completions (user_id, challenge_id, completed_time) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(challenge_id)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn grant_rewards(
    pool: &SqlitePool,
    user_id: i64,
    xp: i64,
    coins: i64,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE users SET xp = xp + ?, coins = coins + ? WHERE id = ?")
        .bind(xp)
        .bind(coins)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Boundary to the notification collaborator: a queued row, not delivery
pub async fn record_notification(
    pool: &SqlitePool,
    user_id: i64,
    message: &str,
) -> sqlx::Result<()> {
    let now = create_timestamp();
    sqlx::query("INSERT INTO notifications (user_id, message, created_time) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(message)
        .bind(&now)
        .execute(pool)
        .await?;
    Ok(())
}

/// Folds one terminal submission into the challenge's success-rate statistic
pub async fn bump_challenge_stats(
    pool: &SqlitePool,
    challenge_id: i64,
    success: bool,
) -> sqlx::Result<()> {
    let successful = if success { 1 } else { 0 };
    sqlx::query(
        r"
        UPDATE challenges
        SET total_submissions = total_submissions + 1,
            successful_submissions = successful_submissions + ?,
            success_rate = CAST(ROUND(
                100.0 * (successful_submissions + ?) / (total_submissions + 1)
            ) AS INTEGER)
        WHERE id = ?
        ",
    )
    .bind(successful)
    .bind(successful)
    .bind(challenge_id)
    .execute(pool)
    .await?;
    Ok(())
}
