use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::{ProblemConfig, UserConfig};
use crate::coordinator::{Persistence, ProblemStore, UserStore};
use crate::model::{Judgement, Limits, Submission, TestCase, Verdict};

const DATABASE_NAME: &str = "oj.sqlite3";

pub fn get_db_path() -> anyhow::Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs =
        ProjectDirs::from("", "", "oj").context("Unable to find user directory")?;
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).context("Failed to create local data dir")?;

    Ok(data_dir.join(DATABASE_NAME))
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    // rwc = read/write/create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .connect(&db_url)
        .await?;

    // PRAGMA statements cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;",
        "PRAGMA journal_mode = WAL;",
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS users (
            id             INTEGER  PRIMARY KEY,
            name           TEXT     NOT NULL UNIQUE,
            solved_count   INTEGER  NOT NULL DEFAULT 0
        );",
        r"
        CREATE TABLE IF NOT EXISTS problems (
            id               INTEGER  PRIMARY KEY,
            name             TEXT     NOT NULL,
            time_limit_ms    INTEGER  NOT NULL,
            memory_limit_kb  INTEGER  NOT NULL
        );",
        r"
        CREATE TABLE IF NOT EXISTS test_cases (
            id               INTEGER  PRIMARY KEY AUTOINCREMENT,
            problem_id       INTEGER  NOT NULL,
            input            TEXT     NOT NULL,
            expected_output  TEXT     NOT NULL,
            FOREIGN KEY (problem_id)  REFERENCES problems (id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS submissions (
            id             INTEGER  PRIMARY KEY AUTOINCREMENT,
            user_id        INTEGER  NOT NULL,
            problem_id     INTEGER  NOT NULL,
            language       TEXT     NOT NULL,
            source_code    TEXT     NOT NULL,
            submitted_at   TEXT     NOT NULL,
            FOREIGN KEY (user_id)     REFERENCES users (id),
            FOREIGN KEY (problem_id)  REFERENCES problems (id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS judgements (
            id             INTEGER  PRIMARY KEY AUTOINCREMENT,
            user_id        INTEGER  NOT NULL,
            submission_id  INTEGER  NOT NULL UNIQUE,
            problem_id     INTEGER  NOT NULL,
            verdict        INTEGER  NOT NULL,
            runtime_ms     INTEGER  NOT NULL,
            memory_kb      INTEGER  NOT NULL,
            output         TEXT     NOT NULL DEFAULT '',
            FOREIGN KEY (submission_id)  REFERENCES submissions (id)
        );",
        "CREATE INDEX IF NOT EXISTS idx_test_cases_problem ON test_cases(problem_id);",
        r"
        CREATE INDEX IF NOT EXISTS idx_judgements_solved
            ON judgements(user_id, problem_id, verdict);",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // WAL and SHM files may not exist
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

/// Upserts the configured users and problems.
///
/// A seeded problem's test cases are replaced wholesale by the configured
/// ones; solved counts of existing users are kept.
pub async fn seed(
    pool: &SqlitePool,
    users: &[UserConfig],
    problems: &[ProblemConfig],
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    for user in users {
        sqlx::query(
            r"
            INSERT INTO users (id, name) VALUES (?, ?)
            ON CONFLICT (id) DO UPDATE SET name = excluded.name
            ",
        )
        .bind(user.id)
        .bind(&user.name)
        .execute(tx.as_mut())
        .await?;
    }

    for problem in problems {
        sqlx::query(
            r"
            INSERT INTO problems (id, name, time_limit_ms, memory_limit_kb) VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                time_limit_ms = excluded.time_limit_ms,
                memory_limit_kb = excluded.memory_limit_kb
            ",
        )
        .bind(problem.id)
        .bind(&problem.name)
        .bind(i64::from(problem.time_limit.0))
        .bind(i64::from(problem.memory_limit.0))
        .execute(tx.as_mut())
        .await?;

        sqlx::query("DELETE FROM test_cases WHERE problem_id = ?")
            .bind(problem.id)
            .execute(tx.as_mut())
            .await?;

        for (idx, case) in problem.cases.iter().enumerate() {
            let (input, expected) = case
                .load()
                .with_context(|| format!("failed to load case {idx} of problem {}", problem.id))?;
            sqlx::query(
                "INSERT INTO test_cases (problem_id, input, expected_output) VALUES (?, ?, ?)",
            )
            .bind(problem.id)
            .bind(input)
            .bind(expected)
            .execute(tx.as_mut())
            .await?;
        }
    }

    tx.commit().await?;
    log::info!(
        "Seeded {} users and {} problems",
        users.len(),
        problems.len()
    );
    Ok(())
}

/// Problem, user and judgement storage backed by SQLite
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn solved_count(&self, user_id: i64) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT solved_count FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
    }
}

#[async_trait]
impl ProblemStore for SqliteStore {
    async fn problem_exists(&self, problem_id: i64) -> anyhow::Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM problems WHERE id = ?")
            .bind(problem_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn test_cases(&self, problem_id: i64) -> anyhow::Result<Vec<TestCase>> {
        let cases = sqlx::query_as::<_, TestCase>(
            r"
            SELECT id AS test_id, problem_id, input, expected_output
            FROM test_cases
            WHERE problem_id = ?
            ORDER BY id
            ",
        )
        .bind(problem_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(cases)
    }

    async fn limits(&self, problem_id: i64) -> anyhow::Result<Limits> {
        let (time_limit_ms, memory_limit_kb): (i64, i64) = sqlx::query_as(
            "SELECT time_limit_ms, memory_limit_kb FROM problems WHERE id = ?",
        )
        .bind(problem_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Limits {
            time_limit_ms: u32::try_from(time_limit_ms)?,
            memory_limit_kb: u32::try_from(memory_limit_kb)?,
        })
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn user_exists(&self, user_id: i64) -> anyhow::Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn increment_solved_count(&self, user_id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET solved_count = solved_count + 1 WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn save_submission(&self, submission: &Submission) -> anyhow::Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO submissions (user_id, problem_id, language, source_code, submitted_at)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(submission.user_id)
        .bind(submission.problem_id)
        .bind(submission.language.to_string())
        .bind(&submission.source_code)
        .bind(&submission.submitted_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn save_judgement(&self, judgement: &Judgement) -> anyhow::Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO judgements
                (user_id, submission_id, problem_id, verdict, runtime_ms, memory_kb, output)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(judgement.user_id)
        .bind(judgement.submission_id)
        .bind(judgement.problem_id)
        .bind(judgement.verdict.code())
        .bind(i64::from(judgement.runtime_ms))
        .bind(i64::from(judgement.memory_kb))
        .bind(&judgement.output)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn find_prior_accepted(&self, user_id: i64, problem_id: i64) -> anyhow::Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM judgements WHERE user_id = ? AND problem_id = ? AND verdict = ? LIMIT 1",
        )
        .bind(user_id)
        .bind(problem_id)
        .bind(Verdict::Accepted.code())
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }
}
