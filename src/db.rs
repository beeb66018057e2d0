use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Result, Row};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::models::{DrillEntry, ProgressRecord, ProgressStatus, Topic, Week};
use crate::store::{ProgressStore, Syllabus};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const PROGRESS_COLUMNS: &str = "topic_id, status, difficulty, accuracy_pct, completed_on, \
                                next_review_on, week_tag, urgent_flag";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // In-memory databases answer "memory" and stay that way
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(journal_mode = %mode, "opened database");
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                topic_id INTEGER PRIMARY KEY CHECK(topic_id > 0),
                area TEXT NOT NULL,
                title TEXT NOT NULL,
                week_tag TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS progress (
                topic_id INTEGER PRIMARY KEY,
                status TEXT NOT NULL CHECK(status IN ('not_started', 'completed')),
                difficulty INTEGER NOT NULL DEFAULT 0 CHECK(difficulty BETWEEN 0 AND 5),
                accuracy_pct REAL NOT NULL DEFAULT 0,
                completed_on TEXT,
                next_review_on TEXT NOT NULL,
                week_tag TEXT NOT NULL DEFAULT '',
                urgent_flag INTEGER NOT NULL DEFAULT 0
            );

            -- Timed question drills, kept for reporting only
            CREATE TABLE IF NOT EXISTS speed_drill_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                drilled_on TEXT NOT NULL,
                topic_id INTEGER,
                accuracy_pct REAL NOT NULL,
                elapsed_minutes REAL NOT NULL,
                question_count INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_progress_next_review ON progress(next_review_on);
            CREATE INDEX IF NOT EXISTS idx_topics_week ON topics(week_tag);
            CREATE INDEX IF NOT EXISTS idx_drills_date ON speed_drill_history(drilled_on);
            "#,
        )?;

        // Run migrations for existing databases
        self.migrate()?;

        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_progress_urgent ON progress(urgent_flag);",
        )?;

        Ok(())
    }

    // Databases created before the diagnosis override have no urgent_flag column
    fn migrate(&self) -> Result<()> {
        let has_urgent_flag: bool = self
            .conn
            .prepare("SELECT urgent_flag FROM progress LIMIT 1")
            .is_ok();

        if !has_urgent_flag {
            debug!("adding urgent_flag column to progress");
            self.conn.execute_batch(
                "ALTER TABLE progress ADD COLUMN urgent_flag INTEGER NOT NULL DEFAULT 0;",
            )?;
        }

        Ok(())
    }

    // Topic operations
    pub fn add_topic(&self, topic: &Topic) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO topics (topic_id, area, title, week_tag)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(topic_id) DO UPDATE SET
                area = excluded.area,
                title = excluded.title,
                week_tag = excluded.week_tag
            "#,
            params![topic.topic_id, topic.area, topic.title, topic.week_tag],
        )?;
        Ok(())
    }

    /// Inserts or replaces every topic in one transaction. Either all rows
    /// land or none do.
    pub fn import_topics(&self, topics: &[Topic]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for topic in topics {
            self.add_topic(topic)?;
        }
        tx.commit()?;
        debug!(count = topics.len(), "imported syllabus topics");
        Ok(topics.len())
    }

    pub fn get_topic(&self, topic_id: i64) -> Result<Option<Topic>> {
        let mut stmt = self.conn.prepare(
            "SELECT topic_id, area, title, week_tag FROM topics WHERE topic_id = ?1",
        )?;

        let topic = stmt.query_row(params![topic_id], topic_from_row);

        match topic {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn list_topics(&self, week_filter: Option<&str>) -> Result<Vec<Topic>> {
        let topics = if let Some(week) = week_filter {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT topic_id, area, title, week_tag
                FROM topics
                WHERE week_tag = ?1
                ORDER BY topic_id
                "#,
            )?;
            let rows = stmt.query_map(params![week], topic_from_row)?;
            rows.collect::<Result<Vec<_>>>()?
        } else {
            let mut stmt = self
                .conn
                .prepare("SELECT topic_id, area, title, week_tag FROM topics ORDER BY topic_id")?;
            let rows = stmt.query_map([], topic_from_row)?;
            rows.collect::<Result<Vec<_>>>()?
        };

        Ok(topics)
    }

    pub fn list_weeks(&self) -> Result<Vec<Week>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT t.week_tag,
                   COUNT(t.topic_id) AS topic_count,
                   COUNT(CASE WHEN p.status = 'completed' THEN 1 END) AS completed
            FROM topics t
            LEFT JOIN progress p ON t.topic_id = p.topic_id
            GROUP BY t.week_tag
            ORDER BY MIN(t.topic_id)
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Week {
                week_tag: row.get(0)?,
                topic_count: row.get(1)?,
                completed: row.get(2)?,
            })
        })?;
        let weeks = rows.collect::<Result<Vec<_>>>()?;

        Ok(weeks)
    }

    // Progress operations
    pub fn get_progress(&self, topic_id: i64) -> Result<Option<ProgressRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM progress WHERE topic_id = ?1",
            PROGRESS_COLUMNS
        ))?;

        let progress = stmt.query_row(params![topic_id], progress_from_row);

        match progress {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// A single statement, so SQLite applies it atomically.
    pub fn upsert_progress(&self, record: &ProgressRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                r#"
                INSERT INTO progress ({})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(topic_id) DO UPDATE SET
                    status = excluded.status,
                    difficulty = excluded.difficulty,
                    accuracy_pct = excluded.accuracy_pct,
                    completed_on = excluded.completed_on,
                    next_review_on = excluded.next_review_on,
                    week_tag = excluded.week_tag,
                    urgent_flag = excluded.urgent_flag
                "#,
                PROGRESS_COLUMNS
            ),
            params![
                record.topic_id,
                record.status.as_str(),
                record.difficulty,
                record.accuracy_pct,
                record.completed_on,
                record.next_review_on,
                record.week_tag,
                record.urgent_flag
            ],
        )?;
        Ok(())
    }

    // Dates are stored as YYYY-MM-DD text, so the comparison is lexicographic
    pub fn get_due_progress(&self, as_of: NaiveDate) -> Result<Vec<ProgressRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM progress WHERE next_review_on <= ?1 ORDER BY next_review_on, topic_id",
            PROGRESS_COLUMNS
        ))?;

        let rows = stmt.query_map(params![as_of], progress_from_row)?;
        let records = rows.collect::<Result<Vec<_>>>()?;
        debug!(%as_of, count = records.len(), "due query");

        Ok(records)
    }

    pub fn list_progress(&self) -> Result<Vec<ProgressRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM progress ORDER BY topic_id",
            PROGRESS_COLUMNS
        ))?;

        let rows = stmt.query_map([], progress_from_row)?;
        let records = rows.collect::<Result<Vec<_>>>()?;

        Ok(records)
    }

    // Speed drill log
    pub fn log_drill(
        &self,
        drilled_on: NaiveDate,
        topic_id: Option<i64>,
        accuracy_pct: f64,
        elapsed_minutes: f64,
        question_count: u32,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO speed_drill_history
                (drilled_on, topic_id, accuracy_pct, elapsed_minutes, question_count)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![drilled_on, topic_id, accuracy_pct, elapsed_minutes, question_count],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_drills(&self, limit: usize) -> Result<Vec<DrillEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, drilled_on, topic_id, accuracy_pct, elapsed_minutes, question_count
            FROM speed_drill_history
            ORDER BY drilled_on DESC, id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(DrillEntry {
                id: row.get(0)?,
                drilled_on: row.get(1)?,
                topic_id: row.get(2)?,
                accuracy_pct: row.get(3)?,
                elapsed_minutes: row.get(4)?,
                question_count: row.get(5)?,
            })
        })?;
        let drills = rows.collect::<Result<Vec<_>>>()?;

        Ok(drills)
    }
}

fn topic_from_row(row: &Row) -> Result<Topic> {
    Ok(Topic {
        topic_id: row.get(0)?,
        area: row.get(1)?,
        title: row.get(2)?,
        week_tag: row.get(3)?,
    })
}

fn progress_from_row(row: &Row) -> Result<ProgressRecord> {
    let status_str: String = row.get(1)?;
    let status = ProgressStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("unknown progress status '{}'", status_str).into(),
        )
    })?;

    Ok(ProgressRecord {
        topic_id: row.get(0)?,
        status,
        difficulty: row.get(2)?,
        accuracy_pct: row.get(3)?,
        completed_on: row.get(4)?,
        next_review_on: row.get(5)?,
        week_tag: row.get(6)?,
        urgent_flag: row.get(7)?,
    })
}

impl ProgressStore for Database {
    fn get(&self, topic_id: i64) -> crate::Result<Option<ProgressRecord>> {
        Ok(self.get_progress(topic_id)?)
    }

    fn upsert(&self, record: &ProgressRecord) -> crate::Result<()> {
        Ok(self.upsert_progress(record)?)
    }

    fn get_due(&self, as_of: NaiveDate) -> crate::Result<Vec<ProgressRecord>> {
        Ok(self.get_due_progress(as_of)?)
    }

    fn get_all(&self) -> crate::Result<Vec<ProgressRecord>> {
        Ok(self.list_progress()?)
    }
}

impl Syllabus for Database {
    fn topic_by_id(&self, topic_id: i64) -> crate::Result<Option<Topic>> {
        Ok(self.get_topic(topic_id)?)
    }

    fn topics_in_week(&self, week_tag: &str) -> crate::Result<Vec<Topic>> {
        Ok(self.list_topics(Some(week_tag))?)
    }
}
