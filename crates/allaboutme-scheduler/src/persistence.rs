//! SQLite-backed store for scheduled posts, automation logs and settings.
//! Single source of truth shared by every trigger and by the workers.

use allaboutme_core::error::{AllAboutMeError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::logs::{AutomationLog, LogLevel, NewLog};
use crate::posts::{PlatformTargets, PostStatus, ScheduledPost, Transition};

const POST_COLUMNS: &str = "id, scheduled_time, status, script_ref, video_ref, \
     publish_to_telegram, publish_to_youtube, publish_to_tiktok, publish_to_instagram, \
     caption, hashtags, created_at, published_at, error_message";

const LOG_COLUMNS: &str = "id, level, message, details, notified, created_at";

/// Automation database.
pub struct AutomationDb {
    conn: Mutex<Connection>,
}

impl AutomationDb {
    /// Open or create the automation database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| db_err("DB open", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("DB open", e))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AllAboutMeError::Database(format!("Lock: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- One row per planned publication slot
            CREATE TABLE IF NOT EXISTS scheduled_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scheduled_time TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                script_ref INTEGER,
                video_ref INTEGER,
                publish_to_telegram INTEGER NOT NULL DEFAULT 1,
                publish_to_youtube INTEGER NOT NULL DEFAULT 1,
                publish_to_tiktok INTEGER NOT NULL DEFAULT 1,
                publish_to_instagram INTEGER NOT NULL DEFAULT 1,
                caption TEXT,
                hashtags TEXT,
                created_at TEXT NOT NULL,
                published_at TEXT,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_posts_status_time
                ON scheduled_posts (status, scheduled_time);

            -- Append-only automation events
            CREATE TABLE IF NOT EXISTS automation_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                level TEXT NOT NULL,            -- INFO, WARNING, ERROR
                message TEXT NOT NULL,
                details TEXT,
                notified INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_logs_level_notified
                ON automation_logs (level, notified);

            -- Flat key/value settings
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| db_err("Migration", e))?;
        Ok(())
    }

    // ─── Scheduled Posts ──────────────────────────────────────

    /// Insert a day's slots and the summary log entry in one transaction.
    /// Either every row lands or none does.
    pub fn insert_schedule(
        &self,
        times: &[DateTime<Utc>],
        targets: PlatformTargets,
        summary: &NewLog,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| db_err("Begin schedule", e))?;
        let mut ids = Vec::with_capacity(times.len());
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO scheduled_posts
                     (scheduled_time, status, publish_to_telegram, publish_to_youtube,
                      publish_to_tiktok, publish_to_instagram, created_at)
                     VALUES (?1, 'pending', ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(|e| db_err("Prepare insert post", e))?;
            for at in times {
                stmt.execute(params![
                    ts(*at),
                    targets.telegram,
                    targets.youtube,
                    targets.tiktok,
                    targets.instagram,
                    ts(now),
                ])
                .map_err(|e| db_err("Insert post", e))?;
                ids.push(tx.last_insert_rowid());
            }
        }
        insert_log(&tx, summary, now)?;
        tx.commit().map_err(|e| db_err("Commit schedule", e))?;
        Ok(ids)
    }

    /// Due posts that can move forward, earliest first.
    ///
    /// In-progress posts are only returned once their stage has written its
    /// reference back; a stage still in flight is never re-selected.
    pub fn ready_posts(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM scheduled_posts
             WHERE scheduled_time <= ?1
               AND (status = 'pending'
                    OR (status = 'generating_script' AND script_ref IS NOT NULL)
                    OR (status = 'generating_video' AND video_ref IS NOT NULL))
             ORDER BY scheduled_time ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| db_err("Ready posts", e))?;
        let rows = stmt
            .query_map([ts(now)], row_to_post)
            .map_err(|e| db_err("Ready posts", e))?;
        collect(rows, "Ready posts")
    }

    /// Commit status, `published_at` and `error_message` in one UPDATE.
    /// Refuses to touch a post that already reached a terminal state.
    pub fn apply_transition(&self, id: i64, transition: &Transition) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE scheduled_posts
                 SET status = ?1,
                     published_at = COALESCE(?2, published_at),
                     error_message = COALESCE(?3, error_message)
                 WHERE id = ?4 AND status NOT IN ('published', 'failed')",
                params![
                    transition.status.as_str(),
                    transition.published_at.map(ts),
                    transition.error_message,
                    id,
                ],
            )
            .map_err(|e| db_err("Update post", e))?;
        if changed == 0 {
            return Err(AllAboutMeError::InvalidState(format!(
                "Post {id} missing or already terminal"
            )));
        }
        Ok(())
    }

    /// Worker write-back: the script for this slot exists.
    pub fn attach_script(&self, id: i64, script_ref: i64) -> Result<()> {
        self.attach("script_ref", id, script_ref)
    }

    /// Worker write-back: the video for this slot exists.
    pub fn attach_video(&self, id: i64, video_ref: i64) -> Result<()> {
        self.attach("video_ref", id, video_ref)
    }

    fn attach(&self, column: &str, id: i64, value: i64) -> Result<()> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE scheduled_posts SET {column} = ?1 WHERE id = ?2 AND {column} IS NULL"
        );
        let changed = conn
            .execute(&sql, params![value, id])
            .map_err(|e| db_err("Attach ref", e))?;
        if changed == 0 {
            return Err(AllAboutMeError::InvalidState(format!(
                "Post {id} missing or {column} already set"
            )));
        }
        Ok(())
    }

    /// Set caption and hashtags produced by a later stage.
    pub fn set_caption(&self, id: i64, caption: Option<&str>, hashtags: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE scheduled_posts SET caption = ?1, hashtags = ?2 WHERE id = ?3",
            params![caption, hashtags, id],
        )
        .map_err(|e| db_err("Set caption", e))?;
        Ok(())
    }

    /// Get a post by id.
    pub fn get_post(&self, id: i64) -> Result<Option<ScheduledPost>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {POST_COLUMNS} FROM scheduled_posts WHERE id = ?1");
        conn.query_row(&sql, [id], row_to_post)
            .optional()
            .map_err(|e| db_err("Get post", e))
    }

    /// All posts ordered by scheduled time.
    pub fn list_posts(&self) -> Result<Vec<ScheduledPost>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM scheduled_posts ORDER BY scheduled_time ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| db_err("List posts", e))?;
        let rows = stmt
            .query_map([], row_to_post)
            .map_err(|e| db_err("List posts", e))?;
        collect(rows, "List posts")
    }

    /// Posts whose slot falls in `[from, to)`.
    pub fn count_posts_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM scheduled_posts WHERE scheduled_time >= ?1 AND scheduled_time < ?2",
                params![ts(from), ts(to)],
                |r| r.get(0),
            )
            .map_err(|e| db_err("Count posts", e))?;
        Ok(n as usize)
    }

    pub fn count_by_status(&self, status: PostStatus) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM scheduled_posts WHERE status = ?1",
                [status.as_str()],
                |r| r.get(0),
            )
            .map_err(|e| db_err("Count posts", e))?;
        Ok(n as usize)
    }

    pub fn count_published_since(&self, since: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM scheduled_posts WHERE status = 'published' AND published_at >= ?1",
                [ts(since)],
                |r| r.get(0),
            )
            .map_err(|e| db_err("Count published", e))?;
        Ok(n as usize)
    }

    // ─── Automation Logs ──────────────────────────────────────

    /// Append a log entry, `notified = false`.
    pub fn append_log(&self, log: &NewLog, now: DateTime<Utc>) -> Result<i64> {
        let conn = self.lock()?;
        insert_log(&conn, log, now)
    }

    /// Up to `limit` ERROR entries not yet delivered.
    pub fn unnotified_errors(&self, limit: usize) -> Result<Vec<AutomationLog>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM automation_logs
             WHERE level = 'ERROR' AND notified = 0
             ORDER BY id ASC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| db_err("Unnotified errors", e))?;
        let rows = stmt
            .query_map([limit as i64], row_to_log)
            .map_err(|e| db_err("Unnotified errors", e))?;
        collect(rows, "Unnotified errors")
    }

    /// Flip `notified` for the given entries in a single UPDATE.
    pub fn mark_notified(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE automation_logs SET notified = 1 WHERE notified = 0 AND id IN ({placeholders})"
        );
        conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))
            .map_err(|e| db_err("Mark notified", e))
    }

    /// Most recent entries first, optionally filtered by level.
    pub fn recent_logs(&self, limit: usize, level: Option<LogLevel>) -> Result<Vec<AutomationLog>> {
        let conn = self.lock()?;
        let (sql, level_param) = match level {
            Some(l) => (
                format!(
                    "SELECT {LOG_COLUMNS} FROM automation_logs WHERE level = ?2
                     ORDER BY created_at DESC, id DESC LIMIT ?1"
                ),
                Some(l.as_str()),
            ),
            None => (
                format!(
                    "SELECT {LOG_COLUMNS} FROM automation_logs
                     ORDER BY created_at DESC, id DESC LIMIT ?1"
                ),
                None,
            ),
        };
        let mut stmt = conn.prepare(&sql).map_err(|e| db_err("Recent logs", e))?;
        let rows = match level_param {
            Some(l) => stmt.query_map(params![limit as i64, l], row_to_log),
            None => stmt.query_map(params![limit as i64], row_to_log),
        }
        .map_err(|e| db_err("Recent logs", e))?;
        collect(rows, "Recent logs")
    }

    // ─── Settings ──────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value: Option<Option<String>> = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |r| r.get(0))
            .optional()
            .map_err(|e| db_err("Get setting", e))?;
        Ok(value.flatten())
    }

    pub fn set_setting(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, ts(now)],
        )
        .map_err(|e| db_err("Set setting", e))?;
        Ok(())
    }
}

fn insert_log(conn: &Connection, log: &NewLog, now: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO automation_logs (level, message, details, notified, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
        params![log.level.as_str(), log.message, log.details, ts(now)],
    )
    .map_err(|e| db_err("Append log", e))?;
    Ok(conn.last_insert_rowid())
}

/// Fixed-width UTC so lexical order in SQL equals time order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_post(row: &Row<'_>) -> rusqlite::Result<ScheduledPost> {
    let status_str: String = row.get(2)?;
    let status = PostStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown post status '{status_str}'").into(),
        )
    })?;
    let scheduled: String = row.get(1)?;
    let created: String = row.get(11)?;
    let published: Option<String> = row.get(12)?;

    Ok(ScheduledPost {
        id: row.get(0)?,
        scheduled_time: parse_ts(1, &scheduled)?,
        status,
        script_ref: row.get(3)?,
        video_ref: row.get(4)?,
        targets: PlatformTargets {
            telegram: row.get(5)?,
            youtube: row.get(6)?,
            tiktok: row.get(7)?,
            instagram: row.get(8)?,
        },
        caption: row.get(9)?,
        hashtags: row.get(10)?,
        created_at: parse_ts(11, &created)?,
        published_at: published.map(|s| parse_ts(12, &s)).transpose()?,
        error_message: row.get(13)?,
    })
}

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<AutomationLog> {
    let level_str: String = row.get(1)?;
    let level = LogLevel::parse(&level_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown log level '{level_str}'").into(),
        )
    })?;
    let created: String = row.get(5)?;
    Ok(AutomationLog {
        id: row.get(0)?,
        level,
        message: row.get(2)?,
        details: row.get(3)?,
        notified: row.get(4)?,
        created_at: parse_ts(5, &created)?,
    })
}

fn collect<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    context: &str,
) -> Result<Vec<T>> {
    rows.collect::<rusqlite::Result<Vec<T>>>()
        .map_err(|e| db_err(context, e))
}

fn db_err(context: &str, e: rusqlite::Error) -> AllAboutMeError {
    AllAboutMeError::Database(format!("{context}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 22, h, m, 0).unwrap()
    }

    fn seed(db: &AutomationDb, times: &[DateTime<Utc>]) -> Vec<i64> {
        db.insert_schedule(times, PlatformTargets::all(), &NewLog::info("seed"), t(0, 1))
            .unwrap()
    }

    #[test]
    fn test_open_and_migrate() {
        let dir = std::env::temp_dir().join("allaboutme-db-test");
        let db = AutomationDb::open(&dir.join("test.db")).unwrap();
        assert!(db.list_posts().unwrap().is_empty());
        drop(db);
        // Reopening runs the idempotent migration again.
        let db = AutomationDb::open(&dir.join("test.db")).unwrap();
        assert!(db.recent_logs(10, None).unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_insert_schedule_writes_posts_and_summary() {
        let db = AutomationDb::open_in_memory().unwrap();
        let ids = seed(&db, &[t(7, 0), t(8, 42)]);
        assert_eq!(ids.len(), 2);

        let posts = db.list_posts().unwrap();
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|p| p.status == PostStatus::Pending));
        assert!(posts.iter().all(|p| p.script_ref.is_none() && p.video_ref.is_none()));
        assert_eq!(posts[0].targets, PlatformTargets::all());

        let logs = db.recent_logs(10, None).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Info);
        assert!(!logs[0].notified);
    }

    #[test]
    fn test_ready_posts_order_and_filter() {
        let db = AutomationDb::open_in_memory().unwrap();
        // Inserted out of order on purpose.
        let ids = seed(&db, &[t(9, 0), t(7, 0), t(12, 0)]);

        let ready = db.ready_posts(t(10, 0)).unwrap();
        let got: Vec<i64> = ready.iter().map(|p| p.id).collect();
        assert_eq!(got, vec![ids[1], ids[0]]);

        // In-flight without its ref is not selected.
        db.apply_transition(ids[1], &Transition::to(PostStatus::GeneratingScript)).unwrap();
        let ready = db.ready_posts(t(10, 0)).unwrap();
        assert_eq!(ready.iter().map(|p| p.id).collect::<Vec<_>>(), vec![ids[0]]);

        // Once the worker writes back, it is ready again.
        db.attach_script(ids[1], 55).unwrap();
        let ready = db.ready_posts(t(10, 0)).unwrap();
        assert_eq!(ready[0].id, ids[1]);
        assert_eq!(ready[0].script_ref, Some(55));
    }

    #[test]
    fn test_transition_is_atomic_and_terminal_guarded() {
        let db = AutomationDb::open_in_memory().unwrap();
        let ids = seed(&db, &[t(7, 0)]);

        db.apply_transition(ids[0], &Transition::published(t(7, 5))).unwrap();
        let post = db.get_post(ids[0]).unwrap().unwrap();
        assert_eq!(post.status, PostStatus::Published);
        assert_eq!(post.published_at, Some(t(7, 5)));

        let err = db.apply_transition(ids[0], &Transition::failed("late")).unwrap_err();
        assert!(matches!(err, AllAboutMeError::InvalidState(_)));
        let post = db.get_post(ids[0]).unwrap().unwrap();
        assert_eq!(post.status, PostStatus::Published);
        assert!(post.error_message.is_none());
    }

    #[test]
    fn test_attach_only_once() {
        let db = AutomationDb::open_in_memory().unwrap();
        let ids = seed(&db, &[t(7, 0)]);
        db.attach_video(ids[0], 3).unwrap();
        assert!(db.attach_video(ids[0], 4).is_err());
        assert_eq!(db.get_post(ids[0]).unwrap().unwrap().video_ref, Some(3));
        assert!(db.attach_script(999, 1).is_err());
    }

    #[test]
    fn test_unnotified_errors_and_mark() {
        let db = AutomationDb::open_in_memory().unwrap();
        let now = t(10, 0);
        db.append_log(&NewLog::info("ok"), now).unwrap();
        let a = db.append_log(&NewLog::error("a"), now).unwrap();
        let b = db.append_log(&NewLog::error("b").with_details("trace"), now).unwrap();
        db.append_log(&NewLog::warning("w"), now).unwrap();

        let errors = db.unnotified_errors(10).unwrap();
        assert_eq!(errors.iter().map(|l| l.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(db.unnotified_errors(1).unwrap().len(), 1);

        assert_eq!(db.mark_notified(&[a, b]).unwrap(), 2);
        assert!(db.unnotified_errors(10).unwrap().is_empty());
        // Already-notified rows are not counted again.
        assert_eq!(db.mark_notified(&[a]).unwrap(), 0);
        assert_eq!(db.mark_notified(&[]).unwrap(), 0);
    }

    #[test]
    fn test_recent_logs_filter() {
        let db = AutomationDb::open_in_memory().unwrap();
        db.append_log(&NewLog::info("first"), t(9, 0)).unwrap();
        db.append_log(&NewLog::error("second"), t(9, 1)).unwrap();
        db.append_log(&NewLog::info("third"), t(9, 2)).unwrap();

        let all = db.recent_logs(50, None).unwrap();
        assert_eq!(all[0].message, "third");
        let errors = db.recent_logs(50, Some(LogLevel::Error)).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "second");
        assert_eq!(db.recent_logs(2, None).unwrap().len(), 2);
    }

    #[test]
    fn test_settings_upsert() {
        let db = AutomationDb::open_in_memory().unwrap();
        assert_eq!(db.get_setting("daily_videos").unwrap(), None);
        db.set_setting("daily_videos", "6", t(1, 0)).unwrap();
        db.set_setting("daily_videos", "8", t(1, 1)).unwrap();
        assert_eq!(db.get_setting("daily_videos").unwrap().as_deref(), Some("8"));
    }

    #[test]
    fn test_counts() {
        let db = AutomationDb::open_in_memory().unwrap();
        let ids = seed(&db, &[t(7, 0), t(8, 0), t(23, 0)]);
        assert_eq!(db.count_posts_between(t(0, 0), t(0, 0) + Duration::days(1)).unwrap(), 3);
        assert_eq!(db.count_posts_between(t(7, 30), t(23, 0)).unwrap(), 1);
        assert_eq!(db.count_by_status(PostStatus::Pending).unwrap(), 3);

        db.apply_transition(ids[0], &Transition::published(t(7, 10))).unwrap();
        assert_eq!(db.count_published_since(t(0, 0)).unwrap(), 1);
        assert_eq!(db.count_published_since(t(8, 0)).unwrap(), 0);
    }

    #[test]
    fn test_caption() {
        let db = AutomationDb::open_in_memory().unwrap();
        let ids = seed(&db, &[t(7, 0)]);
        db.set_caption(ids[0], Some("Mercury retrograde"), Some("#astro")).unwrap();
        let post = db.get_post(ids[0]).unwrap().unwrap();
        assert_eq!(post.caption.as_deref(), Some("Mercury retrograde"));
        assert_eq!(post.hashtags.as_deref(), Some("#astro"));
    }
}
