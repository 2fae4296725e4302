//! Schema bootstrap
//!
//! Creates the tables, indexes and aggregate triggers when they are missing.
//! `videos.avg_sentiment` belongs to the storage layer: triggers recompute it
//! as the relevance-weighted mean sentiment whenever comment scores change.
//! PostgreSQL additionally passes the mean through a logistic squash.

use crate::errors::Result;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};
use tracing::debug;

const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS videos (
        video_id BIGINT PRIMARY KEY,
        bvid VARCHAR(12) NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        cover_url TEXT,
        owner_name TEXT,
        owner_face TEXT,
        view_count BIGINT NOT NULL DEFAULT 0,
        like_count BIGINT NOT NULL DEFAULT 0,
        danmaku_count BIGINT NOT NULL DEFAULT 0,
        avg_sentiment DOUBLE PRECISION,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        rpid BIGINT PRIMARY KEY,
        video_id BIGINT NOT NULL REFERENCES videos(video_id) ON DELETE CASCADE,
        parent_id BIGINT REFERENCES comments(rpid) ON DELETE SET NULL
            DEFERRABLE INITIALLY IMMEDIATE,
        uname TEXT NOT NULL,
        content TEXT NOT NULL,
        sentiment_score DOUBLE PRECISION NOT NULL
            CHECK (sentiment_score >= 0.01 AND sentiment_score <= 0.99),
        relevance_score DOUBLE PRECISION NOT NULL
            CHECK (relevance_score >= 0 AND relevance_score <= 1)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_video ON comments(video_id)",
    "CREATE INDEX IF NOT EXISTS idx_comments_parent ON comments(parent_id)",
    r#"
    CREATE TABLE IF NOT EXISTS tags_dict (
        tag_id SERIAL PRIMARY KEY,
        tag_name VARCHAR(64) NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS comment_tag_map (
        rpid BIGINT NOT NULL REFERENCES comments(rpid) ON DELETE CASCADE,
        tag_id INT NOT NULL REFERENCES tags_dict(tag_id) ON DELETE CASCADE,
        PRIMARY KEY (rpid, tag_id)
    )
    "#,
    r#"
    CREATE OR REPLACE FUNCTION refresh_video_sentiment() RETURNS TRIGGER AS $$
    DECLARE
        weighted DOUBLE PRECISION;
    BEGIN
        SELECT SUM(sentiment_score * relevance_score) / NULLIF(SUM(relevance_score), 0)
          INTO weighted
          FROM comments
         WHERE video_id = NEW.video_id;

        UPDATE videos
           SET avg_sentiment = CASE
                   WHEN weighted IS NULL THEN NULL
                   ELSE 1.0 / (1.0 + EXP(-8.0 * (weighted - 0.5)))
               END
         WHERE video_id = NEW.video_id;

        RETURN NULL;
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS trg_comments_sentiment ON comments",
    r#"
    CREATE TRIGGER trg_comments_sentiment
    AFTER INSERT OR UPDATE OF sentiment_score, relevance_score ON comments
    FOR EACH ROW EXECUTE FUNCTION refresh_video_sentiment()
    "#,
];

const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS videos (
        video_id INTEGER PRIMARY KEY,
        bvid TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        cover_url TEXT,
        owner_name TEXT,
        owner_face TEXT,
        view_count INTEGER NOT NULL DEFAULT 0,
        like_count INTEGER NOT NULL DEFAULT 0,
        danmaku_count INTEGER NOT NULL DEFAULT 0,
        avg_sentiment REAL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        rpid INTEGER PRIMARY KEY,
        video_id INTEGER NOT NULL REFERENCES videos(video_id) ON DELETE CASCADE,
        parent_id INTEGER REFERENCES comments(rpid) ON DELETE SET NULL
            DEFERRABLE INITIALLY IMMEDIATE,
        uname TEXT NOT NULL,
        content TEXT NOT NULL,
        sentiment_score REAL NOT NULL
            CHECK (sentiment_score >= 0.01 AND sentiment_score <= 0.99),
        relevance_score REAL NOT NULL
            CHECK (relevance_score >= 0 AND relevance_score <= 1)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_video ON comments(video_id)",
    "CREATE INDEX IF NOT EXISTS idx_comments_parent ON comments(parent_id)",
    r#"
    CREATE TABLE IF NOT EXISTS tags_dict (
        tag_id INTEGER PRIMARY KEY AUTOINCREMENT,
        tag_name TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS comment_tag_map (
        rpid INTEGER NOT NULL REFERENCES comments(rpid) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tags_dict(tag_id) ON DELETE CASCADE,
        PRIMARY KEY (rpid, tag_id)
    )
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS trg_comments_sentiment_insert
    AFTER INSERT ON comments
    BEGIN
        UPDATE videos
           SET avg_sentiment = (
               SELECT SUM(sentiment_score * relevance_score) / NULLIF(SUM(relevance_score), 0)
                 FROM comments
                WHERE video_id = NEW.video_id)
         WHERE video_id = NEW.video_id;
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS trg_comments_sentiment_update
    AFTER UPDATE OF sentiment_score, relevance_score ON comments
    BEGIN
        UPDATE videos
           SET avg_sentiment = (
               SELECT SUM(sentiment_score * relevance_score) / NULLIF(SUM(relevance_score), 0)
                 FROM comments
                WHERE video_id = NEW.video_id)
         WHERE video_id = NEW.video_id;
    END
    "#,
];

/// Install the schema for the connected backend
pub async fn bootstrap(db: &DatabaseConnection) -> Result<()> {
    let statements = match db.get_database_backend() {
        DatabaseBackend::Postgres => POSTGRES_SCHEMA,
        DatabaseBackend::Sqlite => SQLITE_SCHEMA,
        DatabaseBackend::MySql => {
            tracing::warn!("MySQL schema is managed externally, skipping bootstrap");
            return Ok(());
        }
    };

    for statement in statements {
        db.execute_unprepared(statement).await?;
    }

    debug!(statements = statements.len(), "Schema bootstrap complete");
    Ok(())
}

/// Statements that relax and restore foreign-key enforcement inside a transaction.
///
/// Replies may be written before the main comment they reference, so checks
/// are held until the whole comment batch is in place.
pub(crate) fn integrity_toggles(backend: DatabaseBackend) -> (&'static str, &'static str) {
    match backend {
        DatabaseBackend::Postgres => ("SET CONSTRAINTS ALL DEFERRED", "SET CONSTRAINTS ALL IMMEDIATE"),
        DatabaseBackend::Sqlite => ("PRAGMA defer_foreign_keys = ON", "PRAGMA defer_foreign_keys = OFF"),
        DatabaseBackend::MySql => ("SET FOREIGN_KEY_CHECKS = 0", "SET FOREIGN_KEY_CHECKS = 1"),
    }
}
