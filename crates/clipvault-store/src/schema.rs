//! Embedded schema, applied idempotently on open.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS posts (
    id                  TEXT PRIMARY KEY,
    author              TEXT NOT NULL,
    create_time         INTEGER NOT NULL,
    has_sd              INTEGER NOT NULL DEFAULT 0,
    has_hd              INTEGER NOT NULL DEFAULT 0,
    has_source          INTEGER NOT NULL DEFAULT 0,
    has_cover_medium    INTEGER NOT NULL DEFAULT 0,
    has_cover_origin    INTEGER NOT NULL DEFAULT 0,
    has_cover_dynamic   INTEGER NOT NULL DEFAULT 0,
    sha256_sd           TEXT NOT NULL DEFAULT '',
    sha256_hd           TEXT NOT NULL DEFAULT '',
    sha256_source       TEXT NOT NULL DEFAULT '',
    sha256_cover_medium TEXT NOT NULL DEFAULT '',
    sha256_cover_origin TEXT NOT NULL DEFAULT '',
    sha256_cover_dynamic TEXT NOT NULL DEFAULT '',
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_author_time ON posts (author, create_time);

CREATE TABLE IF NOT EXISTS avatars (
    author        TEXT NOT NULL,
    sha256        TEXT NOT NULL,
    downloaded_at TEXT NOT NULL,
    PRIMARY KEY (author, sha256)
);
"#;
