use anyhow::Context;
use sqlx::SqlitePool;

const SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";
pub(super) const SCHEMA_VERSION_KEY: &str = "schema_version";
pub const SCHEMA_VERSION: u32 = 1;

/// Relations, shadow indexes and triggers.
///
/// Each textual relation has an explicit `row_id INTEGER PRIMARY KEY` so the
/// external-content FTS5 tables keep pointing at the right row across VACUUM.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS observations (
    row_id      INTEGER PRIMARY KEY,
    id          TEXT NOT NULL UNIQUE,
    kind        TEXT NOT NULL,
    content     TEXT,
    provenance  TEXT NOT NULL DEFAULT '{}',
    timestamp   INTEGER NOT NULL,
    session_id  TEXT,
    repo_id     TEXT,
    agent_id    TEXT,
    user_id     TEXT,
    redacted    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_observations_timestamp ON observations(timestamp, id);
CREATE INDEX IF NOT EXISTS idx_observations_session ON observations(session_id, timestamp);

CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
    content, content='observations', content_rowid='row_id', tokenize='porter unicode61'
);
CREATE TRIGGER IF NOT EXISTS observations_ai AFTER INSERT ON observations BEGIN
    INSERT INTO observations_fts(rowid, content)
    SELECT new.row_id, new.content
    WHERE new.redacted = 0 AND new.content IS NOT NULL;
END;
CREATE TRIGGER IF NOT EXISTS observations_ad AFTER DELETE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, content)
    SELECT 'delete', old.row_id, old.content
    WHERE old.redacted = 0 AND old.content IS NOT NULL;
END;
CREATE TRIGGER IF NOT EXISTS observations_au AFTER UPDATE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, content)
    SELECT 'delete', old.row_id, old.content
    WHERE old.redacted = 0 AND old.content IS NOT NULL;
    INSERT INTO observations_fts(rowid, content)
    SELECT new.row_id, new.content
    WHERE new.redacted = 0 AND new.content IS NOT NULL;
END;

CREATE TABLE IF NOT EXISTS capsules (
    id            TEXT PRIMARY KEY,
    capsule_type  TEXT NOT NULL,
    intent        TEXT NOT NULL,
    status        TEXT NOT NULL,
    session_id    TEXT,
    repo_id       TEXT,
    agent_id      TEXT,
    user_id       TEXT,
    opened_at     INTEGER NOT NULL,
    closed_at     INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_capsules_open_session
    ON capsules(session_id)
    WHERE capsule_type = 'session' AND status = 'open';
CREATE INDEX IF NOT EXISTS idx_capsules_opened ON capsules(opened_at, id);

CREATE TABLE IF NOT EXISTS capsule_observations (
    capsule_id      TEXT NOT NULL REFERENCES capsules(id) ON DELETE CASCADE,
    observation_id  TEXT NOT NULL,
    seq             INTEGER NOT NULL,
    PRIMARY KEY (capsule_id, seq),
    UNIQUE (capsule_id, observation_id)
);
CREATE INDEX IF NOT EXISTS idx_capsule_observations_observation
    ON capsule_observations(observation_id);

CREATE TABLE IF NOT EXISTS summaries (
    row_id         INTEGER PRIMARY KEY,
    id             TEXT NOT NULL UNIQUE,
    capsule_id     TEXT NOT NULL REFERENCES capsules(id) ON DELETE CASCADE,
    content        TEXT NOT NULL,
    confidence     REAL NOT NULL,
    created_at     INTEGER NOT NULL,
    evidence_refs  TEXT NOT NULL DEFAULT '[]',
    session_id     TEXT,
    repo_id        TEXT,
    agent_id       TEXT,
    user_id        TEXT
);
CREATE INDEX IF NOT EXISTS idx_summaries_capsule ON summaries(capsule_id, created_at DESC);

CREATE VIRTUAL TABLE IF NOT EXISTS summaries_fts USING fts5(
    content, content='summaries', content_rowid='row_id', tokenize='porter unicode61'
);
CREATE TRIGGER IF NOT EXISTS summaries_ai AFTER INSERT ON summaries BEGIN
    INSERT INTO summaries_fts(rowid, content) VALUES (new.row_id, new.content);
END;
CREATE TRIGGER IF NOT EXISTS summaries_ad AFTER DELETE ON summaries BEGIN
    INSERT INTO summaries_fts(summaries_fts, rowid, content)
    VALUES ('delete', old.row_id, old.content);
END;
CREATE TRIGGER IF NOT EXISTS summaries_au AFTER UPDATE ON summaries BEGIN
    INSERT INTO summaries_fts(summaries_fts, rowid, content)
    VALUES ('delete', old.row_id, old.content);
    INSERT INTO summaries_fts(rowid, content) VALUES (new.row_id, new.content);
END;

CREATE TABLE IF NOT EXISTS pins (
    id           TEXT PRIMARY KEY,
    target_type  TEXT NOT NULL,
    target_id    TEXT NOT NULL,
    reason       TEXT,
    created_at   INTEGER NOT NULL,
    expires_at   INTEGER,
    session_id   TEXT,
    repo_id      TEXT,
    agent_id     TEXT,
    user_id      TEXT
);
CREATE INDEX IF NOT EXISTS idx_pins_created ON pins(created_at, id);
";

pub(super) async fn init_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    ensure_schema_version(pool).await?;
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("initialize memory schema")?;
    Ok(())
}

/// Refuse to open a database written by a newer binary; stamp fresh ones.
async fn ensure_schema_version(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(SCHEMA_META_TABLE)
        .execute(pool)
        .await
        .context("create schema_meta table")?;

    let stored: Option<(String,)> = sqlx::query_as("SELECT value FROM schema_meta WHERE key = $1")
        .bind(SCHEMA_VERSION_KEY)
        .fetch_optional(pool)
        .await
        .context("load schema version")?;

    if let Some((value,)) = stored {
        let parsed = value
            .parse::<u32>()
            .with_context(|| format!("invalid schema version value: {value}"))?;
        anyhow::ensure!(
            parsed <= SCHEMA_VERSION,
            "database schema version {parsed} is newer than supported version {SCHEMA_VERSION}"
        );
        if parsed < SCHEMA_VERSION {
            tracing::info!(from = parsed, to = SCHEMA_VERSION, "upgrading memory schema");
            sqlx::query("UPDATE schema_meta SET value = $1 WHERE key = $2")
                .bind(SCHEMA_VERSION.to_string())
                .bind(SCHEMA_VERSION_KEY)
                .execute(pool)
                .await
                .context("persist upgraded schema version")?;
        }
        return Ok(());
    }

    sqlx::query("INSERT INTO schema_meta (key, value) VALUES ($1, $2)")
        .bind(SCHEMA_VERSION_KEY)
        .bind(SCHEMA_VERSION.to_string())
        .execute(pool)
        .await
        .context("persist schema version")?;
    Ok(())
}

pub(super) async fn stored_schema_version(pool: &SqlitePool) -> anyhow::Result<u32> {
    let (value,): (String,) = sqlx::query_as("SELECT value FROM schema_meta WHERE key = $1")
        .bind(SCHEMA_VERSION_KEY)
        .fetch_one(pool)
        .await
        .context("load schema version")?;
    value
        .parse::<u32>()
        .with_context(|| format!("invalid schema version value: {value}"))
}
