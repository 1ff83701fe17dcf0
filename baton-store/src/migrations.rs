//! Forward-only, versioned schema migrations.
//!
//! Each migration is applied in its own transaction and the version row is
//! updated inside that transaction. There is no down path.

use baton_core::StoreError;
use sqlx::SqlitePool;

/// Ordered list of (version, statements). Versions must be contiguous and
/// ascending; the applied version is recorded in `schema_version`.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    r#"
    CREATE TABLE IF NOT EXISTS contexts (
        context_id TEXT PRIMARY KEY,
        scope TEXT NOT NULL,
        goal TEXT NOT NULL,
        parent_id TEXT,
        compression_level TEXT NOT NULL,
        token_budget INTEGER NOT NULL,
        tokens_used INTEGER NOT NULL DEFAULT 0,
        over_budget INTEGER NOT NULL DEFAULT 0,
        archived INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        last_active_at TEXT NOT NULL,
        FOREIGN KEY (parent_id) REFERENCES contexts(context_id)
    );

    CREATE TABLE IF NOT EXISTS context_events (
        event_id TEXT PRIMARY KEY,
        context_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        timestamp TEXT NOT NULL,
        kind TEXT NOT NULL,
        importance INTEGER NOT NULL,
        payload TEXT NOT NULL DEFAULT '{}',
        token_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE (context_id, seq),
        FOREIGN KEY (context_id) REFERENCES contexts(context_id)
    );
    CREATE INDEX IF NOT EXISTS idx_events_context_seq
        ON context_events(context_id, seq);
    CREATE INDEX IF NOT EXISTS idx_events_kind
        ON context_events(context_id, kind);

    CREATE TABLE IF NOT EXISTS agents (
        agent_id TEXT PRIMARY KEY,
        role TEXT NOT NULL,
        workflow_id TEXT NOT NULL,
        context_id TEXT NOT NULL,
        state TEXT NOT NULL,
        progress REAL NOT NULL DEFAULT 0,
        current_step TEXT,
        step_index INTEGER NOT NULL DEFAULT 0,
        result TEXT,
        error TEXT,
        config_snapshot TEXT NOT NULL DEFAULT 'null',
        branch TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_agents_workflow ON agents(workflow_id);

    CREATE TABLE IF NOT EXISTS workflows (
        workflow_id TEXT PRIMARY KEY,
        context_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        agent_ids TEXT NOT NULL DEFAULT '[]',
        handoff TEXT NOT NULL DEFAULT '',
        FOREIGN KEY (context_id) REFERENCES contexts(context_id)
    );
    CREATE INDEX IF NOT EXISTS idx_workflows_context ON workflows(context_id);

    CREATE TABLE IF NOT EXISTS locks (
        name TEXT PRIMARY KEY,
        holder TEXT NOT NULL,
        acquired_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS lessons (
        lesson_id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        agent_context TEXT NOT NULL,
        description TEXT NOT NULL,
        prevention_rule TEXT NOT NULL,
        verification_probe TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_lessons_context ON lessons(agent_context);

    CREATE TABLE IF NOT EXISTS verifications (
        verification_id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL,
        claimed TEXT NOT NULL,
        verified TEXT NOT NULL,
        probe_command TEXT NOT NULL,
        probe_output TEXT NOT NULL DEFAULT '',
        discrepancy INTEGER NOT NULL DEFAULT 0,
        agent_id TEXT,
        workflow_id TEXT,
        verified_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_verifications_task ON verifications(task_id);

    CREATE TABLE IF NOT EXISTS external_resources (
        resource_id TEXT PRIMARY KEY,
        context_id TEXT NOT NULL,
        system TEXT NOT NULL,
        kind TEXT NOT NULL,
        external_id TEXT NOT NULL,
        url TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (context_id) REFERENCES contexts(context_id)
    );

    CREATE TABLE IF NOT EXISTS conflicts (
        conflict_id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        first_branch TEXT NOT NULL,
        second_branch TEXT NOT NULL,
        subject TEXT NOT NULL,
        detected_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS identity_docs (
        context_id TEXT PRIMARY KEY,
        path TEXT NOT NULL,
        content_sha256 TEXT NOT NULL,
        written_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS archive_index (
        context_id TEXT PRIMARY KEY,
        compression_level TEXT NOT NULL,
        last_active_at TEXT NOT NULL,
        summary_tokens INTEGER NOT NULL DEFAULT 0,
        archived_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS store_incidents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        detail TEXT NOT NULL,
        occurred_at TEXT NOT NULL
    );
    "#,
)];

/// Apply all pending migrations. Idempotent.
pub(crate) async fn run(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL PRIMARY KEY)",
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration {
        version: 0,
        reason: e.to_string(),
    })?;

    let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(|e| StoreError::Migration {
            version: 0,
            reason: e.to_string(),
        })?;
    let current = row.0.unwrap_or(0);

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let mut tx = pool.begin().await.map_err(|e| StoreError::Migration {
            version: *version,
            reason: e.to_string(),
        })?;
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Migration {
                    version: *version,
                    reason: format!("{e} in statement: {statement}"),
                })?;
        }
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Migration {
                version: *version,
                reason: e.to_string(),
            })?;
        tx.commit().await.map_err(|e| StoreError::Migration {
            version: *version,
            reason: e.to_string(),
        })?;
        tracing::info!(version, "applied store migration");
    }

    Ok(())
}

/// Highest applied schema version.
pub(crate) async fn version(pool: &SqlitePool) -> Result<i64, StoreError> {
    let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(|e| StoreError::Query {
            reason: e.to_string(),
        })?;
    Ok(row.0.unwrap_or(0))
}
