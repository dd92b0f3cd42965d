use super::SqliteStore;
use super::codec::{PIN_COLUMNS, conflict_on_unique, pin_from_row};
use super::filters;
use crate::error::{MemoryError, Result};
use crate::model::{Pin, PinDraft, Scope, Timestamp, validate_pin};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

pub(super) async fn insert_pin_row(conn: &mut SqliteConnection, pin: &Pin) -> Result<()> {
    sqlx::query(
        "INSERT INTO pins
            (id, target_type, target_id, reason, created_at, expires_at,
             session_id, repo_id, agent_id, user_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(&pin.id)
    .bind(pin.target_type.as_str())
    .bind(&pin.target_id)
    .bind(&pin.reason)
    .bind(pin.created_at)
    .bind(pin.expires_at)
    .bind(&pin.scope.session_id)
    .bind(&pin.scope.repo_id)
    .bind(&pin.scope.agent_id)
    .bind(&pin.scope.user_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, |_| format!("pin {} already exists", pin.id)))?;
    Ok(())
}

pub(super) async fn pin_exists(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM pins WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

impl SqliteStore {
    pub async fn insert_pin(&self, draft: PinDraft) -> Result<Pin> {
        let pin = validate_pin(draft)?;
        let mut conn = self.pool.acquire().await?;
        insert_pin_row(&mut conn, &pin).await?;
        tracing::info!(id = %pin.id, target = %pin.target_id, "pin created");
        Ok(pin)
    }

    pub async fn delete_pin(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM pins WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MemoryError::not_found("pin", id));
        }
        tracing::info!(id, "pin deleted");
        Ok(())
    }

    /// Pins not yet expired at `now`, oldest first.
    ///
    /// A pin matches `scope` when each dimension set on `scope` is either
    /// equal on the pin or absent from it. Pins created without a scope are
    /// global: they match every session, including ids that match no row
    /// anywhere else. A pin scoped to a session only ever matches that exact
    /// `sessionId`.
    pub async fn list_active_pins(&self, scope: Option<&Scope>, now: Timestamp) -> Result<Vec<Pin>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {PIN_COLUMNS} FROM pins p WHERE (p.expires_at IS NULL OR p.expires_at > "
        ));
        qb.push_bind(now).push(")");
        if let Some(scope) = scope {
            filters::push_scope_wildcard(&mut qb, "p", scope);
        }
        qb.push(" ORDER BY p.created_at ASC, p.id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(pin_from_row).collect()
    }
}
