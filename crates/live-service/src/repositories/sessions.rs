//! Postgres-backed [`SessionStore`].
//!
//! Every mutating operation runs in one transaction that first takes
//! `SELECT ... FOR UPDATE` on the session row, so concurrent joins, leaves
//! and ends on the same session are serialized by the database even across
//! service instances.
//!
//! # Security
//!
//! - All queries use parameterized statements (SQL injection safe)

use super::SessionStore;
use crate::errors::LiveError;
use crate::models::{EndOutcome, JoinOutcome, LeaveOutcome, NewSession, Participant, Session};
use crate::observability::metrics;
use async_trait::async_trait;
use common::types::{SessionId, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Session store over a Postgres pool.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self, operation: &'static str) -> Result<Transaction<'_, Postgres>, LiveError> {
        let start = Instant::now();
        self.pool.begin().await.map_err(query_failed(operation, start))
    }

    /// Lock the session row and return its `is_active` flag.
    async fn lock_session(
        tx: &mut Transaction<'_, Postgres>,
        operation: &'static str,
        id: SessionId,
    ) -> Result<Option<bool>, LiveError> {
        let start = Instant::now();
        let row = sqlx::query(
            r#"
            SELECT is_active
            FROM live_sessions
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.0)
        .fetch_optional(&mut **tx)
        .await
        .map_err(query_failed(operation, start))?;

        Ok(row.map(|r| r.get("is_active")))
    }

    async fn list(
        &self,
        operation: &'static str,
        sql: &str,
        user_id: Option<UserId>,
    ) -> Result<Vec<Session>, LiveError> {
        let start = Instant::now();
        let mut query = sqlx::query(sql);
        if let Some(user_id) = user_id {
            query = query.bind(user_id.0);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed(operation, start))?;
        metrics::record_db_query(operation, "success", start.elapsed());

        rows.into_iter().map(map_row_to_session).collect()
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[instrument(skip_all, name = "live.repo.create_session")]
    async fn create_session(&self, new: NewSession) -> Result<Session, LiveError> {
        let start = Instant::now();
        let mut tx = self.begin("create_session").await?;

        let row = sqlx::query(
            r#"
            INSERT INTO live_sessions (
                id, host_id, host_display_name, name, source_type, source_id, is_public
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING
                id, host_id, host_display_name, name, source_type, source_id,
                is_public, is_active, created_at, ended_at
            "#,
        )
        .bind(Uuid::new_v4()) // $1
        .bind(new.host_id.0) // $2
        .bind(&new.host_display_name) // $3
        .bind(&new.name) // $4
        .bind(new.source_type.as_str()) // $5
        .bind(&new.source_id) // $6
        .bind(new.is_public) // $7
        .fetch_one(&mut *tx)
        .await
        .map_err(query_failed("create_session", start))?;

        let session = map_row_to_session(row)?;

        sqlx::query(
            r#"
            INSERT INTO live_session_members (session_id, user_id, display_name, joined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(session.id.0)
        .bind(new.host_id.0)
        .bind(&new.host_display_name)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("create_session", start))?;

        tx.commit()
            .await
            .map_err(query_failed("create_session", start))?;
        metrics::record_db_query("create_session", "success", start.elapsed());

        tracing::debug!(
            target: "live.repository",
            session_id = %session.id,
            host_id = %session.host_id,
            "Session inserted"
        );

        Ok(session)
    }

    #[instrument(skip_all, name = "live.repo.get_session", fields(session_id = %id))]
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, LiveError> {
        let start = Instant::now();
        let row = sqlx::query(
            r#"
            SELECT
                id, host_id, host_display_name, name, source_type, source_id,
                is_public, is_active, created_at, ended_at
            FROM live_sessions
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed("get_session", start))?;
        metrics::record_db_query("get_session", "success", start.elapsed());

        row.map(map_row_to_session).transpose()
    }

    #[instrument(skip_all, name = "live.repo.add_member", fields(session_id = %id))]
    async fn add_member(
        &self,
        id: SessionId,
        user_id: UserId,
        display_name: &str,
    ) -> Result<JoinOutcome, LiveError> {
        let start = Instant::now();
        let mut tx = self.begin("add_member").await?;

        match Self::lock_session(&mut tx, "add_member", id).await? {
            None => return Err(LiveError::session_not_found()),
            Some(false) => return Err(LiveError::session_inactive()),
            Some(true) => {}
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO live_session_members (session_id, user_id, display_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id, user_id) DO NOTHING
            "#,
        )
        .bind(id.0)
        .bind(user_id.0)
        .bind(display_name)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("add_member", start))?
        .rows_affected();

        tx.commit().await.map_err(query_failed("add_member", start))?;
        metrics::record_db_query("add_member", "success", start.elapsed());

        Ok(if inserted == 0 {
            JoinOutcome::AlreadyMember
        } else {
            JoinOutcome::Joined
        })
    }

    #[instrument(skip_all, name = "live.repo.remove_member", fields(session_id = %id))]
    async fn remove_member(
        &self,
        id: SessionId,
        user_id: UserId,
    ) -> Result<LeaveOutcome, LiveError> {
        let start = Instant::now();
        let mut tx = self.begin("remove_member").await?;

        let Some(is_active) = Self::lock_session(&mut tx, "remove_member", id).await? else {
            return Err(LiveError::session_not_found());
        };

        let removed = sqlx::query(
            r#"
            DELETE FROM live_session_members
            WHERE session_id = $1 AND user_id = $2
            "#,
        )
        .bind(id.0)
        .bind(user_id.0)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("remove_member", start))?
        .rows_affected();

        if removed == 0 {
            return Err(LiveError::NotFound(
                "You are not a member of this session".to_string(),
            ));
        }

        let outcome = if is_active {
            let remaining: i64 = sqlx::query(
                r#"
                SELECT COUNT(*) AS remaining
                FROM live_session_members
                WHERE session_id = $1
                "#,
            )
            .bind(id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(query_failed("remove_member", start))?
            .get("remaining");

            if remaining == 0 {
                deactivate_locked(&mut tx, "remove_member", id, start).await?;
                LeaveOutcome::LeftAndEnded
            } else {
                LeaveOutcome::Left
            }
        } else {
            LeaveOutcome::LeftInactive
        };

        tx.commit()
            .await
            .map_err(query_failed("remove_member", start))?;
        metrics::record_db_query("remove_member", "success", start.elapsed());

        Ok(outcome)
    }

    #[instrument(skip_all, name = "live.repo.deactivate", fields(session_id = %id))]
    async fn deactivate(&self, id: SessionId) -> Result<EndOutcome, LiveError> {
        let start = Instant::now();
        let mut tx = self.begin("deactivate").await?;

        let outcome = match Self::lock_session(&mut tx, "deactivate", id).await? {
            None => return Err(LiveError::session_not_found()),
            Some(false) => EndOutcome::AlreadyInactive,
            Some(true) => {
                deactivate_locked(&mut tx, "deactivate", id, start).await?;
                EndOutcome::Ended
            }
        };

        tx.commit().await.map_err(query_failed("deactivate", start))?;
        metrics::record_db_query("deactivate", "success", start.elapsed());

        Ok(outcome)
    }

    #[instrument(skip_all, name = "live.repo.set_visibility", fields(session_id = %id))]
    async fn set_visibility(&self, id: SessionId, is_public: bool) -> Result<Session, LiveError> {
        let start = Instant::now();
        let mut tx = self.begin("set_visibility").await?;

        match Self::lock_session(&mut tx, "set_visibility", id).await? {
            None => return Err(LiveError::session_not_found()),
            Some(false) => return Err(LiveError::session_inactive()),
            Some(true) => {}
        }

        let row = sqlx::query(
            r#"
            UPDATE live_sessions
            SET is_public = $2
            WHERE id = $1
            RETURNING
                id, host_id, host_display_name, name, source_type, source_id,
                is_public, is_active, created_at, ended_at
            "#,
        )
        .bind(id.0)
        .bind(is_public)
        .fetch_one(&mut *tx)
        .await
        .map_err(query_failed("set_visibility", start))?;

        tx.commit()
            .await
            .map_err(query_failed("set_visibility", start))?;
        metrics::record_db_query("set_visibility", "success", start.elapsed());

        map_row_to_session(row)
    }

    #[instrument(skip_all, name = "live.repo.members_of", fields(count = ids.len()))]
    async fn members_of(
        &self,
        ids: &[SessionId],
    ) -> Result<HashMap<SessionId, Vec<Participant>>, LiveError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let start = Instant::now();
        let raw: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query(
            r#"
            SELECT session_id, user_id, display_name, joined_at
            FROM live_session_members
            WHERE session_id = ANY($1)
            ORDER BY joined_at ASC, user_id ASC
            "#,
        )
        .bind(raw)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("members_of", start))?;
        metrics::record_db_query("members_of", "success", start.elapsed());

        let mut members: HashMap<SessionId, Vec<Participant>> =
            ids.iter().map(|id| (*id, Vec::new())).collect();
        for row in rows {
            let session_id = SessionId(row.get("session_id"));
            members.entry(session_id).or_default().push(Participant {
                user_id: UserId(row.get("user_id")),
                display_name: row.get("display_name"),
                joined_at: row.get("joined_at"),
            });
        }
        Ok(members)
    }

    #[instrument(skip_all, name = "live.repo.list_public_active")]
    async fn list_public_active(&self) -> Result<Vec<Session>, LiveError> {
        self.list(
            "list_public_active",
            r#"
            SELECT
                id, host_id, host_display_name, name, source_type, source_id,
                is_public, is_active, created_at, ended_at
            FROM live_sessions
            WHERE is_public AND is_active
            ORDER BY created_at DESC
            "#,
            None,
        )
        .await
    }

    #[instrument(skip_all, name = "live.repo.list_active_for_user", fields(user_id = %user_id))]
    async fn list_active_for_user(&self, user_id: UserId) -> Result<Vec<Session>, LiveError> {
        self.list(
            "list_active_for_user",
            r#"
            SELECT
                s.id, s.host_id, s.host_display_name, s.name, s.source_type, s.source_id,
                s.is_public, s.is_active, s.created_at, s.ended_at
            FROM live_sessions s
            JOIN live_session_members m ON m.session_id = s.id
            WHERE m.user_id = $1 AND s.is_active
            ORDER BY s.created_at DESC
            "#,
            Some(user_id),
        )
        .await
    }

    #[instrument(skip_all, name = "live.repo.list_by_host", fields(host_id = %host_id))]
    async fn list_by_host(&self, host_id: UserId) -> Result<Vec<Session>, LiveError> {
        self.list(
            "list_by_host",
            r#"
            SELECT
                id, host_id, host_display_name, name, source_type, source_id,
                is_public, is_active, created_at, ended_at
            FROM live_sessions
            WHERE host_id = $1
            ORDER BY created_at DESC
            "#,
            Some(host_id),
        )
        .await
    }

    async fn ping(&self) -> Result<(), LiveError> {
        let start = Instant::now();
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(query_failed("ping", start))?;
        metrics::record_db_query("ping", "success", start.elapsed());
        Ok(())
    }
}

/// Flip a locked, active session to inactive.
async fn deactivate_locked(
    tx: &mut Transaction<'_, Postgres>,
    operation: &'static str,
    id: SessionId,
    start: Instant,
) -> Result<(), LiveError> {
    sqlx::query(
        r#"
        UPDATE live_sessions
        SET is_active = false, ended_at = NOW()
        WHERE id = $1 AND is_active
        "#,
    )
    .bind(id.0)
    .execute(&mut **tx)
    .await
    .map_err(query_failed(operation, start))?;
    Ok(())
}

/// Records the failed query and converts the error.
fn query_failed(
    operation: &'static str,
    start: Instant,
) -> impl FnOnce(sqlx::Error) -> LiveError {
    move |e| {
        metrics::record_db_query(operation, "error", start.elapsed());
        LiveError::Database(e.to_string())
    }
}

fn map_row_to_session(row: PgRow) -> Result<Session, LiveError> {
    let source_type: String = row.get("source_type");
    let source_type = source_type
        .parse()
        .map_err(|e: String| LiveError::Database(format!("corrupt source_type: {e}")))?;

    Ok(Session {
        id: SessionId(row.get("id")),
        host_id: UserId(row.get("host_id")),
        host_display_name: row.get("host_display_name"),
        name: row.get("name"),
        source_type,
        source_id: row.get("source_id"),
        is_public: row.get("is_public"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        ended_at: row.get("ended_at"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn new_session(host: i64) -> NewSession {
        NewSession {
            host_id: UserId(host),
            host_display_name: format!("host{host}"),
            name: "Sunday Records".to_string(),
            source_type: SourceType::Album,
            source_id: "4aawyAB9vmqN3uQ7FjRGTy".to_string(),
            is_public: true,
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_lifecycle(pool: PgPool) {
        let store = PgSessionStore::new(pool);
        let session = store.create_session(new_session(1)).await.unwrap();
        assert!(session.is_active);

        assert_eq!(
            store.add_member(session.id, UserId(2), "b").await.unwrap(),
            JoinOutcome::Joined
        );
        assert_eq!(
            store.add_member(session.id, UserId(2), "b").await.unwrap(),
            JoinOutcome::AlreadyMember
        );
        assert_eq!(
            store.remove_member(session.id, UserId(1)).await.unwrap(),
            LeaveOutcome::Left
        );
        assert_eq!(
            store.remove_member(session.id, UserId(2)).await.unwrap(),
            LeaveOutcome::LeftAndEnded
        );

        let ended = store.get_session(session.id).await.unwrap().unwrap();
        assert!(!ended.is_active);
        assert!(ended.ended_at.is_some());
        assert!(matches!(
            store.add_member(session.id, UserId(3), "c").await,
            Err(LiveError::Forbidden(_))
        ));
        assert_eq!(
            store.deactivate(session.id).await.unwrap(),
            EndOutcome::AlreadyInactive
        );
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_concurrent_last_leaves_end_once(pool: PgPool) {
        let store = std::sync::Arc::new(PgSessionStore::new(pool));
        let session = store.create_session(new_session(1)).await.unwrap();
        store.add_member(session.id, UserId(2), "b").await.unwrap();

        let (a, b) = tokio::join!(
            store.remove_member(session.id, UserId(1)),
            store.remove_member(session.id, UserId(2)),
        );
        let ended = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| o.ended_session())
            .count();
        assert_eq!(ended, 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_listings(pool: PgPool) {
        let store = PgSessionStore::new(pool);
        let a = store.create_session(new_session(1)).await.unwrap();
        let b = store.create_session(new_session(2)).await.unwrap();
        store.add_member(a.id, UserId(2), "b").await.unwrap();

        let mine: Vec<SessionId> = store
            .list_active_for_user(UserId(2))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(mine, vec![b.id, a.id]);

        let members = store.members_of(&[a.id, b.id]).await.unwrap();
        assert_eq!(members.get(&a.id).unwrap().len(), 2);
        assert_eq!(members.get(&b.id).unwrap().len(), 1);
        assert!(store.ping().await.is_ok());
    }
}
