//! Source catalogue checks.
//!
//! A session plays from a playlist, track or album. Before a session is
//! created the catalogue confirms the source exists and the host may use it.
//!
//! Playlists live in the application's own `playlists` table and are checked
//! there. Tracks and albums are ids in an external streaming catalogue and are
//! only checked for shape.

use crate::errors::LiveError;
use crate::models::{SourceType, MAX_SOURCE_ID_LENGTH};
use crate::observability::metrics;
use async_trait::async_trait;
use common::types::UserId;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;

/// Existence and access check for session sources.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Succeeds when `source_id` exists and `host_id` may play it.
    ///
    /// # Errors
    ///
    /// `Validation` when the source is missing or not accessible to the host,
    /// `Database` when the lookup itself fails.
    async fn check(
        &self,
        host_id: UserId,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<(), LiveError>;
}

/// Shape check for external catalogue ids: non-empty, bounded, no whitespace.
///
/// # Errors
///
/// `Validation` describing the first violated rule.
pub fn check_external_id(source_type: SourceType, source_id: &str) -> Result<(), LiveError> {
    if source_id.is_empty() {
        return Err(LiveError::Validation(format!("{source_type} id is empty")));
    }
    if source_id.chars().count() > MAX_SOURCE_ID_LENGTH {
        return Err(LiveError::Validation(format!(
            "{source_type} id must be at most {MAX_SOURCE_ID_LENGTH} characters"
        )));
    }
    if source_id.chars().any(char::is_whitespace) {
        return Err(LiveError::Validation(format!(
            "{source_type} id must not contain whitespace"
        )));
    }
    Ok(())
}

/// Catalogue backed by the application database.
#[derive(Clone)]
pub struct PgSourceCatalog {
    pool: PgPool,
}

impl PgSourceCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip_all, name = "live.repo.check_playlist")]
    async fn check_playlist(&self, host_id: UserId, source_id: &str) -> Result<(), LiveError> {
        let not_found = || LiveError::Validation("Playlist not found".to_string());
        let playlist_id: i64 = source_id.parse().map_err(|_| not_found())?;

        let start = Instant::now();
        let row = sqlx::query(
            r#"
            SELECT user_id, is_public
            FROM playlists
            WHERE id = $1
            "#,
        )
        .bind(playlist_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("check_playlist", "error", start.elapsed());
            LiveError::Database(e.to_string())
        })?;
        metrics::record_db_query("check_playlist", "success", start.elapsed());

        let row = row.ok_or_else(not_found)?;
        let owner = UserId(row.get("user_id"));
        let is_public: bool = row.get("is_public");

        if is_public || owner == host_id {
            Ok(())
        } else {
            Err(LiveError::Validation(
                "Playlist is not accessible to the host".to_string(),
            ))
        }
    }
}

#[async_trait]
impl SourceCatalog for PgSourceCatalog {
    async fn check(
        &self,
        host_id: UserId,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<(), LiveError> {
        match source_type {
            SourceType::Playlist => self.check_playlist(host_id, source_id).await,
            SourceType::Track | SourceType::Album => check_external_id(source_type, source_id),
        }
    }
}

/// Test double for [`SourceCatalog`].
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Catalogue with a fixed answer.
    pub struct StaticSourceCatalog {
        /// When set, only these sources exist; otherwise every well-shaped id does.
        known: Option<HashSet<(SourceType, String)>>,
        call_count: AtomicUsize,
    }

    impl StaticSourceCatalog {
        /// Every well-shaped source exists and is accessible.
        pub fn accepting() -> Self {
            Self {
                known: None,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Only the listed sources exist.
        pub fn with_sources<I, S>(sources: I) -> Self
        where
            I: IntoIterator<Item = (SourceType, S)>,
            S: Into<String>,
        {
            Self {
                known: Some(
                    sources
                        .into_iter()
                        .map(|(kind, id)| (kind, id.into()))
                        .collect(),
                ),
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceCatalog for StaticSourceCatalog {
        async fn check(
            &self,
            _host_id: UserId,
            source_type: SourceType,
            source_id: &str,
        ) -> Result<(), LiveError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            check_external_id(source_type, source_id)?;

            match &self.known {
                Some(known) if !known.contains(&(source_type, source_id.to_string())) => Err(
                    LiveError::Validation(format!("{source_type} not found")),
                ),
                _ => Ok(()),
            }
        }
    }

}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_external_id_shape() {
        assert!(check_external_id(SourceType::Track, "6rqhFgbbKwnb9MLmUQDhG6").is_ok());
        assert!(check_external_id(SourceType::Album, "").is_err());
        assert!(check_external_id(SourceType::Album, "has space").is_err());
        assert!(check_external_id(SourceType::Track, &"x".repeat(MAX_SOURCE_ID_LENGTH + 1)).is_err());
        assert!(check_external_id(SourceType::Track, &"x".repeat(MAX_SOURCE_ID_LENGTH)).is_ok());
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_playlist_access(pool: PgPool) {
        let row = sqlx::query(
            "INSERT INTO playlists (user_id, name, is_public) VALUES (1, 'mine', false) RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let id: i64 = row.get("id");
        let catalog = PgSourceCatalog::new(pool);

        assert!(catalog.check(UserId(1), SourceType::Playlist, &id.to_string()).await.is_ok());
        assert!(catalog.check(UserId(2), SourceType::Playlist, &id.to_string()).await.is_err());
        assert!(catalog.check(UserId(1), SourceType::Playlist, "999999").await.is_err());
        assert!(catalog.check(UserId(1), SourceType::Playlist, "nope").await.is_err());
    }
}
