//! # Pagination Module
//!
//! Moves a user through the result set cached in their session. The pressed
//! button is correlated back to a result entry through the article link
//! embedded in the card's keyboard, since Telegram callbacks carry no index.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use teloxide::types::UserId;
use tracing::debug;

use crate::db;
use crate::proximity::BuildingCard;
use crate::session::SessionStore;

/// What the user asked the card to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavDirection {
    Next,
    Previous,
    /// Re-render the current entry as a separate pinned message
    Save,
}

#[derive(Debug, Clone)]
pub enum NavOutcome {
    /// Replace the card in place with this entry
    Show(BuildingCard),
    /// Send this entry as a new, independent saved message
    Saved(BuildingCard),
    /// Already at the edge of the result set; nothing to do
    Boundary,
    /// Session lost or the link no longer matches: ask for a fresh location
    StaleSession,
}

/// Navigates cached result sets. Reads sessions, never mutates them: the
/// result set stays as the resolver wrote it.
pub struct Navigator {
    pool: SqlitePool,
    sessions: Arc<SessionStore>,
}

impl Navigator {
    pub fn new(pool: SqlitePool, sessions: Arc<SessionStore>) -> Self {
        Self { pool, sessions }
    }

    pub async fn navigate(
        &self,
        user: UserId,
        callback_link: &str,
        direction: NavDirection,
    ) -> Result<NavOutcome> {
        let Some(session) = self.sessions.get(user).await else {
            debug!(user_id = %user, "No session for navigation callback");
            return Ok(NavOutcome::StaleSession);
        };

        let Some(position) = session.position_of_link(callback_link) else {
            debug!(user_id = %user, link = callback_link, "Callback link not in result set");
            return Ok(NavOutcome::StaleSession);
        };

        let total = session.entries.len();
        let target = match direction {
            NavDirection::Next => {
                if position + 1 >= total {
                    return Ok(NavOutcome::Boundary);
                }
                position + 1
            }
            NavDirection::Previous => {
                let Some(previous) = position.checked_sub(1) else {
                    return Ok(NavOutcome::Boundary);
                };
                previous
            }
            NavDirection::Save => position,
        };

        let entry = &session.entries[target];

        if direction == NavDirection::Save {
            // Saving is not a view; show the counter as stored
            let card = BuildingCard::from_parts(entry, entry.building.views, target, total);
            return Ok(NavOutcome::Saved(card));
        }

        // A deliberate page turn is a genuine new view
        let views = db::increment_views(&self.pool, &entry.building.id)
            .await?
            .unwrap_or(entry.building.views + 1);

        debug!(user_id = %user, from = position, to = target, "Navigated result set");
        Ok(NavOutcome::Show(BuildingCard::from_parts(
            entry, views, target, total,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_schema, upsert_building, BuildingRecord};
    use crate::geo::Coordinate;
    use crate::session::{ResultEntry, Session};
    use sqlx::sqlite::SqlitePoolOptions;
    use teloxide::types::MessageId;

    fn building(id: &str) -> BuildingRecord {
        BuildingRecord {
            id: id.to_string(),
            name: format!("Building {id}"),
            layer: "constructivism".to_string(),
            text: "A building with a story.".to_string(),
            lat: 55.7522,
            lon: 37.6156,
            image: format!("https://example.com/{id}.jpg"),
            link: format!("https://example.com/article/{id}+1"),
            views: 0,
        }
    }

    fn link(id: &str) -> String {
        format!("https://example.com/article/{id}+1")
    }

    async fn setup(ids: &[&str]) -> Result<(Navigator, SqlitePool)> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        init_schema(&pool).await?;

        let anchor = Coordinate::new(55.7522, 37.6156);
        let mut entries = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            let record = building(id);
            upsert_building(&pool, &record).await?;
            entries.push(ResultEntry {
                building: record,
                distance_km: i as f64 * 0.05,
                anchor,
                reply_to: MessageId(10),
            });
        }

        let sessions = Arc::new(SessionStore::new());
        sessions
            .put(
                UserId(1),
                Session {
                    entries,
                    last_shown_link: None,
                    anchor: Some(anchor),
                    reply_to: Some(MessageId(10)),
                },
            )
            .await;

        Ok((Navigator::new(pool.clone(), sessions), pool))
    }

    async fn stored_views(pool: &SqlitePool, id: &str) -> i64 {
        sqlx::query_scalar("SELECT views FROM buildings WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_next_advances_and_counts_one_view() -> Result<()> {
        let (navigator, pool) = setup(&["a", "b", "c"]).await?;

        let outcome = navigator
            .navigate(UserId(1), &link("a"), NavDirection::Next)
            .await?;

        match outcome {
            NavOutcome::Show(card) => {
                assert_eq!(card.id, "b");
                assert_eq!(card.index, 1);
                assert_eq!(card.total, 3);
                assert_eq!(card.views, 1);
            }
            other => panic!("expected Show, got {other:?}"),
        }
        assert_eq!(stored_views(&pool, "b").await, 1);
        assert_eq!(stored_views(&pool, "a").await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_previous_retreats() -> Result<()> {
        let (navigator, _pool) = setup(&["a", "b", "c"]).await?;

        let outcome = navigator
            .navigate(UserId(1), &link("c"), NavDirection::Previous)
            .await?;

        match outcome {
            NavOutcome::Show(card) => {
                assert_eq!(card.id, "b");
                assert_eq!(card.index, 1);
            }
            other => panic!("expected Show, got {other:?}"),
        }
        Ok(())
    }

    /// Next at the last index is a no-op
    #[tokio::test]
    async fn test_next_at_last_index_is_boundary() -> Result<()> {
        let (navigator, pool) = setup(&["a", "b"]).await?;

        let outcome = navigator
            .navigate(UserId(1), &link("b"), NavDirection::Next)
            .await?;
        assert!(matches!(outcome, NavOutcome::Boundary));
        assert_eq!(stored_views(&pool, "a").await, 0);
        assert_eq!(stored_views(&pool, "b").await, 0);
        Ok(())
    }

    /// Previous at index zero is the symmetric no-op
    #[tokio::test]
    async fn test_previous_at_first_index_is_boundary() -> Result<()> {
        let (navigator, _pool) = setup(&["a", "b"]).await?;

        let outcome = navigator
            .navigate(UserId(1), &link("a"), NavDirection::Previous)
            .await?;
        assert!(matches!(outcome, NavOutcome::Boundary));
        Ok(())
    }

    /// Save re-renders the current entry and never touches the counter
    #[tokio::test]
    async fn test_save_keeps_index_and_views() -> Result<()> {
        let (navigator, pool) = setup(&["a", "b", "c"]).await?;

        let outcome = navigator
            .navigate(UserId(1), &link("b"), NavDirection::Save)
            .await?;

        match outcome {
            NavOutcome::Saved(card) => {
                assert_eq!(card.id, "b");
                assert_eq!(card.index, 1);
            }
            other => panic!("expected Saved, got {other:?}"),
        }
        assert_eq!(stored_views(&pool, "b").await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_each_navigation_counts_exactly_once() -> Result<()> {
        let (navigator, pool) = setup(&["a", "b", "c"]).await?;

        navigator
            .navigate(UserId(1), &link("a"), NavDirection::Next)
            .await?;
        navigator
            .navigate(UserId(1), &link("b"), NavDirection::Next)
            .await?;
        navigator
            .navigate(UserId(1), &link("c"), NavDirection::Previous)
            .await?;

        assert_eq!(stored_views(&pool, "a").await, 0);
        assert_eq!(stored_views(&pool, "b").await, 2);
        assert_eq!(stored_views(&pool, "c").await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_user_is_stale() -> Result<()> {
        let (navigator, _pool) = setup(&["a"]).await?;

        let outcome = navigator
            .navigate(UserId(99), &link("a"), NavDirection::Next)
            .await?;
        assert!(matches!(outcome, NavOutcome::StaleSession));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_link_is_stale() -> Result<()> {
        let (navigator, _pool) = setup(&["a", "b"]).await?;

        let outcome = navigator
            .navigate(UserId(1), "https://example.com/article/other+1", NavDirection::Next)
            .await?;
        assert!(matches!(outcome, NavOutcome::StaleSession));
        Ok(())
    }
}
