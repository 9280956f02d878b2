//! # Proximity Resolver Module
//!
//! Turns a location event into a sorted, distance-annotated result set for
//! the user's session and a card descriptor for the nearest building. Static
//! and live locations are distinct event variants: they use different radii,
//! different no-result policies, and only the live path deduplicates against
//! the previously shown card.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use teloxide::types::{MessageId, UserId};
use tracing::{debug, warn};

use crate::config::RadiusConfig;
use crate::db;
use crate::geo::{Coordinate, HALF_EARTH_CIRCUMFERENCE_KM};
use crate::session::{ResultEntry, Session, SessionStore};

/// An incoming location, dispatched by kind instead of a threaded `live` flag.
#[derive(Debug, Clone, Copy)]
pub enum LocationEvent {
    /// One-shot location send or a geocoded street search
    Static {
        coord: Coordinate,
        reply_to: MessageId,
    },
    /// A tick of a live-location share (an edited location message)
    Live {
        coord: Coordinate,
        message_id: MessageId,
    },
}

/// Everything the transport needs to render one building card.
#[derive(Debug, Clone)]
pub struct BuildingCard {
    pub id: String,
    pub name: String,
    pub text: String,
    pub image: String,
    pub link: String,
    pub distance_km: f64,
    pub views: i64,
    /// Zero-based position in the result set
    pub index: usize,
    pub total: usize,
    pub reply_to: MessageId,
}

impl BuildingCard {
    pub(crate) fn from_parts(entry: &ResultEntry, views: i64, index: usize, total: usize) -> Self {
        Self {
            id: entry.building.id.clone(),
            name: entry.building.name.clone(),
            text: entry.building.text.clone(),
            image: entry.building.image.clone(),
            link: entry.building.link.clone(),
            distance_km: entry.distance_km,
            views,
            index,
            total,
            reply_to: entry.reply_to,
        }
    }
}

/// What a location event resolved to.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Render the nearest building
    Card(BuildingCard),
    /// Nothing within the radius; report the distance to the nearest record
    NothingNearby {
        radius_km: f64,
        nearest_km: f64,
        reply_to: MessageId,
    },
    /// Emit nothing (live ticks with no buildings around, or duplicates)
    Silent,
}

/// Resolves location events against the catalog and maintains sessions.
///
/// Holds its catalog handle and session store by injection; constructed once
/// at startup.
pub struct Resolver {
    pool: SqlitePool,
    sessions: Arc<SessionStore>,
    radii: RadiusConfig,
}

impl Resolver {
    pub fn new(pool: SqlitePool, sessions: Arc<SessionStore>, radii: RadiusConfig) -> Self {
        Self {
            pool,
            sessions,
            radii,
        }
    }

    /// Remember where a live share started so later ticks thread their
    /// replies to the original location message.
    pub async fn record_live_start(
        &self,
        user: UserId,
        coord: Coordinate,
        message_id: MessageId,
    ) {
        self.sessions
            .put(
                user,
                Session {
                    entries: Vec::new(),
                    last_shown_link: None,
                    anchor: Some(coord),
                    reply_to: Some(message_id),
                },
            )
            .await;
    }

    pub async fn resolve(&self, user: UserId, event: LocationEvent) -> Result<Resolution> {
        match event {
            LocationEvent::Static { coord, reply_to } => {
                self.resolve_static(user, coord, reply_to).await
            }
            LocationEvent::Live { coord, message_id } => {
                self.resolve_live(user, coord, message_id).await
            }
        }
    }

    async fn resolve_static(
        &self,
        user: UserId,
        coord: Coordinate,
        reply_to: MessageId,
    ) -> Result<Resolution> {
        let radius_km = self.radii.static_radius_km;
        let found = db::nearest_buildings(&self.pool, coord, radius_km).await?;

        if found.is_empty() {
            return self.nothing_nearby(coord, radius_km, reply_to).await;
        }

        let entries = build_entries(found, coord, reply_to);
        let total = entries.len();
        let first = entries[0].clone();

        self.sessions
            .put(
                user,
                Session {
                    entries,
                    last_shown_link: None,
                    anchor: Some(coord),
                    reply_to: Some(reply_to),
                },
            )
            .await;

        let views = self.bump_views(&first).await?;
        debug!(user_id = %user, total, "Resolved static location");
        Ok(Resolution::Card(BuildingCard::from_parts(
            &first, views, 0, total,
        )))
    }

    async fn resolve_live(
        &self,
        user: UserId,
        coord: Coordinate,
        message_id: MessageId,
    ) -> Result<Resolution> {
        let found = db::nearest_buildings(&self.pool, coord, self.radii.live_radius_km).await?;

        // A user in transit with nothing around should hear nothing
        if found.is_empty() {
            return Ok(Resolution::Silent);
        }

        let previous = self.sessions.get(user).await.unwrap_or_default();
        let previous_link = previous.last_shown_link.clone();
        // Edits keep the message id of the original live-location message,
        // so it is the reply target even when the session was lost
        let reply_to = previous.reply_to.unwrap_or(message_id);

        let entries = build_entries(found, coord, reply_to);
        let total = entries.len();
        let first = entries[0].clone();
        let duplicate = previous_link.as_deref() == Some(first.building.link.as_str());

        self.sessions
            .put(
                user,
                Session {
                    entries,
                    last_shown_link: if duplicate {
                        previous_link
                    } else {
                        Some(first.building.link.clone())
                    },
                    anchor: Some(coord),
                    reply_to: Some(reply_to),
                },
            )
            .await;

        if duplicate {
            debug!(user_id = %user, link = %first.building.link, "Suppressed duplicate live card");
            return Ok(Resolution::Silent);
        }

        let views = self.bump_views(&first).await?;
        debug!(user_id = %user, total, "Resolved live location");
        Ok(Resolution::Card(BuildingCard::from_parts(
            &first, views, 0, total,
        )))
    }

    /// Fallback for an empty static result: re-query without a radius bound
    /// and report the distance to the single nearest record.
    async fn nothing_nearby(
        &self,
        coord: Coordinate,
        radius_km: f64,
        reply_to: MessageId,
    ) -> Result<Resolution> {
        let fallback =
            db::nearest_buildings(&self.pool, coord, HALF_EARTH_CIRCUMFERENCE_KM).await?;

        match fallback.first() {
            Some((_, nearest_km)) => Ok(Resolution::NothingNearby {
                radius_km,
                nearest_km: *nearest_km,
                reply_to,
            }),
            None => {
                warn!("Catalog is empty, nothing to report");
                Ok(Resolution::Silent)
            }
        }
    }

    async fn bump_views(&self, entry: &ResultEntry) -> Result<i64> {
        let views = db::increment_views(&self.pool, &entry.building.id).await?;
        Ok(views.unwrap_or(entry.building.views + 1))
    }
}

fn build_entries(
    found: Vec<(db::BuildingRecord, f64)>,
    anchor: Coordinate,
    reply_to: MessageId,
) -> Vec<ResultEntry> {
    found
        .into_iter()
        .map(|(building, distance_km)| ResultEntry {
            building,
            distance_km,
            anchor,
            reply_to,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_schema, upsert_building, BuildingRecord};
    use sqlx::sqlite::SqlitePoolOptions;

    const RED_SQUARE: Coordinate = Coordinate {
        lat: 55.7522,
        lon: 37.6156,
    };

    async fn setup() -> Result<(Resolver, SqlitePool)> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        init_schema(&pool).await?;
        let resolver = Resolver::new(
            pool.clone(),
            Arc::new(SessionStore::new()),
            RadiusConfig::default(),
        );
        Ok((resolver, pool))
    }

    fn building(id: &str, lat: f64, lon: f64) -> BuildingRecord {
        BuildingRecord {
            id: id.to_string(),
            name: format!("Building {id}"),
            layer: "constructivism".to_string(),
            text: "A building with a story.".to_string(),
            lat,
            lon,
            image: format!("https://example.com/{id}.jpg"),
            link: format!("https://example.com/article/{id}+1"),
            views: 0,
        }
    }

    async fn stored_views(pool: &SqlitePool, id: &str) -> i64 {
        sqlx::query_scalar("SELECT views FROM buildings WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    /// Static location with a record at the exact point: distance ~0, one view
    #[tokio::test]
    async fn test_static_location_with_building_in_range() -> Result<()> {
        let (resolver, pool) = setup().await?;
        upsert_building(&pool, &building("red-square", 55.7522, 37.6156)).await?;

        let event = LocationEvent::Static {
            coord: RED_SQUARE,
            reply_to: MessageId(10),
        };
        let resolution = resolver.resolve(UserId(1), event).await?;

        match resolution {
            Resolution::Card(card) => {
                assert_eq!(card.id, "red-square");
                assert!(card.distance_km < 0.001);
                assert_eq!(card.views, 1);
                assert_eq!(card.index, 0);
                assert_eq!(card.total, 1);
                assert_eq!(card.reply_to, MessageId(10));
            }
            other => panic!("expected a card, got {other:?}"),
        }
        assert_eq!(stored_views(&pool, "red-square").await, 1);
        Ok(())
    }

    /// Nothing in radius: fallback descriptor, no view mutation
    #[tokio::test]
    async fn test_static_location_nothing_in_range() -> Result<()> {
        let (resolver, pool) = setup().await?;
        // ~630 km away from the query point
        upsert_building(&pool, &building("far", 59.9386, 30.3141)).await?;

        let event = LocationEvent::Static {
            coord: RED_SQUARE,
            reply_to: MessageId(10),
        };
        let resolution = resolver.resolve(UserId(1), event).await?;

        match resolution {
            Resolution::NothingNearby {
                radius_km,
                nearest_km,
                reply_to,
            } => {
                assert_eq!(radius_km, 0.5);
                assert!((600.0..700.0).contains(&nearest_km));
                assert_eq!(reply_to, MessageId(10));
            }
            other => panic!("expected the fallback, got {other:?}"),
        }
        assert_eq!(stored_views(&pool, "far").await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_static_location_empty_catalog_is_silent() -> Result<()> {
        let (resolver, _pool) = setup().await?;

        let event = LocationEvent::Static {
            coord: RED_SQUARE,
            reply_to: MessageId(10),
        };
        assert!(matches!(
            resolver.resolve(UserId(1), event).await?,
            Resolution::Silent
        ));
        Ok(())
    }

    /// Result sets come out sorted ascending by distance
    #[tokio::test]
    async fn test_result_set_ordering_invariant() -> Result<()> {
        let (resolver, pool) = setup().await?;
        upsert_building(&pool, &building("c", 55.7550, 37.6200)).await?;
        upsert_building(&pool, &building("a", 55.7523, 37.6157)).await?;
        upsert_building(&pool, &building("b", 55.7535, 37.6180)).await?;

        let event = LocationEvent::Static {
            coord: RED_SQUARE,
            reply_to: MessageId(10),
        };
        resolver.resolve(UserId(7), event).await?;

        let session = resolver.sessions.get(UserId(7)).await.unwrap();
        assert_eq!(session.entries.len(), 3);
        for pair in session.entries.windows(2) {
            assert!(pair[0].distance_km <= pair[1].distance_km);
        }
        assert_eq!(session.anchor, Some(RED_SQUARE));
        assert_eq!(session.reply_to, Some(MessageId(10)));
        Ok(())
    }

    /// Repeated live ticks near the same building render once and count once;
    /// moving to another building renders exactly one new card
    #[tokio::test]
    async fn test_live_dedupe_scenario() -> Result<()> {
        let (resolver, pool) = setup().await?;
        upsert_building(&pool, &building("b", 55.7522, 37.6156)).await?;
        upsert_building(&pool, &building("c", 55.7700, 37.6400)).await?;

        let user = UserId(1);
        resolver.record_live_start(user, RED_SQUARE, MessageId(5)).await;

        let near_b = LocationEvent::Live {
            coord: RED_SQUARE,
            message_id: MessageId(5),
        };
        assert!(matches!(
            resolver.resolve(user, near_b).await?,
            Resolution::Card(_)
        ));
        assert_eq!(stored_views(&pool, "b").await, 1);

        // Two more ticks still nearest to b: no render, no count
        assert!(matches!(
            resolver.resolve(user, near_b).await?,
            Resolution::Silent
        ));
        assert!(matches!(
            resolver.resolve(user, near_b).await?,
            Resolution::Silent
        ));
        assert_eq!(stored_views(&pool, "b").await, 1);

        // Moving next to c: exactly one new render
        let near_c = LocationEvent::Live {
            coord: Coordinate::new(55.7700, 37.6400),
            message_id: MessageId(5),
        };
        match resolver.resolve(user, near_c).await? {
            Resolution::Card(card) => {
                assert_eq!(card.id, "c");
                assert_eq!(card.views, 1);
                assert_eq!(card.reply_to, MessageId(5));
            }
            other => panic!("expected a card, got {other:?}"),
        }
        assert_eq!(stored_views(&pool, "c").await, 1);
        assert_eq!(stored_views(&pool, "b").await, 1);
        Ok(())
    }

    /// Live ticks with nothing in the narrow radius emit nothing at all
    #[tokio::test]
    async fn test_live_no_results_is_silent() -> Result<()> {
        let (resolver, pool) = setup().await?;
        // 300 m away: inside the static radius, outside the live one
        upsert_building(&pool, &building("b", 55.7549, 37.6156)).await?;

        let event = LocationEvent::Live {
            coord: RED_SQUARE,
            message_id: MessageId(5),
        };
        assert!(matches!(
            resolver.resolve(UserId(1), event).await?,
            Resolution::Silent
        ));
        assert_eq!(stored_views(&pool, "b").await, 0);
        Ok(())
    }

    /// A duplicate tick still refreshes the session anchor
    #[tokio::test]
    async fn test_duplicate_tick_refreshes_anchor() -> Result<()> {
        let (resolver, pool) = setup().await?;
        upsert_building(&pool, &building("b", 55.7522, 37.6156)).await?;

        let user = UserId(1);
        resolver.record_live_start(user, RED_SQUARE, MessageId(5)).await;
        resolver
            .resolve(
                user,
                LocationEvent::Live {
                    coord: RED_SQUARE,
                    message_id: MessageId(5),
                },
            )
            .await?;

        let moved = Coordinate::new(55.7523, 37.6157);
        resolver
            .resolve(
                user,
                LocationEvent::Live {
                    coord: moved,
                    message_id: MessageId(5),
                },
            )
            .await?;

        let session = resolver.sessions.get(user).await.unwrap();
        assert_eq!(session.anchor, Some(moved));
        assert_eq!(
            session.last_shown_link.as_deref(),
            Some("https://example.com/article/b+1")
        );
        Ok(())
    }

    /// A static send resets the live dedup marker
    #[tokio::test]
    async fn test_static_resolve_clears_last_shown_link() -> Result<()> {
        let (resolver, pool) = setup().await?;
        upsert_building(&pool, &building("b", 55.7522, 37.6156)).await?;

        let user = UserId(1);
        resolver.record_live_start(user, RED_SQUARE, MessageId(5)).await;
        resolver
            .resolve(
                user,
                LocationEvent::Live {
                    coord: RED_SQUARE,
                    message_id: MessageId(5),
                },
            )
            .await?;

        resolver
            .resolve(
                user,
                LocationEvent::Static {
                    coord: RED_SQUARE,
                    reply_to: MessageId(9),
                },
            )
            .await?;

        let session = resolver.sessions.get(user).await.unwrap();
        assert!(session.last_shown_link.is_none());
        Ok(())
    }
}
