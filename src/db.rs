//! # Database Module
//!
//! SQLite-backed storage for the building catalog, the registered-user set
//! and the admin chat-relay mapping. The catalog answers nearest-neighbor
//! queries sorted by great-circle distance; ties at equal distance keep
//! catalog insertion order.

use anyhow::{Context, Result};
use chrono::Utc;
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::geo::{haversine_km, Coordinate};

/// A building of historical interest from the catalog.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BuildingRecord {
    /// Opaque external id assigned by the content source
    pub id: String,
    pub name: String,
    /// Thematic layer the content source files the building under
    pub layer: String,
    pub text: String,
    pub lat: f64,
    pub lon: f64,
    /// Photo URL shown on the card
    pub image: String,
    /// External article link; unique, doubles as the navigation correlation key
    pub link: String,
    pub views: i64,
}

impl BuildingRecord {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

/// Result of upserting one catalog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
    Unchanged,
}

/// Open (creating if missing) the database at `database_url`.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid database URL: {database_url}"))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("Failed to open database")?;

    Ok(pool)
}

/// Initialize the database schema.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS buildings (
            position INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            layer TEXT NOT NULL,
            text TEXT NOT NULL,
            lat REAL NOT NULL,
            lon REAL NOT NULL,
            image TEXT NOT NULL,
            link TEXT NOT NULL UNIQUE,
            views INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create buildings table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            registered_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create users table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS chat_relay (
            message_id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create chat_relay table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Insert or update one catalog record, preserving its view counter.
///
/// Records identical to what is already stored count as `Unchanged` so the
/// ingestion report only reflects real changes.
pub async fn upsert_building(pool: &SqlitePool, building: &BuildingRecord) -> Result<UpsertOutcome> {
    let existing = sqlx::query_as::<_, BuildingRecord>(
        "SELECT id, name, layer, text, lat, lon, image, link, views
         FROM buildings WHERE id = ?",
    )
    .bind(&building.id)
    .fetch_optional(pool)
    .await
    .context("Failed to look up building by id")?;

    match existing {
        None => {
            sqlx::query(
                "INSERT INTO buildings (id, name, layer, text, lat, lon, image, link, views)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&building.id)
            .bind(&building.name)
            .bind(&building.layer)
            .bind(&building.text)
            .bind(building.lat)
            .bind(building.lon)
            .bind(&building.image)
            .bind(&building.link)
            .bind(building.views)
            .execute(pool)
            .await
            .context("Failed to insert building")?;

            Ok(UpsertOutcome::Added)
        }
        Some(current) => {
            let unchanged = current.name == building.name
                && current.layer == building.layer
                && current.text == building.text
                && current.lat == building.lat
                && current.lon == building.lon
                && current.image == building.image
                && current.link == building.link;

            if unchanged {
                return Ok(UpsertOutcome::Unchanged);
            }

            // The view counter is owned by the proximity path, never by ingestion
            sqlx::query(
                "UPDATE buildings
                 SET name = ?, layer = ?, text = ?, lat = ?, lon = ?, image = ?, link = ?
                 WHERE id = ?",
            )
            .bind(&building.name)
            .bind(&building.layer)
            .bind(&building.text)
            .bind(building.lat)
            .bind(building.lon)
            .bind(&building.image)
            .bind(&building.link)
            .bind(&building.id)
            .execute(pool)
            .await
            .context("Failed to update building")?;

            Ok(UpsertOutcome::Updated)
        }
    }
}

/// Buildings within `radius_km` of `origin`, ascending by distance.
///
/// Ties keep catalog insertion order (the sort is stable over the
/// position-ordered scan). Pass [`crate::geo::HALF_EARTH_CIRCUMFERENCE_KM`]
/// for an effectively unbounded query.
pub async fn nearest_buildings(
    pool: &SqlitePool,
    origin: Coordinate,
    radius_km: f64,
) -> Result<Vec<(BuildingRecord, f64)>> {
    let records = sqlx::query_as::<_, BuildingRecord>(
        "SELECT id, name, layer, text, lat, lon, image, link, views
         FROM buildings ORDER BY position",
    )
    .fetch_all(pool)
    .await
    .context("Failed to query catalog")?;

    let mut nearby: Vec<(BuildingRecord, f64)> = records
        .into_iter()
        .map(|b| {
            let distance = haversine_km(origin, b.coordinate());
            (b, distance)
        })
        .filter(|(_, distance)| *distance <= radius_km)
        .collect();

    nearby.sort_by(|a, b| a.1.total_cmp(&b.1));

    Ok(nearby)
}

/// Increment the view counter for a building and return the new value.
///
/// Returns `None` when no record with that id exists.
pub async fn increment_views(pool: &SqlitePool, building_id: &str) -> Result<Option<i64>> {
    let result = sqlx::query("UPDATE buildings SET views = views + 1 WHERE id = ?")
        .bind(building_id)
        .execute(pool)
        .await
        .context("Failed to increment views counter")?;

    if result.rows_affected() == 0 {
        info!("No building found with id: {building_id}");
        return Ok(None);
    }

    let views: i64 = sqlx::query_scalar("SELECT views FROM buildings WHERE id = ?")
        .bind(building_id)
        .fetch_one(pool)
        .await
        .context("Failed to read views counter")?;

    Ok(Some(views))
}

/// Look up a building by its article link (the navigation correlation key).
pub async fn find_building_by_link(
    pool: &SqlitePool,
    link: &str,
) -> Result<Option<BuildingRecord>> {
    let building = sqlx::query_as::<_, BuildingRecord>(
        "SELECT id, name, layer, text, lat, lon, image, link, views
         FROM buildings WHERE link = ?",
    )
    .bind(link)
    .fetch_optional(pool)
    .await
    .context("Failed to look up building by link")?;

    Ok(building)
}

/// Register a user if not seen before. Returns true when the user is new.
pub async fn add_user_if_new(pool: &SqlitePool, user_id: i64) -> Result<bool> {
    let result = sqlx::query("INSERT OR IGNORE INTO users (id, registered_at) VALUES (?, ?)")
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .context("Failed to register user")?;

    Ok(result.rows_affected() > 0)
}

pub async fn count_users(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    Ok(count)
}

/// All registered user ids, for mailing fan-out.
pub async fn list_user_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM users ORDER BY id")
        .fetch_all(pool)
        .await
        .context("Failed to list users")?;

    Ok(ids)
}

/// Remember which user a message forwarded into the admin group came from.
pub async fn record_relay(pool: &SqlitePool, message_id: i64, user_id: i64) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO chat_relay (message_id, user_id) VALUES (?, ?)")
        .bind(message_id)
        .bind(user_id)
        .execute(pool)
        .await
        .context("Failed to record relay mapping")?;

    Ok(())
}

/// The user a forwarded admin-group message originated from, if known.
pub async fn relay_target(pool: &SqlitePool, message_id: i64) -> Result<Option<i64>> {
    let user_id: Option<i64> =
        sqlx::query_scalar("SELECT user_id FROM chat_relay WHERE message_id = ?")
            .bind(message_id)
            .fetch_optional(pool)
            .await
            .context("Failed to look up relay mapping")?;

    Ok(user_id)
}
