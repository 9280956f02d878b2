//! # Configuration Module
//!
//! This module defines the runtime configuration for the bot: search radii,
//! admin group, catalog source credentials and the geocoder policy.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use teloxide::types::ChatId;

/// Search radius for one-shot locations and street searches, in kilometers.
pub const STATIC_RADIUS_KM: f64 = 0.5;
/// Search radius for live-location updates, in kilometers. Narrower so a user
/// in transit is not flooded with cards.
pub const LIVE_RADIUS_KM: f64 = 0.1;
/// Minimum pause between consecutive geocoder calls (Nominatim usage policy).
pub const GEOCODER_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Radius policy for the proximity resolver.
#[derive(Debug, Clone, Copy)]
pub struct RadiusConfig {
    /// Radius for static locations and street searches, in kilometers
    pub static_radius_km: f64,
    /// Radius for live-location updates, in kilometers
    pub live_radius_km: f64,
}

impl Default for RadiusConfig {
    fn default() -> Self {
        Self {
            static_radius_km: STATIC_RADIUS_KM,
            live_radius_km: LIVE_RADIUS_KM,
        }
    }
}

/// Process-wide configuration, loaded from the environment once at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Chat id of the admin group (refresh/stats/mailing commands, chat relay)
    pub admin_group_id: ChatId,
    /// Notion integration token for catalog ingestion
    pub notion_token: String,
    /// Notion database id holding the building records
    pub notion_database_id: String,
    /// Base URL the per-building article links are built from
    pub article_base_url: String,
    pub radii: RadiusConfig,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        let admin_group_id = env::var("ADMIN_GROUP_ID")
            .context("ADMIN_GROUP_ID must be set")?
            .parse::<i64>()
            .context("ADMIN_GROUP_ID must be a numeric chat id")?;

        Ok(Self {
            admin_group_id: ChatId(admin_group_id),
            notion_token: env::var("NOTION_API_TOKEN").context("NOTION_API_TOKEN must be set")?,
            notion_database_id: env::var("NOTION_DB").context("NOTION_DB must be set")?,
            article_base_url: env::var("ARTICLE_BASE_URL")
                .unwrap_or_else(|_| "https://topos.memo.ru/article".to_string()),
            radii: RadiusConfig::default(),
        })
    }
}
