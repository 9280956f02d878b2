//! # Catalog Ingestion Module
//!
//! Pulls building records out of the Notion workspace database and loads
//! them into the catalog. Records missing a required property are skipped
//! with a warning, never failing the whole batch; view counters of existing
//! records survive every refresh.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::{self, BuildingRecord, UpsertOutcome};

const NOTION_API_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

/// Outcome of one catalog refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub added: usize,
    pub updated: usize,
}

impl RefreshReport {
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.updated > 0
    }
}

/// Client for the Notion database that holds the building catalog.
pub struct NotionClient {
    http: reqwest::Client,
    token: String,
    database_id: String,
    article_base_url: String,
}

impl NotionClient {
    pub fn new(token: String, database_id: String, article_base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            database_id,
            article_base_url,
        }
    }

    /// Fetch every page of the database query and map the rows to catalog
    /// records, skipping malformed ones.
    pub async fn fetch_buildings(&self) -> Result<Vec<BuildingRecord>> {
        let mut buildings = Vec::new();
        let mut next_cursor: Option<String> = None;
        let mut skipped = 0usize;

        loop {
            let mut body = serde_json::json!({ "page_size": PAGE_SIZE });
            if let Some(cursor) = &next_cursor {
                body["start_cursor"] = Value::String(cursor.clone());
            }

            let response: Value = self
                .http
                .post(format!(
                    "{NOTION_API_URL}/databases/{}/query",
                    self.database_id
                ))
                .bearer_auth(&self.token)
                .header("Notion-Version", NOTION_VERSION)
                .json(&body)
                .send()
                .await
                .context("Notion query request failed")?
                .error_for_status()
                .context("Notion query returned an error status")?
                .json()
                .await
                .context("Notion query response is not JSON")?;

            let results = response["results"]
                .as_array()
                .context("Notion response has no results array")?;

            for page in results {
                match parse_building(page, &self.article_base_url) {
                    Some(building) => buildings.push(building),
                    None => skipped += 1,
                }
            }

            next_cursor = response["next_cursor"].as_str().map(str::to_string);
            if next_cursor.is_none() {
                break;
            }
        }

        if skipped > 0 {
            warn!(skipped, "Skipped malformed catalog records");
        }
        info!(count = buildings.len(), "Fetched buildings from Notion");
        Ok(buildings)
    }
}

/// Map one Notion page to a catalog record.
///
/// Returns `None` when a required property (layer, name, coordinates, image,
/// article ids) is absent or unreadable.
pub fn parse_building(page: &Value, article_base_url: &str) -> Option<BuildingRecord> {
    let id = page["id"].as_str()?.to_string();
    let properties = &page["properties"];

    // Records not assigned to a layer are drafts, not catalog content
    let layer = properties["properties.layer"]["select"]["name"]
        .as_str()?
        .to_string();

    let topos_id = properties["properties.topos_id"]["number"].as_i64()?;
    let taxonomy_id = properties["properties.taxonomy_id"]["number"].as_i64()?;
    let link = format!("{article_base_url}/{topos_id}+{taxonomy_id}");

    let name = properties["properties.name"]["rich_text"][0]["text"]["content"]
        .as_str()?
        .to_string();

    let coordinates = properties["geometry.coordinates"]["title"][0]["text"]["content"].as_str()?;
    let (lon, lat) = parse_coordinates(coordinates)?;

    let image = properties["properties.image"]["files"][0]["name"]
        .as_str()?
        .to_string();

    let text = properties["properties.text"]["rich_text"][0]["plain_text"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    Some(BuildingRecord {
        id,
        name,
        layer,
        text,
        lat,
        lon,
        image,
        link,
        views: 0,
    })
}

/// Parse the `"[lon, lat]"` string the content source stores coordinates in.
fn parse_coordinates(raw: &str) -> Option<(f64, f64)> {
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let mut parts = trimmed.split(',').map(str::trim);
    let lon: f64 = parts.next()?.parse().ok()?;
    let lat: f64 = parts.next()?.parse().ok()?;
    Some((lon, lat))
}

/// Drop records that duplicate an earlier one under a shared article
/// (same name and same link prefix before the taxonomy suffix).
pub fn dedupe_buildings(buildings: Vec<BuildingRecord>) -> Vec<BuildingRecord> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    buildings
        .into_iter()
        .filter(|b| {
            let stripped_link = b.link.split('+').next().unwrap_or(&b.link).to_string();
            seen.insert((b.name.clone(), stripped_link))
        })
        .collect()
}

/// Upsert the fetched records into the catalog, reporting real changes only.
pub async fn load_buildings(
    pool: &SqlitePool,
    buildings: &[BuildingRecord],
) -> Result<RefreshReport> {
    let mut report = RefreshReport::default();

    for building in buildings {
        match db::upsert_building(pool, building).await? {
            UpsertOutcome::Added => report.added += 1,
            UpsertOutcome::Updated => report.updated += 1,
            UpsertOutcome::Unchanged => {}
        }
    }

    info!(
        added = report.added,
        updated = report.updated,
        "Catalog refresh finished"
    );
    Ok(report)
}

/// Full refresh: fetch, dedupe, load.
pub async fn refresh_catalog(pool: &SqlitePool, client: &NotionClient) -> Result<RefreshReport> {
    let buildings = client.fetch_buildings().await?;
    let buildings = dedupe_buildings(buildings);
    load_buildings(pool, &buildings).await
}
