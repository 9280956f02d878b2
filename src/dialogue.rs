//! Street-search dialogue module for tracking conversation state with users.

use serde::{Deserialize, Serialize};
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};

/// Represents the conversation state for the street-name search
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum SearchState {
    /// Top-level menu; location and button presses are handled directly
    #[default]
    Menu,
    /// The next text message is treated as an address to geocode
    StreetSearch,
}

/// Type alias for our search dialogue
pub type SearchDialogue = Dialogue<SearchState, InMemStorage<SearchState>>;

/// Validates a street-search query before it is sent to the geocoder
pub fn validate_street_query(query: &str) -> Result<String, &'static str> {
    let trimmed = query.trim();

    if trimmed.is_empty() {
        return Err("empty");
    }

    if trimmed.chars().count() > 200 {
        return Err("too_long");
    }

    Ok(trimmed.to_string())
}
