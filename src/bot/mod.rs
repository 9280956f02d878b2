//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules for better organization:
//! - `message_handler`: Handles commands, menu buttons, locations and relay
//! - `callback_handler`: Handles inline keyboard callback queries
//! - `ui_builder`: Creates keyboards and formats card messages

pub mod callback_handler;
pub mod message_handler;
pub mod ui_builder;

use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::{HandlerExt, UpdateFilterExt, UpdateHandler};
use teloxide::dptree;
use teloxide::prelude::*;

use crate::dialogue::SearchState;

// Re-export main handler functions for use in main.rs and tests
pub use callback_handler::callback_handler;
pub use message_handler::{render_resolution, send_building_card, Command};

/// The full update-dispatch tree.
pub fn schema() -> UpdateHandler<anyhow::Error> {
    let messages = Update::filter_message()
        .enter_dialogue::<Message, InMemStorage<SearchState>, SearchState>()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(message_handler::command_handler),
        )
        .branch(
            dptree::filter(|msg: Message| msg.text() == Some(ui_builder::STREET_SEARCH_BUTTON))
                .endpoint(message_handler::street_search_button_handler),
        )
        .branch(
            dptree::filter(|msg: Message| msg.text() == Some(ui_builder::ANY_LOCATION_BUTTON))
                .endpoint(message_handler::any_location_button_handler),
        )
        .branch(
            dptree::filter(|msg: Message| msg.location().is_some())
                .endpoint(message_handler::location_handler),
        )
        .branch(
            dptree::case![SearchState::StreetSearch]
                .endpoint(message_handler::street_query_handler),
        )
        .branch(dptree::endpoint(message_handler::chat_relay_handler));

    // Live-location ticks arrive as edits of the original location message
    let live_locations = Update::filter_edited_message()
        .filter(|msg: Message| msg.location().is_some())
        .endpoint(message_handler::live_location_handler);

    let callbacks = Update::filter_callback_query()
        .enter_dialogue::<CallbackQuery, InMemStorage<SearchState>, SearchState>()
        .endpoint(callback_handler::callback_handler);

    dptree::entry()
        .branch(messages)
        .branch(live_locations)
        .branch(callbacks)
}
