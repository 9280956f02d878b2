//! Callback Handler module for processing inline keyboard callback queries

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButtonKind, InputFile, InputMedia, InputMediaPhoto, Message, ParseMode,
    ReplyParameters,
};
use tracing::{debug, warn};

use crate::db;
use crate::dialogue::{SearchDialogue, SearchState};
use crate::pagination::{NavDirection, NavOutcome, Navigator};

use super::ui_builder::{
    self, CB_BACK_FROM_SEARCH, CB_NEXT, CB_PREVIOUS, CB_SAVE, CB_SEND_GEO,
};

const STALE_SESSION_NOTICE: &str = "❌ Попробуйте заново отправить геопозицию";

/// Handle callback queries from inline keyboards
pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    pool: SqlitePool,
    navigator: Arc<Navigator>,
    dialogue: SearchDialogue,
) -> Result<()> {
    debug!(user_id = %q.from.id, data = ?q.data, "Received callback query from user");

    let data = q.data.as_deref().unwrap_or("");
    let answered = match data {
        CB_NEXT => navigate(&bot, &q, &navigator, NavDirection::Next).await?,
        CB_PREVIOUS => navigate(&bot, &q, &navigator, NavDirection::Previous).await?,
        CB_SAVE => navigate(&bot, &q, &navigator, NavDirection::Save).await?,
        CB_SEND_GEO => send_geo(&bot, &q, &pool).await?,
        CB_BACK_FROM_SEARCH => {
            if let Some(msg) = q.message.as_ref() {
                bot.delete_message(msg.chat().id, msg.id()).await?;
                bot.send_message(msg.chat().id, "Используйте кнопки!").await?;
            }
            dialogue.update(SearchState::Menu).await?;
            false
        }
        // The counter button and anything unknown just get acknowledged
        _ => false,
    };

    // Answer the callback query to remove the loading state
    if !answered {
        bot.answer_callback_query(q.id.clone()).await?;
    }

    Ok(())
}

/// Run one navigation step. Returns true when the callback query was already
/// answered on an error path.
async fn navigate(
    bot: &Bot,
    q: &CallbackQuery,
    navigator: &Navigator,
    direction: NavDirection,
) -> Result<bool> {
    let Some(msg) = q.message.as_ref().and_then(|m| m.regular_message()) else {
        warn!(user_id = %q.from.id, "Navigation callback without an accessible message");
        return Ok(false);
    };

    let Some(link) = embedded_link(msg) else {
        return notify_stale(bot, q).await;
    };

    match navigator.navigate(q.from.id, &link, direction).await? {
        NavOutcome::Show(card) => {
            let media = InputMedia::Photo(
                InputMediaPhoto::new(InputFile::url(card.image.parse()?))
                    .caption(ui_builder::card_caption(&card))
                    .parse_mode(ParseMode::Html),
            );
            bot.edit_message_media(msg.chat.id, msg.id, media)
                .reply_markup(ui_builder::card_keyboard(&card)?)
                .await?;
        }
        NavOutcome::Saved(card) => {
            let saved = bot
                .send_photo(msg.chat.id, InputFile::url(card.image.parse()?))
                .caption(ui_builder::saved_card_caption(&card))
                .parse_mode(ParseMode::Html)
                .reply_markup(ui_builder::saved_card_keyboard(&card)?)
                .reply_parameters(ReplyParameters::new(card.reply_to))
                .await?;

            bot.pin_chat_message(msg.chat.id, saved.id)
                .disable_notification(true)
                .await?;
        }
        NavOutcome::Boundary => {
            // At the edge of the result set, nothing to show
        }
        NavOutcome::StaleSession => {
            return notify_stale(bot, q).await;
        }
    }

    Ok(false)
}

/// Reply with a silent location for the building the card links to.
async fn send_geo(bot: &Bot, q: &CallbackQuery, pool: &SqlitePool) -> Result<bool> {
    let Some(msg) = q.message.as_ref().and_then(|m| m.regular_message()) else {
        return Ok(false);
    };

    let Some(link) = embedded_link(msg) else {
        return notify_stale(bot, q).await;
    };

    match db::find_building_by_link(pool, &link).await? {
        Some(building) => {
            bot.send_location(msg.chat.id, building.lat, building.lon)
                .disable_notification(true)
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
            Ok(false)
        }
        None => {
            warn!(link, "send_geo for a link missing from the catalog");
            notify_stale(bot, q).await
        }
    }
}

/// The article link baked into the first button of the card's keyboard. This
/// is how a button press is correlated back to its catalog record.
fn embedded_link(msg: &Message) -> Option<String> {
    let button = msg.reply_markup()?.inline_keyboard.first()?.first()?;
    match &button.kind {
        InlineKeyboardButtonKind::Url(url) => Some(url.to_string()),
        _ => None,
    }
}

async fn notify_stale(bot: &Bot, q: &CallbackQuery) -> Result<bool> {
    bot.answer_callback_query(q.id.clone())
        .text(STALE_SESSION_NOTICE)
        .await?;
    Ok(true)
}
