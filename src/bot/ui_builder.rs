//! UI Builder module for creating keyboards and formatting card messages

use anyhow::{Context, Result};
use teloxide::types::{
    ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
};
use url::Url;

use crate::proximity::BuildingCard;

// Reply-keyboard menu button labels
pub const STREET_SEARCH_BUTTON: &str = "🚏 Название места";
pub const OWN_LOCATION_BUTTON: &str = "📍 Ваше местоположение";
pub const ANY_LOCATION_BUTTON: &str = "🗺️ Поделиться геопозицией";

// Callback payloads embedded in the inline keyboards
pub const CB_NEXT: &str = "show_next_building";
pub const CB_PREVIOUS: &str = "show_previous_building";
pub const CB_SAVE: &str = "save_building";
pub const CB_SEND_GEO: &str = "send_geo";
pub const CB_COUNTER: &str = "counter";
pub const CB_BACK_FROM_SEARCH: &str = "back_from_street_search";

/// Top-level menu shown under the input field.
pub fn menu_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(STREET_SEARCH_BUTTON),
            KeyboardButton::new(OWN_LOCATION_BUTTON).request(ButtonRequest::Location),
        ],
        vec![KeyboardButton::new(ANY_LOCATION_BUTTON)],
    ])
    .resize_keyboard()
}

/// Inline keyboard for a paged building card.
///
/// Row 1 is always detail link + directions. Paging buttons appear only away
/// from the result-set edges; when both apply they collapse into one compact
/// glyph row. A save button and the "i of n" counter close the keyboard.
pub fn card_keyboard(card: &BuildingCard) -> Result<InlineKeyboardMarkup> {
    let detail_url: Url = card
        .link
        .parse()
        .with_context(|| format!("Building link is not a URL: {}", card.link))?;

    let mut rows = vec![vec![
        InlineKeyboardButton::url("Подробнее 📖", detail_url),
        InlineKeyboardButton::callback("Как дойти? 🚏", CB_SEND_GEO),
    ]];

    let has_previous = card.total > 1 && card.index != 0;
    let has_next = card.total > 1 && card.index + 1 != card.total;

    match (has_previous, has_next) {
        (true, true) => rows.push(vec![
            InlineKeyboardButton::callback("⏮️", CB_PREVIOUS),
            InlineKeyboardButton::callback("⏭️", CB_NEXT),
        ]),
        (true, false) => rows.push(vec![InlineKeyboardButton::callback(
            "⏮️ Предыдущее здание",
            CB_PREVIOUS,
        )]),
        (false, true) => rows.push(vec![InlineKeyboardButton::callback(
            "Cледующее здание ⏭️",
            CB_NEXT,
        )]),
        (false, false) => {}
    }

    rows.push(vec![InlineKeyboardButton::callback("Сохранить 📥", CB_SAVE)]);
    rows.push(vec![InlineKeyboardButton::callback(
        format!("{} из {}", card.index + 1, card.total),
        CB_COUNTER,
    )]);

    Ok(InlineKeyboardMarkup::new(rows))
}

/// Reduced keyboard for a saved (pinned) card: detail link + directions only.
pub fn saved_card_keyboard(card: &BuildingCard) -> Result<InlineKeyboardMarkup> {
    let detail_url: Url = card
        .link
        .parse()
        .with_context(|| format!("Building link is not a URL: {}", card.link))?;

    Ok(InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::url("Подробнее 📖", detail_url),
        InlineKeyboardButton::callback("Как дойти? 🚏", CB_SEND_GEO),
    ]]))
}

/// Inline keyboard offered when a street search found nothing.
pub fn back_from_search_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "👈 Вернуться",
        CB_BACK_FROM_SEARCH,
    )]])
}

/// HTML caption for a paged card.
pub fn card_caption(card: &BuildingCard) -> String {
    format!(
        "<b>{}</b>\n\n{}\n\n{} метров\n{} 👀",
        card.name,
        card.text,
        distance_in_metres(card.distance_km),
        card.views
    )
}

/// HTML caption for a saved card (no distance, the user may be long gone).
pub fn saved_card_caption(card: &BuildingCard) -> String {
    format!("<b>{}</b>\n\n{}", card.name, card.text)
}

/// Reply for the nothing-in-radius fallback. Both distances in kilometers.
pub fn nothing_nearby_text(radius_km: f64, nearest_km: f64) -> String {
    format!(
        "В радиусе {radius_km} км нет зданий! До ближайшего {:.1} км\n\nЖмите на кнопки!",
        nearest_km
    )
}

fn distance_in_metres(distance_km: f64) -> i64 {
    (distance_km * 1000.0).round() as i64
}
