//! Message Handler module for processing incoming Telegram messages

use std::sync::Arc;

use anyhow::Result;
use rand::seq::SliceRandom;
use sqlx::SqlitePool;
use teloxide::prelude::*;
use teloxide::types::{
    InputFile, Message, MessageEntity, MessageEntityKind, ParseMode, ReplyParameters,
};
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info, warn};

use crate::config::BotConfig;
use crate::db;
use crate::dialogue::{validate_street_query, SearchDialogue, SearchState};
use crate::geo::Coordinate;
use crate::geocode::Geocoder;
use crate::ingest::{self, NotionClient};
use crate::proximity::{BuildingCard, LocationEvent, Resolution, Resolver};

use super::ui_builder;

const CATALOG_RETRY_NOTICE: &str = "Каталог сейчас недоступен, попробуйте позже";

const EXAMPLE_PLACES: [&str; 10] = [
    "Улица Солянка, Москва",
    "Даниловский монастырь",
    "Бутырская тюрьма",
    "Камергерский переулок, 2",
    "Лубянская площадь",
    "Таганская улица",
    "Петровка, 38",
    "Метро Чистые пруды",
    "МГУ",
    "Улица Воздвиженка",
];

#[derive(BotCommands, Clone)]
#[command(rename_rule = "snake_case")]
pub enum Command {
    #[command(description = "Начать использование")]
    Start,
    #[command(description = "Сколько пользователей у бота (админ)")]
    Stats,
    #[command(description = "Разослать сообщение всем пользователям (админ)")]
    MailingMessage,
    #[command(description = "Обновить каталог зданий (админ)")]
    RefreshDatabase,
}

pub async fn command_handler(
    bot: Bot,
    msg: Message,
    pool: SqlitePool,
    config: Arc<BotConfig>,
    notion: Arc<NotionClient>,
    command: Command,
) -> Result<()> {
    match command {
        Command::Start => handle_start(&bot, &msg, &pool).await,
        Command::Stats => show_stats(&bot, &msg, &pool, &config).await,
        Command::MailingMessage => mailing(&bot, &msg, &pool, &config).await,
        Command::RefreshDatabase => refresh_database(&bot, &msg, &pool, &config, &notion).await,
    }
}

async fn handle_start(bot: &Bot, msg: &Message, pool: &SqlitePool) -> Result<()> {
    if let Some(user) = msg.from.as_ref() {
        if db::add_user_if_new(pool, user.id.0 as i64).await? {
            info!(user_id = %user.id, "Registered a new user");
        }
    }

    let welcome = "Привет!\n\n\
        Этот бот находит рядом с вами здания с историей.\n\n\
        Вы можете:\n\
        Ввести название улицы или места в Москве\n\
        Отправить боту текущую геопозицию\n\
        Отправить любую геопозицию или ее трансляцию";

    bot.send_message(msg.chat.id, welcome)
        .reply_markup(ui_builder::menu_keyboard())
        .await?;
    Ok(())
}

async fn show_stats(
    bot: &Bot,
    msg: &Message,
    pool: &SqlitePool,
    config: &BotConfig,
) -> Result<()> {
    if msg.chat.id != config.admin_group_id {
        return Ok(());
    }

    let total_users = db::count_users(pool).await?;
    bot.send_message(config.admin_group_id, format!("Пользуются ботом: {total_users}"))
        .await?;
    Ok(())
}

async fn refresh_database(
    bot: &Bot,
    msg: &Message,
    pool: &SqlitePool,
    config: &BotConfig,
    notion: &NotionClient,
) -> Result<()> {
    if msg.chat.id != config.admin_group_id {
        return Ok(());
    }

    let status = bot
        .send_message(
            msg.chat.id,
            "Обновление займет примерно 1.5 минуты ⏳\n\nПо завершению придет тэг",
        )
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;

    match ingest::refresh_catalog(pool, notion).await {
        Ok(report) if report.has_changes() => {
            bot.edit_message_text(
                msg.chat.id,
                status.id,
                format!("✅\n\nДобавлено: {}\nОбновлено: {}", report.added, report.updated),
            )
            .await?;
        }
        Ok(_) => {
            bot.edit_message_text(msg.chat.id, status.id, "Обновлений нет 🤷‍♂️")
                .await?;
        }
        Err(e) => {
            error!(error = %e, "Catalog refresh failed");
            bot.edit_message_text(
                msg.chat.id,
                status.id,
                "Не получилось обновить каталог, попробуйте позже",
            )
            .await?;
        }
    }

    if let Some(username) = msg.from.as_ref().and_then(|u| u.username.clone()) {
        bot.send_message(config.admin_group_id, format!("@{username}"))
            .await?;
    }
    Ok(())
}

/// Strip the command line and re-materialize `text_link` entities as HTML
/// anchors, since plain forwarded text loses them.
pub fn mailing_html(full_text: &str, entities: &[MessageEntity]) -> String {
    let body = full_text.splitn(2, '\n').nth(1).unwrap_or("").to_string();
    // Entity offsets are UTF-16 code units into the full message text
    let utf16: Vec<u16> = full_text.encode_utf16().collect();

    let mut result = body;
    for entity in entities {
        if let MessageEntityKind::TextLink { url } = &entity.kind {
            let end = (entity.offset + entity.length).min(utf16.len());
            if entity.offset >= end {
                continue;
            }
            let link_text = String::from_utf16_lossy(&utf16[entity.offset..end]);
            result = result.replace(
                &link_text,
                &format!("<a href=\"{url}\">{link_text}</a>"),
            );
        }
    }
    result
}

async fn mailing(bot: &Bot, msg: &Message, pool: &SqlitePool, config: &BotConfig) -> Result<()> {
    if msg.chat.id != config.admin_group_id {
        return Ok(());
    }

    let Some(full_text) = msg.text() else {
        return Ok(());
    };

    let mailing_text = mailing_html(full_text, msg.entities().unwrap_or(&[]));
    if mailing_text.trim().is_empty() {
        bot.send_message(
            config.admin_group_id,
            "Добавьте текст рассылки со второй строки сообщения",
        )
        .await?;
        return Ok(());
    }

    let users = db::list_user_ids(pool).await?;
    let total = users.len();
    let mut delivered = 0usize;

    for user_id in users {
        match bot
            .send_message(ChatId(user_id), &mailing_text)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => delivered += 1,
            Err(e) => {
                warn!(user_id, error = %e, "Mailing delivery failed");
                bot.send_message(
                    config.admin_group_id,
                    format!("Не дошло до пользователя {user_id}: {e}"),
                )
                .await?;
            }
        }
    }

    bot.send_message(
        config.admin_group_id,
        format!("Юзеров получили сообщение: {delivered} из {total}\n\n{mailing_text}"),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

fn sample_places() -> Vec<&'static str> {
    let mut rng = rand::thread_rng();
    EXAMPLE_PLACES
        .choose_multiple(&mut rng, 3)
        .copied()
        .collect()
}

pub async fn street_search_button_handler(
    bot: Bot,
    msg: Message,
    dialogue: SearchDialogue,
) -> Result<()> {
    dialogue.update(SearchState::StreetSearch).await?;

    let places = sample_places();
    bot.send_message(
        msg.chat.id,
        format!(
            "Напишите адрес в свободном формате.\n\nНапример\n{}\n{}\n{}",
            places[0], places[1], places[2]
        ),
    )
    .await?;
    Ok(())
}

pub async fn any_location_button_handler(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(
        msg.chat.id,
        "Выберите во вложениях обычную геопозицию или трансляцию геопозиции",
    )
    .await?;
    Ok(())
}

/// A text message while the dialogue waits for an address to geocode.
pub async fn street_query_handler(
    bot: Bot,
    msg: Message,
    geocoder: Arc<Geocoder>,
    resolver: Arc<Resolver>,
    dialogue: SearchDialogue,
) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Ok(query) = validate_street_query(text) else {
        bot.send_message(msg.chat.id, "Напишите адрес текстом, пожалуйста")
            .await?;
        return Ok(());
    };

    match geocoder.geocode(&query).await {
        Ok(Some(place)) => {
            debug!(query = %query, resolved = %place.display_name, "Street search resolved");
            bot.send_location(msg.chat.id, place.coordinate.lat, place.coordinate.lon)
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
            bot.send_message(
                msg.chat.id,
                format!(
                    "🔎\n\nВаш запрос превратился в <b>{}</b>\n\n\
                     Если запрос неправильный – попробуйте еще раз через кнопки!",
                    place.display_name
                ),
            )
            .parse_mode(ParseMode::Html)
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
            dialogue.update(SearchState::Menu).await?;

            if let Some(user) = msg.from.as_ref().map(|u| u.id) {
                let event = LocationEvent::Static {
                    coord: place.coordinate,
                    reply_to: msg.id,
                };
                match resolver.resolve(user, event).await {
                    Ok(resolution) => render_resolution(&bot, msg.chat.id, resolution).await?,
                    Err(e) => {
                        error!(error = %e, "Proximity resolution failed after street search");
                        bot.send_message(msg.chat.id, CATALOG_RETRY_NOTICE).await?;
                    }
                }
            }
        }
        Ok(None) => {
            bot.send_message(
                msg.chat.id,
                "Ничего не нашлось. Введите название еще раз или вернитесь назад",
            )
            .reply_markup(ui_builder::back_from_search_keyboard())
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
        }
        Err(e) => {
            warn!(error = %e, "Geocoder failed");
            bot.send_message(msg.chat.id, "Что-то пошло не так, попробуйте еще раз")
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
            dialogue.update(SearchState::Menu).await?;
        }
    }
    Ok(())
}

/// A location message: either a one-shot send or the start of a live share.
pub async fn location_handler(bot: Bot, msg: Message, resolver: Arc<Resolver>) -> Result<()> {
    let Some(location) = msg.location() else {
        return Ok(());
    };
    let Some(user) = msg.from.as_ref().map(|u| u.id) else {
        return Ok(());
    };
    let coord = Coordinate::new(location.latitude, location.longitude);

    if location.live_period.is_some() {
        // Cards come later, once edited-message updates start arriving
        debug!(user_id = %user, "Live share started");
        resolver.record_live_start(user, coord, msg.id).await;
        return Ok(());
    }

    let event = LocationEvent::Static {
        coord,
        reply_to: msg.id,
    };
    match resolver.resolve(user, event).await {
        Ok(resolution) => render_resolution(&bot, msg.chat.id, resolution).await?,
        Err(e) => {
            error!(error = %e, "Proximity resolution failed");
            bot.send_message(msg.chat.id, CATALOG_RETRY_NOTICE).await?;
        }
    }
    Ok(())
}

/// An edited location message: one tick of a live share.
pub async fn live_location_handler(bot: Bot, msg: Message, resolver: Arc<Resolver>) -> Result<()> {
    let Some(location) = msg.location() else {
        return Ok(());
    };
    let Some(user) = msg.from.as_ref().map(|u| u.id) else {
        return Ok(());
    };

    let event = LocationEvent::Live {
        coord: Coordinate::new(location.latitude, location.longitude),
        message_id: msg.id,
    };
    match resolver.resolve(user, event).await {
        Ok(resolution) => render_resolution(&bot, msg.chat.id, resolution).await?,
        // No user-facing noise on a failed tick, the next one will retry
        Err(e) => error!(error = %e, "Live tick resolution failed"),
    }
    Ok(())
}

/// Everything else: relay between users and the admin group.
pub async fn chat_relay_handler(
    bot: Bot,
    msg: Message,
    pool: SqlitePool,
    config: Arc<BotConfig>,
) -> Result<()> {
    if msg.chat.id != config.admin_group_id {
        let Some(user) = msg.from.as_ref().map(|u| u.id) else {
            return Ok(());
        };
        let forwarded = bot
            .forward_message(config.admin_group_id, msg.chat.id, msg.id)
            .await?;
        db::record_relay(&pool, forwarded.id.0 as i64, user.0 as i64).await?;
        debug!(user_id = %user, forwarded_id = forwarded.id.0, "Relayed message to admins");
        return Ok(());
    }

    // Inside the admin group only replies to the bot's forwards go back out
    let Some(reply) = msg.reply_to_message() else {
        return Ok(());
    };
    let replied_to_bot = reply.from.as_ref().map(|u| u.is_bot).unwrap_or(false);
    if !replied_to_bot {
        return Ok(());
    }

    if let Some(user_id) = db::relay_target(&pool, reply.id.0 as i64).await? {
        if let Some(text) = msg.text() {
            bot.send_message(ChatId(user_id), text).await?;
            debug!(user_id, "Relayed admin reply back to user");
        }
    }
    Ok(())
}

/// Send one building card as a photo message with its inline keyboard.
pub async fn send_building_card(bot: &Bot, chat_id: ChatId, card: &BuildingCard) -> Result<Message> {
    let message = bot
        .send_photo(chat_id, InputFile::url(card.image.parse()?))
        .caption(ui_builder::card_caption(card))
        .parse_mode(ParseMode::Html)
        .reply_markup(ui_builder::card_keyboard(card)?)
        .reply_parameters(ReplyParameters::new(card.reply_to))
        .await?;
    Ok(message)
}

/// Turn a resolver outcome into outgoing messages.
pub async fn render_resolution(bot: &Bot, chat_id: ChatId, resolution: Resolution) -> Result<()> {
    match resolution {
        Resolution::Card(card) => {
            send_building_card(bot, chat_id, &card).await?;
        }
        Resolution::NothingNearby {
            radius_km,
            nearest_km,
            reply_to,
        } => {
            bot.send_message(
                chat_id,
                ui_builder::nothing_nearby_text(radius_km, nearest_km),
            )
            .reply_parameters(ReplyParameters::new(reply_to))
            .await?;
        }
        Resolution::Silent => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn test_mailing_html_strips_command_line() {
        let text = "/mailing_message\nПривет всем!\nВторая строка";
        assert_eq!(mailing_html(text, &[]), "Привет всем!\nВторая строка");
    }

    #[test]
    fn test_mailing_html_without_body_is_empty() {
        assert_eq!(mailing_html("/mailing_message", &[]), "");
    }

    #[test]
    fn test_mailing_html_rebuilds_text_links() {
        let text = "/mailing_message\nЧитайте наш сайт обязательно";
        // "сайт" starts after "/mailing_message\nЧитайте наш " (29 UTF-16 units)
        let entity = MessageEntity {
            kind: MessageEntityKind::TextLink {
                url: Url::parse("https://example.com/").unwrap(),
            },
            offset: 29,
            length: 4,
        };

        let html = mailing_html(text, &[entity]);
        assert_eq!(
            html,
            "Читайте наш <a href=\"https://example.com/\">сайт</a> обязательно"
        );
    }

    #[test]
    fn test_mailing_html_ignores_out_of_range_entity() {
        let text = "/mailing_message\nТекст";
        let entity = MessageEntity {
            kind: MessageEntityKind::TextLink {
                url: Url::parse("https://example.com/").unwrap(),
            },
            offset: 1000,
            length: 4,
        };
        assert_eq!(mailing_html(text, &[entity]), "Текст");
    }

    #[test]
    fn test_sample_places_picks_three_distinct() {
        let places = sample_places();
        assert_eq!(places.len(), 3);
        assert_ne!(places[0], places[1]);
        assert_ne!(places[1], places[2]);
        assert_ne!(places[0], places[2]);
        for place in places {
            assert!(EXAMPLE_PLACES.contains(&place));
        }
    }

    #[test]
    fn test_commands_parse() {
        assert!(Command::parse("/start", "landmarks_bot").is_ok());
        assert!(Command::parse("/stats", "landmarks_bot").is_ok());
        assert!(Command::parse("/refresh_database", "landmarks_bot").is_ok());
        assert!(Command::parse("/mailing_message\nТекст рассылки", "landmarks_bot").is_ok());
    }
}
