use std::env;
use std::sync::Arc;

use anyhow::Result;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use landmarks::bot;
use landmarks::config::BotConfig;
use landmarks::db;
use landmarks::dialogue::SearchState;
use landmarks::geocode::Geocoder;
use landmarks::ingest::NotionClient;
use landmarks::pagination::Navigator;
use landmarks::proximity::Resolver;
use landmarks::session::SessionStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("landmarks=info,teloxide=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Landmarks Telegram Bot");

    let bot_token = env::var("TELEGRAM_BOT_TOKEN").expect("TELEGRAM_BOT_TOKEN must be set");
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let config = Arc::new(BotConfig::from_env()?);

    info!("Initializing database at: {database_url}");
    let pool = db::connect(&database_url).await?;
    db::init_schema(&pool).await?;

    // Engine components are constructed once here and handed out by injection
    let sessions = Arc::new(SessionStore::new());
    let resolver = Arc::new(Resolver::new(
        pool.clone(),
        Arc::clone(&sessions),
        config.radii,
    ));
    let navigator = Arc::new(Navigator::new(pool.clone(), Arc::clone(&sessions)));
    let geocoder = Arc::new(Geocoder::new());
    let notion = Arc::new(NotionClient::new(
        config.notion_token.clone(),
        config.notion_database_id.clone(),
        config.article_base_url.clone(),
    ));

    let bot = Bot::new(bot_token);

    if let Err(e) = bot
        .send_message(config.admin_group_id, "Бот запущен")
        .disable_notification(true)
        .await
    {
        warn!(error = %e, "Could not notify the admin group on startup");
    }

    info!("Bot initialized, starting dispatcher");

    Dispatcher::builder(bot, bot::schema())
        .dependencies(dptree::deps![
            pool,
            config,
            resolver,
            navigator,
            geocoder,
            notion,
            InMemStorage::<SearchState>::new()
        ])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
