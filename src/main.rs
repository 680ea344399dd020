use dotenvy::dotenv;
use envconfig::Envconfig;
use teloxide::{
    dispatching::{
        dialogue::{self, InMemStorage},
        Dispatcher, UpdateFilterExt,
    },
    dptree::case,
    prelude::*,
};

use smartopd::config::Config;
use smartopd::db;
use smartopd::handlers::{self, registration, AppState, Command, Error, State};
use smartopd::services::{auth::Sessions, notifications};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize the logger with default settings or "info" level if not specified
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    log::info!("Starting the outpatient queue bot...");

    // Load environment variables from a .env file if present
    dotenv().ok();

    let config = Config::init_from_env()?;
    let pool = db::init_db(&config.database_url).await?;

    let bot = Bot::new(config.telegram_bot_token.clone());

    notifications::schedule_notifications(
        pool.clone(),
        bot.clone(),
        config.settings(),
        &config.notify_cron,
        &config.no_show_cron,
    )
    .await?;

    let state = AppState {
        sessions: Sessions::new(),
        settings: config.settings(),
    };

    let handler = dialogue::enter::<Update, InMemStorage<State>, State, _>()
        // Commands win over any conversation in progress
        .branch(
            Update::filter_message()
                .branch(dptree::entry().filter_command::<Command>().endpoint(handlers::answer)),
        )
        // Registration conversation steps
        .branch(
            Update::filter_message()
                .branch(case![State::ReceiveName].endpoint(registration::receive_name))
                .branch(case![State::ReceivePhone { name }].endpoint(registration::receive_phone))
                .branch(
                    case![State::ReceiveDepartment { draft, options }]
                        .endpoint(registration::receive_department),
                )
                .branch(
                    case![State::ReceiveDoctor { draft, options }]
                        .endpoint(registration::receive_doctor),
                )
                .branch(
                    case![State::ReceiveVisitType { draft }]
                        .endpoint(registration::receive_visit_type),
                )
                .branch(
                    case![State::ReceiveSlot { draft, options }]
                        .endpoint(registration::receive_slot),
                )
                .branch(
                    case![State::ReceiveAlerts { draft }].endpoint(registration::receive_alerts),
                ),
        )
        // Menu buttons and everything else
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![pool, InMemStorage::<State>::new(), state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("Shutting down gracefully");
    Ok(())
}
