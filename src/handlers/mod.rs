use teloxide::{
    dispatching::dialogue::InMemStorage,
    prelude::*,
    types::{KeyboardButton, KeyboardMarkup, ReplyMarkup},
    utils::command::BotCommands,
};
use uuid::Uuid;

use crate::config::Settings;
use crate::db::models::Role;
use crate::i18n;
use crate::services::auth::{Permission, Sessions, StaffUser};
use crate::services::ServiceError;

pub mod admin;
pub mod queue;
pub mod registration;

pub use registration::{Draft, State};

pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub type MyDialogue = Dialogue<State, InMemStorage<State>>;

/// Shared state injected into every handler next to the pool.
#[derive(Clone, Default)]
pub struct AppState {
    pub sessions: Sessions,
    pub settings: Settings,
}

pub const BUTTON_TOKEN: &str = "🎫 Get a Token";
pub const BUTTON_DEPARTMENTS: &str = "🏥 Departments";
pub const BUTTON_HELP: &str = "❓ Help";

#[derive(BotCommands, Debug, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start interacting with the queue bot.")]
    Start,
    #[command(description = "Display help information about available commands.")]
    Help,
    #[command(description = "Display the main menu.")]
    Menu,
    #[command(description = "List departments.")]
    Departments,
    #[command(description = "List doctors: /doctors [department number]")]
    Doctors(String),
    #[command(description = "Show slots: /slots <doctor-id> [YYYY-MM-DD]")]
    Slots(String),
    #[command(description = "Register for a queue token.")]
    Register,
    #[command(description = "Cancel the registration in progress.")]
    Cancel,
    #[command(description = "Queue summary: /status <doctor-id>")]
    Status(String),
    #[command(description = "Queue board: /queue <doctor-id>")]
    Queue(String),
    #[command(description = "Staff sign in: /login <email> <password>")]
    Login(String),
    #[command(description = "Staff sign out.")]
    Logout,
    #[command(description = "Show the signed-in staff account.")]
    Whoami,
    #[command(description = "Call the next patient: /next [doctor-id]")]
    Next(String),
    #[command(description = "Show your own queue (doctor accounts).")]
    Myqueue,
    #[command(description = "List patients: /patients [doctor-id]")]
    Patients(String),
    #[command(description = "Change a patient's status: /setstatus <patient-id> <status>")]
    Setstatus(String),
    #[command(description = "List appointments: /appointments [doctor-id]")]
    Appointments(String),
    #[command(description = "Book an appointment: /book <patient-id> <YYYY-MM-DD> <slot>")]
    Book(String),
    #[command(description = "Change an appointment's status: /apptstatus <appointment-id> <status>")]
    Apptstatus(String),
    #[command(description = "Show the audit log: /audit [limit]")]
    Audit(String),
    #[command(description = "Create a staff account: /adduser <email> <password> <ROLE> [doctor-id] <name>")]
    Adduser(String),
}

/// The user's language code, "en" when Telegram does not tell us.
pub fn lang_of(msg: &Message) -> String {
    msg.from
        .as_ref()
        .and_then(|user| user.language_code.clone())
        .unwrap_or_else(|| "en".to_string())
}

/// What a staff member sees when a service call fails.
pub fn error_text(lang: &str, err: &ServiceError) -> String {
    match err {
        ServiceError::Sqlx(e) => {
            log::error!("Database error while handling request: {}", e);
            i18n::text(lang, "internal_error").to_string()
        }
        ServiceError::InvalidCredentials => i18n::text(lang, "login_failed").to_string(),
        ServiceError::Forbidden => i18n::text(lang, "forbidden").to_string(),
        other => other.to_string(),
    }
}

/// Resolves the signed-in staff member and checks the permission, replying
/// to the chat when either fails.
pub async fn require_staff(
    bot: &Bot,
    msg: &Message,
    state: &AppState,
    permission: Permission,
) -> Result<Option<StaffUser>, Error> {
    let lang = lang_of(msg);
    let Some(user) = state.sessions.current(msg.chat.id.0) else {
        bot.send_message(msg.chat.id, i18n::text(&lang, "login_required"))
            .await?;
        return Ok(None);
    };

    if let Err(e) = user.ensure(permission) {
        bot.send_message(msg.chat.id, error_text(&lang, &e)).await?;
        return Ok(None);
    }

    Ok(Some(user))
}

/// Parses a required id argument, telling the user the expected usage if it
/// is missing or malformed.
pub async fn require_uuid(
    bot: &Bot,
    msg: &Message,
    arg: Option<&str>,
    usage: &str,
) -> Result<Option<Uuid>, Error> {
    match arg.and_then(crate::utils::parse_uuid) {
        Some(id) => Ok(Some(id)),
        None => {
            log::warn!("Rejected malformed id {:?}", arg);
            bot.send_message(msg.chat.id, format!("Usage: {}", usage))
                .await?;
            Ok(None)
        }
    }
}

/// Command list, followed by the role when the chat is signed in.
pub fn help_text(role: Option<Role>) -> String {
    let mut text = Command::descriptions().to_string();
    if let Some(role) = role {
        text.push_str(&format!("\n\nSigned in as {}.", role));
    }
    text
}

fn main_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(BUTTON_TOKEN)],
        vec![KeyboardButton::new(BUTTON_DEPARTMENTS)],
        vec![KeyboardButton::new(BUTTON_HELP)],
    ])
    .resize_keyboard()
    .one_time_keyboard()
}

/// Handles bot commands and responds accordingly.
///
/// Patient-facing commands are open to everyone; staff commands check the
/// chat's session and the role's permission before touching the queue.
pub async fn answer(
    bot: Bot,
    msg: Message,
    cmd: Command,
    pool: sqlx::PgPool,
    dialogue: MyDialogue,
    state: AppState,
) -> Result<(), Error> {
    let lang = lang_of(&msg);

    match cmd {
        Command::Start | Command::Menu => {
            log::info!("Received menu command");
            bot.send_message(msg.chat.id, i18n::text(&lang, "welcome"))
                .reply_markup(ReplyMarkup::Keyboard(main_menu()))
                .await?;
        }
        Command::Help => {
            log::info!("Received help command");
            let role = state.sessions.role(msg.chat.id.0);
            bot.send_message(msg.chat.id, help_text(role)).await?;
        }
        Command::Departments => queue::list_departments(&bot, &msg, &pool).await?,
        Command::Doctors(arg) => queue::list_doctors(&bot, &msg, &pool, &arg).await?,
        Command::Slots(arg) => queue::list_slots(&bot, &msg, &pool, &arg).await?,
        Command::Register => registration::start(bot, msg, dialogue).await?,
        Command::Cancel => registration::cancel(bot, msg, dialogue).await?,
        Command::Status(arg) => queue::show_status(&bot, &msg, &pool, &state, &arg).await?,
        Command::Queue(arg) => queue::show_board(&bot, &msg, &pool, &state, &arg).await?,
        Command::Next(arg) => queue::call_next(&bot, &msg, &pool, &state, &arg).await?,
        Command::Myqueue => queue::my_queue(&bot, &msg, &pool, &state).await?,
        Command::Login(arg) => admin::login(&bot, &msg, &pool, &state, &arg).await?,
        Command::Logout => admin::logout(&bot, &msg, &state).await?,
        Command::Whoami => admin::whoami(&bot, &msg, &state).await?,
        Command::Patients(arg) => admin::list_patients(&bot, &msg, &pool, &state, &arg).await?,
        Command::Setstatus(arg) => admin::set_status(&bot, &msg, &pool, &state, &arg).await?,
        Command::Appointments(arg) => {
            admin::list_appointments(&bot, &msg, &pool, &state, &arg).await?
        }
        Command::Book(arg) => admin::book(&bot, &msg, &pool, &state, &arg).await?,
        Command::Apptstatus(arg) => {
            admin::set_appointment_status(&bot, &msg, &pool, &state, &arg).await?
        }
        Command::Audit(arg) => admin::show_audit(&bot, &msg, &pool, &state, &arg).await?,
        Command::Adduser(arg) => admin::add_user(&bot, &msg, &pool, &state, &arg).await?,
    };

    Ok(())
}

/// Handles plain messages: the menu keyboard buttons, anything else gets a
/// pointer to /help.
pub async fn handle_message(
    bot: Bot,
    msg: Message,
    pool: sqlx::PgPool,
    dialogue: MyDialogue,
) -> Result<(), Error> {
    let lang = lang_of(&msg);
    if let Some(text) = msg.text() {
        match text {
            BUTTON_TOKEN => registration::start(bot, msg, dialogue).await?,
            BUTTON_DEPARTMENTS => queue::list_departments(&bot, &msg, &pool).await?,
            BUTTON_HELP => {
                bot.send_message(msg.chat.id, help_text(None)).await?;
            }
            _ => {
                bot.send_message(msg.chat.id, i18n::text(&lang, "unknown"))
                    .await?;
            }
        }
    }
    Ok(())
}
