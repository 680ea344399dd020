use chrono::{Days, Local};
use futures::future;
use sqlx::PgPool;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::config::Settings;
use crate::services::appointment;
use crate::services::queue::CalledPatient;
use crate::utils::escape_markdown;

type Error = Box<dyn std::error::Error + Send + Sync>;

/// A waiting patient together with how many waiting tokens are ahead of them.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct WaitingPatient {
    pub patient_id: Uuid,
    pub name: String,
    pub chat_id: Option<i64>,
    pub notified: bool,
    pub token_number: i32,
    pub doctor_name: String,
    pub places_ahead: i64,
}

/// Registers the turn-alert and no-show jobs and starts the scheduler on
/// its own task.
pub async fn schedule_notifications(
    pool: PgPool,
    bot: Bot,
    settings: Settings,
    notify_cron: &str,
    no_show_cron: &str,
) -> Result<(), Error> {
    let sched = JobScheduler::new().await?;

    let alert_pool = pool.clone();
    let alert_job = Job::new_async(notify_cron, move |_uuid, _l| {
        let pool = alert_pool.clone();
        let bot = bot.clone();
        let ahead = settings.notify_ahead;
        Box::pin(async move {
            match check_and_notify_upcoming(&pool, &bot, ahead).await {
                Ok(sent) if sent > 0 => log::info!("Sent {} turn alert(s)", sent),
                Ok(_) => log::debug!("No turn alerts due"),
                Err(e) => log::error!("Error sending turn alerts: {}", e),
            }
        })
    })
    .map_err(|e| {
        log::error!("Failed to create turn alert job: {}", e);
        Box::new(e) as Error
    })?;

    let sweep_job = Job::new_async(no_show_cron, move |_uuid, _l| {
        let pool = pool.clone();
        Box::pin(async move {
            let tomorrow = Local::now().date_naive() + Days::new(1);
            match appointment::mark_no_shows(&pool, tomorrow).await {
                Ok(count) => log::info!("No-show sweep marked {} appointment(s)", count),
                Err(e) => log::error!("No-show sweep failed: {}", e),
            }
        })
    })
    .map_err(|e| {
        log::error!("Failed to create no-show job: {}", e);
        Box::new(e) as Error
    })?;

    sched.add(alert_job).await?;
    sched.add(sweep_job).await?;

    tokio::spawn(async move {
        if let Err(e) = sched.start().await {
            log::error!("Scheduler error: {}", e);
        }
    });

    log::info!("Notification scheduler started");
    Ok(())
}

/// Patients due a turn alert: reachable on a chat, not yet alerted, and
/// fewer than `ahead` waiting tokens in front of them.
pub fn select_alerts(waiting: Vec<WaitingPatient>, ahead: usize) -> Vec<WaitingPatient> {
    waiting
        .into_iter()
        .filter(|p| p.chat_id.is_some() && !p.notified && p.places_ahead < ahead as i64)
        .collect()
}

pub fn upcoming_message(patient: &WaitingPatient) -> String {
    let ahead = match patient.places_ahead {
        0 => "You are next in line".to_string(),
        1 => "1 patient is ahead of you".to_string(),
        n => format!("{} patients are ahead of you", n),
    };
    format!(
        "🔔 *{}, your turn is coming up*\n\n\
        *Token:* `{}`\n\
        *Doctor:* {}\n\
        {}\\. Please stay near the consultation room\\.",
        escape_markdown(&patient.name),
        patient.token_number,
        escape_markdown(&patient.doctor_name),
        escape_markdown(&ahead),
    )
}

pub fn called_message(token_number: i32) -> String {
    format!(
        "📣 *Token {} please proceed to the consultation room\\.*",
        token_number
    )
}

async fn fetch_waiting(pool: &PgPool) -> Result<Vec<WaitingPatient>, sqlx::Error> {
    sqlx::query_as::<_, WaitingPatient>(
        "SELECT p.id AS patient_id, p.name, p.chat_id, p.notified, t.token_number, \
                d.name AS doctor_name, \
                ROW_NUMBER() OVER (PARTITION BY t.doctor_id ORDER BY t.created_at, t.id) - 1 \
                    AS places_ahead \
         FROM queue_tokens t \
         JOIN patients p ON p.id = t.patient_id \
         JOIN doctors d ON d.id = t.doctor_id \
         WHERE t.status = 'waiting'",
    )
    .fetch_all(pool)
    .await
}

/// Sends due turn alerts concurrently and flags the patients that received
/// one. Returns how many were sent.
pub async fn check_and_notify_upcoming(
    pool: &PgPool,
    bot: &Bot,
    ahead: usize,
) -> Result<usize, Error> {
    let due = select_alerts(fetch_waiting(pool).await?, ahead);

    let sends = due
        .iter()
        .filter_map(|patient| patient.chat_id.map(|chat_id| (patient, ChatId(chat_id))))
        .map(|(patient, chat_id)| async move {
            bot.send_message(chat_id, upcoming_message(patient))
                .parse_mode(ParseMode::MarkdownV2)
                .await
                .map(|_| patient.patient_id)
        });

    let mut delivered = Vec::with_capacity(due.len());
    for result in future::join_all(sends).await {
        match result {
            Ok(patient_id) => delivered.push(patient_id),
            Err(e) => log::error!("Failed to send turn alert: {}", e),
        }
    }

    if !delivered.is_empty() {
        sqlx::query("UPDATE patients SET notified = TRUE WHERE id = ANY($1)")
            .bind(&delivered)
            .execute(pool)
            .await?;
    }

    Ok(delivered.len())
}

/// Tells a freshly called patient to come in, if they registered from a chat.
/// Returns whether a message was delivered.
pub async fn notify_called(bot: &Bot, called: &CalledPatient) -> bool {
    let Some(chat_id) = called.patient.as_ref().and_then(|p| p.chat_id) else {
        return false;
    };

    match bot
        .send_message(ChatId(chat_id), called_message(called.token.token_number))
        .parse_mode(ParseMode::MarkdownV2)
        .await
    {
        Ok(_) => true,
        Err(e) => {
            log::error!(
                "Failed to tell token {} they were called: {}",
                called.token.token_number,
                e
            );
            false
        }
    }
}
