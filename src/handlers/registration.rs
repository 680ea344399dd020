use chrono::Local;
use sqlx::PgPool;
use teloxide::prelude::*;
use uuid::Uuid;

use crate::db::models::{NotificationPreferences, VisitType};
use crate::handlers::{error_text, lang_of, Error, MyDialogue};
use crate::i18n;
use crate::services::{appointment, department, patient, patient::NewPatient};

/// What has been collected so far in a registration conversation.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Draft {
    pub name: String,
    pub phone: String,
    pub department_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub visit_type: Option<VisitType>,
    pub slot: Option<String>,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub enum State {
    #[default]
    Start,
    ReceiveName,
    ReceivePhone {
        name: String,
    },
    ReceiveDepartment {
        draft: Draft,
        options: Vec<Uuid>,
    },
    ReceiveDoctor {
        draft: Draft,
        options: Vec<Uuid>,
    },
    ReceiveVisitType {
        draft: Draft,
    },
    ReceiveSlot {
        draft: Draft,
        options: Vec<String>,
    },
    ReceiveAlerts {
        draft: Draft,
    },
}

/// A 1-based menu pick turned into an index, if it is in range.
pub fn parse_choice(text: &str, len: usize) -> Option<usize> {
    match text.trim().parse::<usize>() {
        Ok(n) if n >= 1 && n <= len => Some(n - 1),
        _ => None,
    }
}

pub fn parse_visit_type(text: &str) -> Option<VisitType> {
    match text.trim().to_lowercase().as_str() {
        "1" | "walk-in" | "walkin" => Some(VisitType::WalkIn),
        "2" | "appointment" => Some(VisitType::Appointment),
        _ => None,
    }
}

pub fn parse_alerts(text: &str) -> Option<NotificationPreferences> {
    let (sms, whatsapp) = match text.trim() {
        "1" => (false, false),
        "2" => (true, false),
        "3" => (false, true),
        "4" => (true, true),
        _ => return None,
    };
    Some(NotificationPreferences { sms, whatsapp })
}

/// Numbered list used for every choice in the conversation.
pub fn numbered<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn start(bot: Bot, msg: Message, dialogue: MyDialogue) -> Result<(), Error> {
    log::info!("Starting registration in chat {}", msg.chat.id);
    bot.send_message(msg.chat.id, i18n::text(&lang_of(&msg), "ask_name"))
        .await?;
    dialogue.update(State::ReceiveName).await?;
    Ok(())
}

pub async fn cancel(bot: Bot, msg: Message, dialogue: MyDialogue) -> Result<(), Error> {
    let lang = lang_of(&msg);
    let in_progress = !matches!(dialogue.get().await?, None | Some(State::Start));
    dialogue.exit().await?;
    let key = if in_progress { "cancelled" } else { "nothing_to_cancel" };
    bot.send_message(msg.chat.id, i18n::text(&lang, key)).await?;
    Ok(())
}

async fn prompt(bot: &Bot, msg: &Message, key: &str) -> Result<(), Error> {
    bot.send_message(msg.chat.id, i18n::text(&lang_of(msg), key))
        .await?;
    Ok(())
}

pub async fn receive_name(bot: Bot, msg: Message, dialogue: MyDialogue) -> Result<(), Error> {
    match msg.text().map(str::trim).filter(|t| !t.is_empty()) {
        Some(name) => {
            bot.send_message(msg.chat.id, i18n::text(&lang_of(&msg), "ask_phone"))
                .await?;
            dialogue
                .update(State::ReceivePhone {
                    name: name.to_string(),
                })
                .await?;
        }
        None => prompt(&bot, &msg, "send_text").await?,
    }
    Ok(())
}

pub async fn receive_phone(
    bot: Bot,
    msg: Message,
    dialogue: MyDialogue,
    name: String,
    pool: PgPool,
) -> Result<(), Error> {
    let lang = lang_of(&msg);
    let Some(phone) = msg.text().map(str::trim).filter(|t| !t.is_empty()) else {
        return prompt(&bot, &msg, "send_text").await;
    };

    let departments = department::list_departments(&pool).await;
    if departments.is_empty() {
        bot.send_message(msg.chat.id, i18n::text(&lang, "no_departments"))
            .await?;
        dialogue.exit().await?;
        return Ok(());
    }

    let listing = numbered(departments.iter().map(|d| d.name.as_str()));
    bot.send_message(
        msg.chat.id,
        format!("{}\n\n{}", i18n::text(&lang, "ask_department"), listing),
    )
    .await?;

    dialogue
        .update(State::ReceiveDepartment {
            draft: Draft {
                name,
                phone: phone.to_string(),
                ..Draft::default()
            },
            options: departments.into_iter().map(|d| d.id).collect(),
        })
        .await?;
    Ok(())
}

pub async fn receive_department(
    bot: Bot,
    msg: Message,
    dialogue: MyDialogue,
    (mut draft, options): (Draft, Vec<Uuid>),
    pool: PgPool,
) -> Result<(), Error> {
    let lang = lang_of(&msg);
    let Some(index) = msg.text().and_then(|t| parse_choice(t, options.len())) else {
        return prompt(&bot, &msg, "invalid_choice").await;
    };

    let department_id = options[index];
    let doctors: Vec<_> = department::list_doctors(&pool, Some(department_id))
        .await
        .into_iter()
        .filter(|d| d.available)
        .collect();
    if doctors.is_empty() {
        bot.send_message(msg.chat.id, i18n::text(&lang, "no_doctors"))
            .await?;
        dialogue.exit().await?;
        return Ok(());
    }

    let listing = numbered(doctors.iter().map(|d| d.name.as_str()));
    bot.send_message(
        msg.chat.id,
        format!("{}\n\n{}", i18n::text(&lang, "ask_doctor"), listing),
    )
    .await?;

    draft.department_id = Some(department_id);
    dialogue
        .update(State::ReceiveDoctor {
            draft,
            options: doctors.into_iter().map(|d| d.id).collect(),
        })
        .await?;
    Ok(())
}

pub async fn receive_doctor(
    bot: Bot,
    msg: Message,
    dialogue: MyDialogue,
    (mut draft, options): (Draft, Vec<Uuid>),
) -> Result<(), Error> {
    let Some(index) = msg.text().and_then(|t| parse_choice(t, options.len())) else {
        return prompt(&bot, &msg, "invalid_choice").await;
    };

    draft.doctor_id = Some(options[index]);
    prompt(&bot, &msg, "ask_visit_type").await?;
    dialogue.update(State::ReceiveVisitType { draft }).await?;
    Ok(())
}

pub async fn receive_visit_type(
    bot: Bot,
    msg: Message,
    dialogue: MyDialogue,
    mut draft: Draft,
    pool: PgPool,
) -> Result<(), Error> {
    let lang = lang_of(&msg);
    let Some(visit_type) = msg.text().and_then(parse_visit_type) else {
        return prompt(&bot, &msg, "invalid_choice").await;
    };
    draft.visit_type = Some(visit_type);

    if visit_type == VisitType::WalkIn {
        prompt(&bot, &msg, "ask_alerts").await?;
        dialogue.update(State::ReceiveAlerts { draft }).await?;
        return Ok(());
    }

    let Some(doctor_id) = draft.doctor_id else {
        dialogue.exit().await?;
        return prompt(&bot, &msg, "registration_failed").await;
    };

    let today = Local::now().date_naive();
    let slots = match appointment::available_slots(&pool, doctor_id, today).await {
        Ok(slots) => slots,
        Err(e) => {
            bot.send_message(msg.chat.id, error_text(&lang, &e)).await?;
            return Ok(());
        }
    };
    if slots.is_empty() {
        prompt(&bot, &msg, "no_slots").await?;
        dialogue.exit().await?;
        return Ok(());
    }

    let listing = numbered(slots.iter().map(String::as_str));
    bot.send_message(
        msg.chat.id,
        format!("{}\n\n{}", i18n::text(&lang, "ask_slot"), listing),
    )
    .await?;
    dialogue
        .update(State::ReceiveSlot {
            draft,
            options: slots,
        })
        .await?;
    Ok(())
}

pub async fn receive_slot(
    bot: Bot,
    msg: Message,
    dialogue: MyDialogue,
    (mut draft, options): (Draft, Vec<String>),
) -> Result<(), Error> {
    let Some(index) = msg.text().and_then(|t| parse_choice(t, options.len())) else {
        return prompt(&bot, &msg, "invalid_choice").await;
    };

    draft.slot = Some(options[index].clone());
    prompt(&bot, &msg, "ask_alerts").await?;
    dialogue.update(State::ReceiveAlerts { draft }).await?;
    Ok(())
}

/// Builds the registration request once every step has been answered.
pub fn finish_draft(
    draft: Draft,
    notifications: NotificationPreferences,
    chat_id: i64,
) -> Option<NewPatient> {
    Some(NewPatient {
        name: draft.name,
        phone: draft.phone,
        department_id: draft.department_id?,
        doctor_id: draft.doctor_id?,
        visit_type: draft.visit_type?,
        appointment_time: draft.slot,
        notifications,
        chat_id: Some(chat_id),
    })
}

pub async fn receive_alerts(
    bot: Bot,
    msg: Message,
    dialogue: MyDialogue,
    draft: Draft,
    pool: PgPool,
) -> Result<(), Error> {
    let lang = lang_of(&msg);
    let Some(notifications) = msg.text().and_then(parse_alerts) else {
        return prompt(&bot, &msg, "invalid_choice").await;
    };

    dialogue.exit().await?;

    let Some(new) = finish_draft(draft, notifications, msg.chat.id.0) else {
        log::warn!("Incomplete registration draft in chat {}", msg.chat.id);
        return prompt(&bot, &msg, "registration_failed").await;
    };

    match patient::register_patient(&pool, new).await {
        Ok(result) => {
            let patient = result.patient;
            let mut reply = format!(
                "✅ Registered {}\n\nYour token number: {}\nVisit: {}",
                patient.name, patient.token_number, patient.visit_type
            );
            if let Some(slot) = &patient.appointment_time {
                reply.push_str(&format!("\nAppointment: today at {}", slot));
            }
            reply.push_str(&format!(
                "\n\nCheck the queue any time with /status {}",
                patient.doctor_id
            ));
            bot.send_message(msg.chat.id, reply).await?;
        }
        Err(e) => {
            log::warn!("Registration failed: {}", e);
            bot.send_message(
                msg.chat.id,
                format!(
                    "{}\n{}",
                    i18n::text(&lang, "registration_failed"),
                    error_text(&lang, &e)
                ),
            )
            .await?;
        }
    }
    Ok(())
}
