mod text;

use anyhow::Context;
use dashmap::DashMap;
use salon_engine::{
    db, Appointment, CancellationOutcome, Canceller, Clock, DateLabel, EngineConfig, EventSink, Scheduler,
    SystemClock,
};
use std::collections::HashSet;
use std::sync::Arc;
use teloxide::{
    prelude::*,
    types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, WebAppInfo},
    utils::command::BotCommands,
};
use tokio::time::{interval, Duration};

use text::Callback;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    #[command(description = "Открыть запись")]
    Start,
    #[command(description = "Мои записи")]
    MyBookings,
    #[command(description = "Записи на сегодня (для мастера)")]
    Today,
    #[command(description = "Записи на завтра (для мастера)")]
    Tomorrow,
    #[command(description = "Записи на дату, например /day Пн 02.03 (для мастера)")]
    Day(String),
    #[command(description = "Все активные записи (для мастера)")]
    All,
    #[command(description = "Блокировки (для мастера)")]
    Blocked,
    #[command(description = "Сообщения клиентов (для мастера)")]
    Messages,
    #[command(description = "Рассылка всем пользователям (для мастера)")]
    Broadcast(String),
    #[command(description = "Помощь")]
    Help,
}

/// Where the next plain text from a user goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compose {
    ToProvider,
    ToClient(i64),
}

#[derive(Clone)]
struct BotState {
    scheduler: Scheduler,
    webapp_url: url::Url,
    admin_tg_id: i64,
    composing: Arc<DashMap<i64, Compose>>,
}

impl BotState {
    fn is_admin(&self, user_id: i64) -> bool {
        user_id == self.admin_tg_id
    }

    fn booking_keyboard(&self) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup::new(vec![
            vec![InlineKeyboardButton::web_app(
                "💅 Записаться",
                WebAppInfo {
                    url: self.webapp_url.clone(),
                },
            )],
            vec![write_button()],
        ])
    }
}

fn write_button() -> InlineKeyboardButton {
    InlineKeyboardButton::callback("✉️ Написать мастеру", Callback::Write.to_string())
}

fn abort_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "❌ Отмена",
        Callback::Abort.to_string(),
    )]])
}

fn reply_keyboard(client_chat_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "✉️ Ответить",
        Callback::Reply(client_chat_id).to_string(),
    )]])
}

const REMINDER_INTERVAL: Duration = Duration::from_secs(3600);
/// Pause between broadcast sends, under Telegram's 30 messages per second.
const BROADCAST_PAUSE: Duration = Duration::from_millis(50);
const INBOX_SIZE: u32 = 20;
const THREAD_SIZE: u32 = 6;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse()?),
        )
        .init();

    let bot_token = std::env::var("BOT_TOKEN").context("BOT_TOKEN must be set")?;
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:salon.db?mode=rwc".into());
    let webapp_url: url::Url = std::env::var("WEBAPP_URL")
        .context("WEBAPP_URL must be set")?
        .parse()
        .context("WEBAPP_URL must be a valid URL")?;
    let admin_tg_id: i64 = std::env::var("ADMIN_TG_ID")
        .context("ADMIN_TG_ID must be set")?
        .parse()
        .context("ADMIN_TG_ID must be a number")?;
    let config = EngineConfig::from_env();

    let pool = db::create_pool(&database_url, 3).await?;
    db::run_migrations(&pool).await?;

    // The bot talks to clients itself; the server owns event delivery and the sweep.
    let clock = Arc::new(SystemClock::new(config.utc_offset_hours));
    let scheduler = Scheduler::new(pool, clock, config, EventSink::disabled());

    let bot = Bot::new(&bot_token);

    tracing::info!("💅 Salon bot starting...");

    let reminder_bot = bot.clone();
    let reminder_scheduler = scheduler.clone();
    tokio::spawn(async move {
        send_reminders(reminder_bot, reminder_scheduler).await;
    });

    let state = BotState {
        scheduler,
        webapp_url,
        admin_tg_id,
        composing: Arc::new(DashMap::new()),
    };

    let cmd_handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint({
            let state = state.clone();
            move |bot: Bot, msg: Message, cmd: Command| {
                let state = state.clone();
                async move {
                    handle_command(bot, msg, cmd, &state).await?;
                    Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                }
            }
        });

    let callback_handler = Update::filter_callback_query().endpoint({
        let state = state.clone();
        move |bot: Bot, q: CallbackQuery| {
            let state = state.clone();
            async move {
                handle_callback(bot, q, &state).await?;
                Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
            }
        }
    });

    let text_handler = Update::filter_message().endpoint({
        let state = state.clone();
        move |bot: Bot, msg: Message| {
            let state = state.clone();
            async move {
                handle_text(bot, msg, &state).await?;
                Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
            }
        }
    });

    let handler = dptree::entry()
        .branch(cmd_handler)
        .branch(callback_handler)
        .branch(text_handler);

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

impl Command {
    fn is_admin_only(&self) -> bool {
        !matches!(self, Command::Start | Command::MyBookings | Command::Help)
    }
}

// ── Command handlers ──

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: &BotState,
) -> anyhow::Result<()> {
    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0);

    if cmd.is_admin_only() && !state.is_admin(user_id) {
        bot.send_message(msg.chat.id, "⛔ Только для мастера").await?;
        return Ok(());
    }

    match cmd {
        Command::Start => {
            if let Some(user) = msg.from.as_ref() {
                state
                    .scheduler
                    .register_user(msg.chat.id.0, user.username.as_deref(), Some(user.first_name.as_str()))
                    .await?;
            }
            bot.send_message(msg.chat.id, text::WELCOME)
                .parse_mode(ParseMode::Html)
                .reply_markup(state.booking_keyboard())
                .await?;
        }

        Command::MyBookings => {
            let appointments = state.scheduler.client_appointments(user_id).await?;

            if appointments.is_empty() {
                bot.send_message(msg.chat.id, "У вас пока нет активных записей 🤷‍♀️")
                    .reply_markup(state.booking_keyboard())
                    .await?;
            } else {
                let buttons: Vec<Vec<InlineKeyboardButton>> = appointments
                    .iter()
                    .map(|a| {
                        vec![InlineKeyboardButton::callback(
                            format!("❌ Отменить {} {}", a.date_label, a.time_label),
                            Callback::Cancel(a.id).to_string(),
                        )]
                    })
                    .collect();

                bot.send_message(msg.chat.id, text::client_list(&appointments))
                    .parse_mode(ParseMode::Html)
                    .reply_markup(InlineKeyboardMarkup::new(buttons))
                    .await?;
            }
        }

        Command::Today | Command::Tomorrow => {
            let (offset, title) = match cmd {
                Command::Today => (0, "Сегодня"),
                _ => (1, "Завтра"),
            };
            let day = DateLabel::for_date(state.scheduler.clock().today() + chrono::Duration::days(offset));
            let appointments = state.scheduler.appointments_on(&day.to_string()).await?;
            send_day_appointments(&bot, msg.chat.id, &day, title, &appointments).await?;
        }

        Command::Day(ref raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                bot.send_message(msg.chat.id, "Укажите дату, например: /day Пн 02.03").await?;
                return Ok(());
            }
            let found = match DateLabel::parse(raw) {
                Ok(day) => state
                    .scheduler
                    .appointments_on(raw)
                    .await
                    .map(|appointments| (day, appointments)),
                Err(e) => Err(e),
            };
            match found {
                Ok((day, appointments)) => {
                    send_day_appointments(&bot, msg.chat.id, &day, "Записи", &appointments).await?;
                }
                Err(e) => {
                    bot.send_message(msg.chat.id, text::engine_error(&e)).await?;
                }
            }
        }

        Command::All => {
            let appointments = state.scheduler.active_appointments().await?;
            bot.send_message(msg.chat.id, text::all_report(&appointments))
                .parse_mode(ParseMode::Html)
                .reply_markup(admin_buttons(&appointments, true))
                .await?;
        }

        Command::Messages => {
            let messages = state.scheduler.client_messages(INBOX_SIZE).await?;
            let mut seen = HashSet::new();
            let buttons: Vec<Vec<InlineKeyboardButton>> = messages
                .iter()
                .filter(|m| seen.insert(m.client_chat_id))
                .map(|m| {
                    vec![InlineKeyboardButton::callback(
                        format!("✉️ {}", m.client_name),
                        Callback::Reply(m.client_chat_id).to_string(),
                    )]
                })
                .collect();

            bot.send_message(msg.chat.id, text::inbox(&messages))
                .parse_mode(ParseMode::Html)
                .reply_markup(InlineKeyboardMarkup::new(buttons))
                .await?;
        }

        Command::Broadcast(ref body) => {
            let body = body.trim();
            if body.is_empty() {
                bot.send_message(msg.chat.id, "Укажите текст, например: /broadcast Завтра не работаю")
                    .await?;
                return Ok(());
            }
            let (sent, failed) = broadcast(&bot, state, body).await?;
            bot.send_message(msg.chat.id, text::broadcast_report(sent, failed)).await?;
        }

        Command::Blocked => {
            let slots = state.scheduler.list_blocked_slots(None).await?;
            let buttons: Vec<Vec<InlineKeyboardButton>> = slots
                .iter()
                .filter(|s| s.appointment_id.is_none())
                .map(|s| {
                    vec![InlineKeyboardButton::callback(
                        format!("🔓 {}", text::blackout_when(s)),
                        Callback::Unblock(s.id).to_string(),
                    )]
                })
                .collect();

            bot.send_message(msg.chat.id, text::blackout_list(&slots))
                .parse_mode(ParseMode::Html)
                .reply_markup(InlineKeyboardMarkup::new(buttons))
                .await?;
        }

        Command::Help => {
            bot.send_message(msg.chat.id, text::help(state.is_admin(user_id)))
                .parse_mode(ParseMode::Html)
                .await?;
        }
    }

    Ok(())
}

// ── Callback query handler (inline button clicks) ──

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: &BotState,
) -> anyhow::Result<()> {
    let chat_id = q.message.as_ref().map(|m| m.chat().id);
    let user_id = q.from.id.0 as i64;

    let Some(callback) = q.data.as_deref().and_then(Callback::parse) else {
        bot.answer_callback_query(&q.id).await?;
        return Ok(());
    };

    if callback.is_admin_only() && !state.is_admin(user_id) {
        bot.answer_callback_query(&q.id).text("⛔").await?;
        return Ok(());
    }

    let now = state.scheduler.now();
    let reply = match callback {
        Callback::Cancel(id) => match owned(state, id, user_id).await {
            Ok(()) => match state.scheduler.request_cancellation(id, now).await {
                Ok(outcome) => {
                    bot.answer_callback_query(&q.id).await?;
                    if let Some(cid) = chat_id {
                        let mut request = bot
                            .send_message(cid, text::outcome(outcome))
                            .parse_mode(ParseMode::Html);
                        if Canceller::Client.may_cancel(outcome) {
                            request = request.reply_markup(InlineKeyboardMarkup::new(vec![vec![
                                InlineKeyboardButton::callback(
                                    "✅ Да, отменить",
                                    Callback::CancelAccepted(id).to_string(),
                                ),
                            ]]));
                        } else if outcome == CancellationOutcome::RequireProviderContact {
                            request = request.reply_markup(InlineKeyboardMarkup::new(vec![vec![write_button()]]));
                        }
                        request.await?;
                    }
                    return Ok(());
                }
                Err(e) => text::engine_error(&e),
            },
            Err(reply) => reply,
        },

        Callback::CancelAccepted(id) => match owned(state, id, user_id).await {
            Ok(()) => match state.scheduler.apply_cancellation(id, Canceller::Client, now).await {
                Ok(a) => {
                    bot.send_message(ChatId(state.admin_tg_id), text::client_cancelled(&a))
                        .parse_mode(ParseMode::Html)
                        .reply_markup(reply_keyboard(a.client_ref))
                        .await?;
                    "✅ Запись отменена".to_string()
                }
                Err(e) => text::engine_error(&e),
            },
            Err(reply) => reply,
        },

        Callback::Confirm(id) => match state.scheduler.confirm_payment(id).await {
            Ok(a) => {
                bot.send_message(ChatId(a.client_ref), text::confirmed(&a))
                    .await
                    .ok(); // client may have blocked the bot
                format!("✅ Запись #{} подтверждена", a.id)
            }
            Err(e) => text::engine_error(&e),
        },

        Callback::AdminCancel(id) => {
            match state.scheduler.apply_cancellation(id, Canceller::Admin, now).await {
                Ok(a) => {
                    bot.send_message(ChatId(a.client_ref), text::provider_cancelled(&a))
                        .await
                        .ok();
                    format!("✅ Запись #{} отменена, клиент уведомлён", a.id)
                }
                Err(e) => text::engine_error(&e),
            }
        }

        Callback::Unblock(id) => match state.scheduler.unblock_slot(id).await {
            Ok(()) => "🔓 Блокировка снята".to_string(),
            Err(e) => text::engine_error(&e),
        },

        Callback::Write => {
            state.composing.insert(user_id, Compose::ToProvider);
            bot.answer_callback_query(&q.id).await?;
            if let Some(cid) = chat_id {
                bot.send_message(cid, text::WRITE_PROMPT)
                    .parse_mode(ParseMode::Html)
                    .reply_markup(abort_keyboard())
                    .await?;
            }
            return Ok(());
        }

        Callback::Reply(client_chat_id) => {
            let name = state.scheduler.client_name(client_chat_id).await?;
            let thread = state.scheduler.conversation(client_chat_id, THREAD_SIZE).await?;
            state.composing.insert(user_id, Compose::ToClient(client_chat_id));
            bot.answer_callback_query(&q.id).await?;
            if let Some(cid) = chat_id {
                bot.send_message(cid, text::reply_prompt(&name, &thread))
                    .parse_mode(ParseMode::Html)
                    .reply_markup(abort_keyboard())
                    .await?;
            }
            return Ok(());
        }

        Callback::Abort => {
            state.composing.remove(&user_id);
            "Сообщение отменено".to_string()
        }
    };

    bot.answer_callback_query(&q.id).await?;
    if let Some(cid) = chat_id {
        bot.send_message(cid, reply).await?;
    }

    Ok(())
}

/// Someone else's appointment is reported exactly like a missing one.
async fn owned(state: &BotState, id: i64, user_id: i64) -> Result<(), String> {
    match state.scheduler.appointment(id).await {
        Ok(a) if a.client_ref == user_id => Ok(()),
        Ok(_) => Err(text::NOT_FOUND.to_string()),
        Err(e) => Err(text::engine_error(&e)),
    }
}

// ── Messaging ──

/// Plain text: delivered if the sender opened a message, otherwise a hint.
async fn handle_text(bot: Bot, msg: Message, state: &BotState) -> anyhow::Result<()> {
    let Some(body) = msg.text() else {
        return Ok(());
    };
    if body.starts_with('/') {
        return Ok(());
    }
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user.id.0 as i64;

    let Some((_, compose)) = state.composing.remove(&user_id) else {
        if !state.is_admin(user_id) {
            bot.send_message(msg.chat.id, text::NOTHING_TO_SEND)
                .reply_markup(state.booking_keyboard())
                .await?;
        }
        return Ok(());
    };

    match compose {
        Compose::ToProvider => {
            state
                .scheduler
                .register_user(msg.chat.id.0, user.username.as_deref(), Some(user.first_name.as_str()))
                .await?;
            let message = match state.scheduler.record_message(msg.chat.id.0, body, true).await {
                Ok(message) => message,
                Err(e) => {
                    // Keep the prompt open so the client can try again.
                    state.composing.insert(user_id, compose);
                    bot.send_message(msg.chat.id, text::engine_error(&e)).await?;
                    return Ok(());
                }
            };
            bot.send_message(ChatId(state.admin_tg_id), text::client_message(&message))
                .parse_mode(ParseMode::Html)
                .reply_markup(reply_keyboard(message.client_chat_id))
                .await?;
            bot.send_message(msg.chat.id, text::MESSAGE_SENT).await?;
            tracing::info!("💬 Message from client {} relayed", message.client_chat_id);
        }

        Compose::ToClient(client_chat_id) => {
            if let Err(e) = state.scheduler.record_message(client_chat_id, body, false).await {
                state.composing.insert(user_id, compose);
                bot.send_message(msg.chat.id, text::engine_error(&e)).await?;
                return Ok(());
            }
            let reply = match bot
                .send_message(ChatId(client_chat_id), text::provider_message(body))
                .parse_mode(ParseMode::Html)
                .reply_markup(InlineKeyboardMarkup::new(vec![vec![write_button()]]))
                .await
            {
                Ok(_) => "✅ Сообщение отправлено клиенту".to_string(),
                Err(e) => {
                    tracing::warn!("Reply to client {} failed: {}", client_chat_id, e);
                    "❌ Не удалось доставить: клиент не начинал диалог с ботом или заблокировал его"
                        .to_string()
                }
            };
            bot.send_message(msg.chat.id, reply).await?;
        }
    }

    Ok(())
}

/// Sends `body` to every known user except the provider.
async fn broadcast(bot: &Bot, state: &BotState, body: &str) -> anyhow::Result<(usize, usize)> {
    let users = state.scheduler.bot_users().await?;
    let text = text::broadcast(body);
    let (mut sent, mut failed) = (0, 0);

    for user in users.iter().filter(|u| !state.is_admin(u.chat_id)) {
        match bot
            .send_message(ChatId(user.chat_id), text.clone())
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => sent += 1,
            Err(e) => {
                tracing::debug!("Broadcast to {} failed: {}", user.chat_id, e);
                failed += 1;
            }
        }
        tokio::time::sleep(BROADCAST_PAUSE).await;
    }

    tracing::info!("📢 Broadcast delivered to {} users, {} failed", sent, failed);
    Ok((sent, failed))
}

// ── Admin helpers ──

/// Confirm/cancel rows for the provider; `with_date` when the list spans days.
fn admin_buttons(appointments: &[Appointment], with_date: bool) -> InlineKeyboardMarkup {
    let buttons: Vec<Vec<InlineKeyboardButton>> = appointments
        .iter()
        .map(|a| {
            let when = if with_date {
                format!("{} {}", a.date_label, a.time_label)
            } else {
                a.time_label.clone()
            };
            let mut row = Vec::with_capacity(2);
            if a.status == salon_engine::Status::Pending {
                row.push(InlineKeyboardButton::callback(
                    format!("💳 {} {}", when, a.client_name),
                    Callback::Confirm(a.id).to_string(),
                ));
            }
            row.push(InlineKeyboardButton::callback(
                format!("❌ {} {}", when, a.client_name),
                Callback::AdminCancel(a.id).to_string(),
            ));
            row
        })
        .collect();
    InlineKeyboardMarkup::new(buttons)
}

async fn send_day_appointments(
    bot: &Bot,
    chat_id: ChatId,
    day: &DateLabel,
    title: &str,
    appointments: &[Appointment],
) -> anyhow::Result<()> {
    bot.send_message(chat_id, text::day_report(title, day, appointments))
        .parse_mode(ParseMode::Html)
        .reply_markup(admin_buttons(appointments, false))
        .await?;

    Ok(())
}

// ── Reminders ──

async fn send_reminders(bot: Bot, scheduler: Scheduler) {
    // Initial delay: wait 10 seconds before first check
    tokio::time::sleep(Duration::from_secs(10)).await;

    let mut ticker = interval(REMINDER_INTERVAL);

    loop {
        ticker.tick().await;

        let due = match scheduler.due_reminders(scheduler.now()).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Reminder query failed: {}", e);
                continue;
            }
        };

        for appointment in due {
            let sent = bot
                .send_message(ChatId(appointment.client_ref), text::reminder(&appointment))
                .parse_mode(ParseMode::Html)
                .await;

            if sent.is_ok() {
                if let Err(e) = scheduler.mark_reminded(appointment.id).await {
                    tracing::error!("Failed to mark reminder for #{}: {}", appointment.id, e);
                    continue;
                }
                tracing::info!("📬 Reminder sent for appointment #{}", appointment.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_take_free_text() {
        let day = Command::parse("/day Пн 02.03", "salon_bot").unwrap();
        assert!(matches!(day, Command::Day(ref label) if label == "Пн 02.03"));

        let news = Command::parse("/broadcast Завтра не работаю", "salon_bot").unwrap();
        assert!(matches!(news, Command::Broadcast(ref body) if body == "Завтра не работаю"));
    }

    #[test]
    fn test_client_commands_are_open() {
        assert!(!Command::Start.is_admin_only());
        assert!(!Command::MyBookings.is_admin_only());
        assert!(!Command::Help.is_admin_only());
        assert!(Command::All.is_admin_only());
        assert!(Command::Messages.is_admin_only());
        assert!(Command::Broadcast(String::new()).is_admin_only());
    }
}
